//! Tracker configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Run a forced collection pass before confirming an exceeded limit.
    /// Disabling it turns every threshold trip into an abort.
    pub force_collect_on_trip: bool,

    /// Maximum number of nested `limit` scopes per thread.
    pub max_scope_depth: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            force_collect_on_trip: true,
            max_scope_depth: 256,
        }
    }
}

impl TrackerConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `ALLOCTRACK_FORCE_COLLECT`: `0`/`false` disables the recount pass
    /// - `ALLOCTRACK_MAX_SCOPE_DEPTH`: nesting limit for `limit` scopes
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("ALLOCTRACK_FORCE_COLLECT") {
            if let Some(v) = parse_flag(&s) {
                cfg.force_collect_on_trip = v;
            }
        }

        if let Ok(s) = std::env::var("ALLOCTRACK_MAX_SCOPE_DEPTH") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.max_scope_depth = v;
            }
        }

        cfg
    }
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse_loosely() {
        assert_eq!(parse_flag(" TRUE "), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn config_roundtrips_through_json() {
        let cfg = TrackerConfig {
            force_collect_on_trip: false,
            max_scope_depth: 8,
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: TrackerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
