//! Process-wide tracker configuration.
//!
//! Initialised from the environment on first read. Only scope entry and safe
//! points consult it, never the allocation hot path.

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use alloctrack_core::TrackerConfig;

static CONFIG: Lazy<RwLock<TrackerConfig>> = Lazy::new(|| RwLock::new(TrackerConfig::from_env()));

/// Replace the process-wide configuration. Affects scopes entered and safe
/// points reached afterwards.
pub fn configure(cfg: TrackerConfig) {
    trace_event!(
        force_collect_on_trip = cfg.force_collect_on_trip,
        max_scope_depth = cfg.max_scope_depth,
        "configured"
    );
    *CONFIG.write() = cfg;
}

pub fn current() -> TrackerConfig {
    CONFIG.read().clone()
}
