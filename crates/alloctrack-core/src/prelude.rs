//! Convenient re-exports for downstream crates.

pub use crate::config::TrackerConfig;
pub use crate::error::{Error, Result};
pub use crate::hook::{AllocationObserver, Collector};
pub use crate::id::{ScopeId, ThreadKey};
