#![forbid(unsafe_code)]
//! alloctrack-core: shared types and interfaces for the allocation tracker.
//!
//! The engine lives in `alloctrack-mem` and the managed heap in `alloctrack-heap`.
//! Both depend on this crate only for the traits at the runtime boundary, the
//! error taxonomy, identifiers, and configuration.

pub mod config;
pub mod error;
pub mod hook;
pub mod id;
pub mod prelude;

pub use config::TrackerConfig;
pub use error::{Error, Result};
pub use hook::{AllocationObserver, Collector};
pub use id::{ScopeId, ThreadKey};
