//! Tracing hooks (feature: `tracing`).
//!
//! Expands to nothing unless the feature is enabled. Never call from the
//! allocation hot path: a subscriber may allocate.

#[cfg(feature = "tracing")]
macro_rules! trace_event {
    ($($arg:tt)*) => {
        tracing::debug!(target: "alloctrack", $($arg)*)
    };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_event {
    ($($arg:tt)*) => {{
        // no-op
    }};
}
