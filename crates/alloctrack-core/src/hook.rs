//! Runtime boundary interfaces.
//!
//! The engine (`alloctrack-mem`) implements [`AllocationObserver`]; a managed
//! runtime (`alloctrack-heap`, or an instrumented allocator) drives it and
//! implements [`Collector`]. Only traits live here so a runtime can depend on
//! the contract without pulling the engine.

use crate::id::ThreadKey;

/// Receiver of the runtime's allocation and reclamation notifications.
///
/// Called synchronously on every object event in the process, tracked or not.
/// Implementations must be cheap, must not allocate through the observed
/// runtime, and must never unwind out of `on_allocate`/`on_free`.
pub trait AllocationObserver: Send + Sync + 'static {
    /// An object owned by `owner` was allocated.
    fn on_allocate(&self, owner: ThreadKey);

    /// An object owned by `owner` was reclaimed.
    fn on_free(&self, owner: ThreadKey);

    /// The calling thread reached a point where it can accept an abort.
    ///
    /// Runtimes call this after an allocation completes and no internal lock
    /// is held. It may unwind.
    fn safepoint(&self) {}
}

/// The runtime's forced-collection primitive.
///
/// `collect` runs a full pass synchronously on the calling thread and returns
/// only once every unreachable object has been reported through `on_free`.
pub trait Collector: Send + Sync + 'static {
    fn collect(&self);
}

// NOTE: Do *not* add a default `Collector` that pretends to free objects.
// Without a registered collector the engine simply skips the recount pass.
