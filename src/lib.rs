#![forbid(unsafe_code)]
//! alloctrack: count object allocations per thread and enforce allocation
//! budgets on spans of code.
//!
//! ```ignore
//! let rt = alloctrack::runtime();
//!
//! alloctrack::start();
//! let kept: Vec<_> = (0..100).map(|i| rt.alloc(i)).collect();
//! assert!(alloctrack::delta()? >= 100);
//! alloctrack::stop();
//!
//! let err = alloctrack::limit(10, || {
//!     (0..200).map(|i| rt.alloc(i)).collect::<Vec<_>>()
//! })
//! .unwrap_err();
//! assert!(err.is_limit_exceeded());
//! ```
//!
//! Counters and scopes are strictly per calling thread. Code running on the
//! process-wide [`runtime`] heap is interrupted at its next allocation; code
//! running under [`TrackingAllocator`] is interrupted at [`checkpoint`] calls
//! and at scope exit.

use std::sync::Arc;

use once_cell::sync::Lazy;

pub use alloctrack_core::{Error, Result, ScopeId, ThreadKey, TrackerConfig};
pub use alloctrack_heap::{Heap, HeapStats, Obj};
pub use alloctrack_mem::{
    abort_handle, alloc, checkpoint, configure, delta, free, is_started, limit, max_delta,
    snapshot, start, stop, AbortHandle, Hook, Snapshot, TrackingAllocator,
};

static RUNTIME: Lazy<Arc<Heap>> = Lazy::new(|| {
    let heap = Arc::new(Heap::new());
    // A fresh heap has no subscriber yet.
    let _ = heap.subscribe(Arc::new(Hook));
    if let Err(_e) = alloctrack_mem::register_collector(heap.clone()) {
        #[cfg(feature = "tracing")]
        tracing::warn!(error = %_e, "another collector is registered; runtime() will not be force-collected");
    }
    heap
});

/// The process-wide managed heap, wired to the tracker on first use.
pub fn runtime() -> &'static Heap {
    &RUNTIME
}

/// Alias of [`is_started`].
pub fn started() -> bool {
    is_started()
}
