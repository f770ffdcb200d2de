#![deny(unsafe_code)]
//! alloctrack-mem: per-thread allocation counting and budgeted `limit` scopes.
//!
//! The engine implements [`AllocationObserver`](alloctrack_core::AllocationObserver)
//! through [`Hook`]. A runtime reports every allocation and reclamation to it;
//! each event is attributed to the object's owning thread and counted only if
//! that thread is tracking. `limit` scopes arm a trip point on the thread's
//! state; crossing it raises a signal that the next safe point on that thread
//! confirms against a forced collection before unwinding the scope.
//!
//! Nothing here blocks except the forced collection itself.

#[macro_use]
mod trace;

pub mod abort;
#[allow(unsafe_code)]
pub mod allocator;
pub mod control;
pub mod guard;
pub mod hook;
pub mod registry;
pub mod scope;
pub mod settings;
pub mod state;
pub mod tracking;

pub use abort::{abort_handle, checkpoint, AbortHandle};
pub use allocator::TrackingAllocator;
pub use control::{alloc, delta, free, is_started, max_delta, snapshot, start, stop, Snapshot};
pub use guard::limit;
pub use hook::{register_collector, Hook};
pub use settings::configure;
pub use state::ThreadState;
