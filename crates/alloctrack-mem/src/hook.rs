//! Event hook adapter: the engine's side of the runtime boundary.
//!
//! Every allocation and free in the process lands here. Threads that are not
//! counting pay one thread-local flag check (own events) or one sharded map
//! lookup (events for another thread's objects) and return.

use std::cell::Cell;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use alloctrack_core::{AllocationObserver, Collector, Error, Result, ThreadKey};

use crate::abort;
use crate::registry;
use crate::state::ThreadState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Allocate,
    Free,
}

thread_local! {
    // Set while this thread is inside the hook; nested events (the hook's own
    // bookkeeping allocating) are ignored.
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

static COLLECTOR: OnceCell<Arc<dyn Collector>> = OnceCell::new();

#[inline]
pub(crate) fn dispatch(owner: ThreadKey, event: Event) {
    let _ = IN_HOOK.try_with(|busy| {
        if busy.replace(true) {
            return;
        }
        if owner == ThreadKey::current() {
            registry::with_existing(|state| apply(state, event));
        } else if let Some(state) = registry::lookup(owner) {
            apply(&state, event);
        }
        busy.set(false);
    });
}

/// Run `f` with this thread's hook muted. Registry writes must not re-enter
/// the map from a nested free while a shard is write-locked.
pub(crate) fn muted<R>(f: impl FnOnce() -> R) -> R {
    let prev = IN_HOOK.try_with(|busy| busy.replace(true)).ok();
    let out = f();
    if let Some(prev) = prev {
        let _ = IN_HOOK.try_with(|busy| busy.set(prev));
    }
    out
}

#[inline]
fn apply(state: &ThreadState, event: Event) {
    match event {
        Event::Allocate => state.record_alloc(),
        Event::Free => state.record_free(),
    }
}

/// The engine's observer. Subscribe it to a runtime exactly once.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hook;

impl AllocationObserver for Hook {
    #[inline]
    fn on_allocate(&self, owner: ThreadKey) {
        dispatch(owner, Event::Allocate);
    }

    #[inline]
    fn on_free(&self, owner: ThreadKey) {
        dispatch(owner, Event::Free);
    }

    fn safepoint(&self) {
        abort::checkpoint();
    }
}

/// Register the runtime's forced-collection primitive. One per process.
pub fn register_collector(collector: Arc<dyn Collector>) -> Result<()> {
    COLLECTOR
        .set(collector)
        .map_err(|_| Error::AlreadySubscribed)?;
    trace_event!("collector registered");
    Ok(())
}

/// Run a forced collection pass if a collector is registered.
pub(crate) fn force_collect() -> bool {
    match COLLECTOR.get() {
        Some(collector) => {
            collector.collect();
            true
        }
        None => false,
    }
}
