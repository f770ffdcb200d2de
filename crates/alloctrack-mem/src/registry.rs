//! Process-wide registry of thread states.
//!
//! The map is sharded (`DashMap`) so cross-thread lookups never take a global
//! lock. A thread's own state is additionally cached in a thread-local slot,
//! which is the only path the hot allocation hook takes for its own events.

use std::cell::{Cell, OnceCell};
use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use alloctrack_core::ThreadKey;

use crate::hook;
use crate::state::ThreadState;

static REGISTRY: Lazy<DashMap<ThreadKey, Arc<ThreadState>>> = Lazy::new(DashMap::new);

struct LocalSlot {
    state: OnceCell<Arc<ThreadState>>,
}

impl Drop for LocalSlot {
    fn drop(&mut self) {
        HAS_STATE.with(|flag| flag.set(false));
        if let Some(state) = self.state.take() {
            let removed = hook::muted(|| REGISTRY.remove(&state.key()));
            drop(removed);
        }
    }
}

thread_local! {
    // Drop-free flag, readable from inside the allocator without registering a destructor.
    static HAS_STATE: Cell<bool> = const { Cell::new(false) };
    static LOCAL: LocalSlot = const { LocalSlot { state: OnceCell::new() } };
}

/// The calling thread's state, created and registered on first use.
///
/// During thread teardown (after the local slot is gone) a detached,
/// unregistered state is returned instead.
pub fn current() -> Arc<ThreadState> {
    LOCAL
        .try_with(|slot| {
            slot.state
                .get_or_init(|| {
                    let key = ThreadKey::current();
                    let state = Arc::new(ThreadState::new(key));
                    let replaced = hook::muted(|| REGISTRY.insert(key, Arc::clone(&state)));
                    drop(replaced);
                    HAS_STATE.with(|flag| flag.set(true));
                    trace_event!(thread = key.get(), "thread state registered");
                    state
                })
                .clone()
        })
        .unwrap_or_else(|_| Arc::new(ThreadState::new(ThreadKey::current())))
}

/// The calling thread's state if it has one; never creates.
pub fn existing() -> Option<Arc<ThreadState>> {
    with_existing(|state| Arc::clone(state))
}

/// Run `f` against the calling thread's state without cloning it.
#[inline]
pub(crate) fn with_existing<R>(f: impl FnOnce(&Arc<ThreadState>) -> R) -> Option<R> {
    if !HAS_STATE.with(Cell::get) {
        return None;
    }
    LOCAL
        .try_with(|slot| slot.state.get().map(f))
        .ok()
        .flatten()
}

/// State of an arbitrary thread. `None` once that thread has exited.
pub fn lookup(key: ThreadKey) -> Option<Arc<ThreadState>> {
    REGISTRY.get(&key).map(|entry| Arc::clone(entry.value()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_is_registered_and_cached() {
        let a = current();
        let b = current();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.key(), ThreadKey::current());
        assert!(lookup(a.key()).is_some());
        assert!(existing().is_some());
    }

    #[test]
    fn fresh_thread_has_no_state_until_asked() {
        std::thread::spawn(|| {
            assert!(existing().is_none());
            let _ = current();
            assert!(existing().is_some());
        })
        .join()
        .unwrap();
    }

    #[test]
    fn exited_thread_is_unregistered() {
        let key = std::thread::spawn(|| current().key()).join().unwrap();
        assert!(lookup(key).is_none());
    }
}
