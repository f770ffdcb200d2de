//! Strongly-typed identifiers used across the tracker.
//!
//! Thread identity is a process-unique counter assigned on first use, never a
//! raw OS thread id, so keys are never reused within a process.

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! new_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(v: u64) -> Self {
                Self(v)
            }
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(ThreadKey);
new_id!(ScopeId);

static NEXT_THREAD: AtomicU64 = AtomicU64::new(1);
static NEXT_SCOPE: AtomicU64 = AtomicU64::new(1);

thread_local! {
    // Const-initialised and drop-free: safe to touch from inside a global allocator.
    static CURRENT_THREAD: Cell<u64> = const { Cell::new(0) };
}

impl ThreadKey {
    /// Identity of the calling thread. Assigned lazily, stable for the thread's lifetime.
    #[inline]
    pub fn current() -> Self {
        CURRENT_THREAD.with(|cell| {
            let mut key = cell.get();
            if key == 0 {
                key = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
                cell.set(key);
            }
            ThreadKey(key)
        })
    }
}

impl ScopeId {
    /// Fresh process-unique scope identity. Never reused, so a stale id can
    /// never match a newer scope.
    pub fn next() -> Self {
        ScopeId(NEXT_SCOPE.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_key_is_stable_and_distinct() {
        let here = ThreadKey::current();
        assert_eq!(here, ThreadKey::current());
        let there = std::thread::spawn(ThreadKey::current).join().unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn scope_ids_are_unique() {
        assert_ne!(ScopeId::next(), ScopeId::next());
    }
}
