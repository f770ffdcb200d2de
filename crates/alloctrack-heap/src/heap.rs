//! Managed heap with deferred reclamation.
//!
//! Handles are roots. An object whose only remaining reference is the heap's
//! own table is garbage and is reclaimed by the next [`Heap::collect`]. Pass
//! repeats until nothing more is freed, so chains of objects holding handles
//! to each other are reclaimed in one call (cycles are not).

use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};

use alloctrack_core::prelude::*;

type Cell = Arc<dyn Any + Send + Sync>;

struct Slot {
    owner: ThreadKey,
    cell: Cell,
}

/// Handle to a managed object. Cloning adds a root.
pub struct Obj<T>(Arc<T>);

impl<T> Clone for Obj<T> {
    fn clone(&self) -> Self {
        Obj(Arc::clone(&self.0))
    }
}

impl<T> Deref for Obj<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Obj<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Obj").field(&self.0).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeapStats {
    /// Objects in the table, reachable or not.
    pub objects: usize,
    /// Completed collection passes.
    pub collections: u64,
    pub allocated: u64,
    pub freed: u64,
}

pub struct Heap {
    objects: Mutex<Vec<Slot>>,
    /// Held for a whole collection so a returning `collect` has reported every
    /// object that was garbage when it was called. Reentrant: a destructor
    /// may allocate and reach a safe point that collects again.
    collecting: ReentrantMutex<()>,
    observer: RwLock<Option<Arc<dyn AllocationObserver>>>,
    collections: AtomicU64,
    allocated: AtomicU64,
    freed: AtomicU64,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(Vec::new()),
            collecting: ReentrantMutex::new(()),
            observer: RwLock::new(None),
            collections: AtomicU64::new(0),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
        }
    }

    /// Attach the single observer. Fails if one is already attached.
    pub fn subscribe(&self, observer: Arc<dyn AllocationObserver>) -> Result<()> {
        let mut slot = self.observer.write();
        if slot.is_some() {
            return Err(Error::AlreadySubscribed);
        }
        *slot = Some(observer);
        Ok(())
    }

    /// Detach the observer. Returns whether one was attached.
    pub fn unsubscribe(&self) -> bool {
        self.observer.write().take().is_some()
    }

    fn observer(&self) -> Option<Arc<dyn AllocationObserver>> {
        self.observer.read().clone()
    }

    /// Allocate a managed object owned by the calling thread.
    ///
    /// The observer is notified synchronously and then given a safe point,
    /// which may unwind; no heap lock is held at that moment.
    pub fn alloc<T: Any + Send + Sync>(&self, value: T) -> Obj<T> {
        let owner = ThreadKey::current();
        let obj = Arc::new(value);
        self.objects.lock().push(Slot {
            owner,
            cell: Arc::clone(&obj) as Cell,
        });
        self.allocated.fetch_add(1, Ordering::Relaxed);

        if let Some(observer) = self.observer() {
            observer.on_allocate(owner);
            observer.safepoint();
        }
        Obj(obj)
    }

    /// Run a full collection pass on the calling thread. Returns the number
    /// of objects reclaimed.
    pub fn collect(&self) -> usize {
        let _pass = self.collecting.lock();
        let observer = self.observer();
        let mut reclaimed = 0;
        loop {
            let dead = self.sweep();
            if dead.is_empty() {
                break;
            }
            reclaimed += dead.len();
            self.freed.fetch_add(dead.len() as u64, Ordering::Relaxed);
            if let Some(observer) = &observer {
                for slot in &dead {
                    observer.on_free(slot.owner);
                }
            }
            // Values are dropped here, outside the table lock: a destructor
            // may release handles or allocate again.
            drop(dead);
        }
        self.collections.fetch_add(1, Ordering::Relaxed);
        reclaimed
    }

    fn sweep(&self) -> Vec<Slot> {
        let mut objects = self.objects.lock();
        let mut dead = Vec::new();
        let mut idx = 0;
        while idx < objects.len() {
            if Arc::strong_count(&objects[idx].cell) == 1 {
                dead.push(objects.swap_remove(idx));
            } else {
                idx += 1;
            }
        }
        dead
    }

    pub fn stats(&self) -> HeapStats {
        HeapStats {
            objects: self.objects.lock().len(),
            collections: self.collections.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            freed: self.freed.load(Ordering::Relaxed),
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for Heap {
    fn collect(&self) {
        Heap::collect(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    /// Observer that records events instead of counting them.
    #[derive(Default)]
    struct Recorder {
        events: StdMutex<Vec<(&'static str, ThreadKey)>>,
    }

    impl AllocationObserver for Recorder {
        fn on_allocate(&self, owner: ThreadKey) {
            self.events.lock().unwrap().push(("alloc", owner));
        }
        fn on_free(&self, owner: ThreadKey) {
            self.events.lock().unwrap().push(("free", owner));
        }
    }

    #[test]
    fn rooted_objects_survive_collection() {
        let heap = Heap::new();
        let kept = heap.alloc(1u32);
        drop(heap.alloc(2u32));
        assert_eq!(heap.collect(), 1);
        assert_eq!(*kept, 1);
        assert_eq!(heap.stats().objects, 1);
        drop(kept);
        assert_eq!(heap.collect(), 1);
        assert_eq!(heap.stats().objects, 0);
        assert_eq!(heap.stats().collections, 2);
    }

    #[test]
    fn chains_are_reclaimed_in_one_pass() {
        let heap = Heap::new();
        let leaf = heap.alloc(0u8);
        let parent = heap.alloc(leaf.clone());
        drop(leaf);
        drop(parent);
        assert_eq!(heap.collect(), 2);
    }

    #[test]
    fn frees_report_the_allocating_thread() {
        let heap = Arc::new(Heap::new());
        let recorder = Arc::new(Recorder::default());
        heap.subscribe(recorder.clone()).unwrap();

        let other = {
            let heap = Arc::clone(&heap);
            std::thread::spawn(move || {
                drop(heap.alloc("garbage"));
                ThreadKey::current()
            })
            .join()
            .unwrap()
        };
        heap.collect();

        let events = recorder.events.lock().unwrap().clone();
        assert_eq!(events, vec![("alloc", other), ("free", other)]);
    }

    #[test]
    fn single_subscriber() {
        let heap = Heap::new();
        heap.subscribe(Arc::new(Recorder::default())).unwrap();
        assert_eq!(
            heap.subscribe(Arc::new(Recorder::default())),
            Err(Error::AlreadySubscribed)
        );
        assert!(heap.unsubscribe());
        assert!(!heap.unsubscribe());
        heap.subscribe(Arc::new(Recorder::default())).unwrap();
    }

    #[test]
    fn drives_the_engine_hook() {
        use alloctrack_mem::{control, Hook};

        let heap = Heap::new();
        heap.subscribe(Arc::new(Hook)).unwrap();
        control::start();
        let kept: Vec<_> = (0..10).map(|i| heap.alloc(i)).collect();
        for _ in 0..5 {
            drop(heap.alloc(()));
        }
        assert_eq!(control::delta(), Ok(15));
        heap.collect();
        assert_eq!(control::free(), 5);
        assert_eq!(control::delta(), Ok(10));
        control::stop();
        drop(kept);
    }
}
