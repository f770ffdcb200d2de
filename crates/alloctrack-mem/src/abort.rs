//! Abort delivery.
//!
//! An abort never preempts a thread. Requests land in the target thread's
//! mailbox (from any thread) or as the limit signal (from the thread's own
//! allocation hook), and are turned into an unwind at the next safe point on
//! the owning thread: an allocation through the managed heap, an explicit
//! [`checkpoint`], or the exit of a `limit` scope.
//!
//! The unwind carries a [`LimitAbort`] payload; only the `limit` frame that
//! owns the named scope converts it into `Error::LimitExceeded`.

use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use alloctrack_core::{ScopeId, ThreadKey};

use crate::hook;
use crate::registry;
use crate::scope::{self, Breach, ScopeStack};
use crate::settings;
use crate::state::ThreadState;

/// Unwind payload naming the scope being aborted.
#[derive(Debug)]
pub(crate) struct LimitAbort(pub(crate) Breach);

/// Pending abort requests for one thread.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    pending: AtomicBool,
    requests: Mutex<Vec<ScopeId>>,
}

impl Mailbox {
    pub(crate) fn post(&self, scope: ScopeId) {
        let mut requests = self.requests.lock();
        if !requests.contains(&scope) {
            requests.push(scope);
        }
        self.pending.store(true, Ordering::Release);
    }

    pub(crate) fn has_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Take the request for the innermost scope still on `stack`.
    ///
    /// Requests for scopes that are no longer on the stack are stale and
    /// dropped. Requests for outer scopes stay queued until the inner unwind
    /// has been handled.
    pub(crate) fn take_for(&self, stack: &ScopeStack) -> Option<ScopeId> {
        let mut requests = self.requests.lock();
        requests.retain(|id| {
            let live = stack.position(*id).is_some();
            if !live {
                trace_event!(scope = id.get(), "dropping stale abort request");
            }
            live
        });
        let innermost = requests
            .iter()
            .enumerate()
            .max_by_key(|(_, id)| stack.position(**id))
            .map(|(idx, _)| idx);
        let taken = innermost.map(|idx| requests.swap_remove(idx));
        self.pending.store(!requests.is_empty(), Ordering::Release);
        taken
    }
}

/// Deliver any abort pending for the calling thread.
///
/// Does nothing on threads that never touched the tracker. May unwind.
pub fn checkpoint() {
    let Some(state) = registry::existing() else {
        return;
    };
    if let Some(breach) = pending_abort(&state) {
        deliver(breach);
    }
}

pub(crate) fn pending_abort(state: &ThreadState) -> Option<Breach> {
    if state.mailbox.has_pending() {
        let raw_live = state.raw_live();
        let requested = scope::with_scopes(|stack| {
            state.mailbox.take_for(stack).and_then(|id| {
                stack.get(id).map(|s| Breach {
                    scope: id,
                    threshold: s.threshold,
                    live: s.live(raw_live),
                })
            })
        });
        if requested.is_some() {
            return requested;
        }
    }
    if state.take_limit_signal() {
        return recount(state);
    }
    None
}

/// Confirm a tripped threshold against post-collection counts.
#[cfg_attr(not(feature = "tracing"), allow(unused_variables))]
fn recount(state: &ThreadState) -> Option<Breach> {
    let collected = settings::current().force_collect_on_trip && hook::force_collect();
    let raw_live = state.raw_live();
    let breach = scope::with_scopes(|stack| stack.innermost_exceeded(raw_live));
    match &breach {
        Some(b) => trace_event!(
            thread = state.key().get(),
            scope = b.scope.get(),
            threshold = b.threshold,
            live = b.live,
            collected,
            "limit exceeded"
        ),
        None => trace_event!(
            thread = state.key().get(),
            raw_live,
            collected,
            "threshold trip was transient garbage"
        ),
    }
    breach
}

fn deliver(breach: Breach) -> ! {
    trace_event!(scope = breach.scope.get(), live = breach.live, "delivering abort");
    panic::resume_unwind(Box::new(LimitAbort(breach)))
}

/// Cross-thread handle on one `limit` scope.
///
/// `abort` may be called from any thread; the owning thread raises
/// `LimitExceeded` for that scope at its next safe point.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    thread: ThreadKey,
    scope: ScopeId,
    open: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn thread(&self) -> ThreadKey {
        self.thread
    }

    pub fn scope(&self) -> ScopeId {
        self.scope
    }

    /// Whether the scope is still on its thread's stack.
    pub fn is_live(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Request the abort. Returns `false` when the scope has already been
    /// popped or its thread has exited; the request is dropped then.
    pub fn abort(&self) -> bool {
        if !self.is_live() {
            return false;
        }
        match registry::lookup(self.thread) {
            Some(state) => {
                state.mailbox.post(self.scope);
                trace_event!(
                    thread = self.thread.get(),
                    scope = self.scope.get(),
                    "abort requested"
                );
                true
            }
            None => false,
        }
    }
}

/// Handle on the calling thread's innermost `limit` scope.
pub fn abort_handle() -> Option<AbortHandle> {
    let thread = ThreadKey::current();
    scope::with_scopes(|stack| {
        stack.innermost().map(|s| AbortHandle {
            thread,
            scope: s.id,
            open: Arc::clone(&s.open),
        })
    })
}
