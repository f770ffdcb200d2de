//! `limit` scopes and their RAII guard.
//!
//! The guard pushes the scope on entry and pops it on drop, so the stack and
//! the tracking flag are restored on every exit path: normal return,
//! `LimitExceeded`, an error value, or an unrelated panic.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use alloctrack_core::{Error, Result, ScopeId};

use crate::abort::{checkpoint, LimitAbort};
use crate::registry;
use crate::scope::{self, LimitScope};
use crate::settings;
use crate::state::ThreadState;

/// RAII guard for one scope on the calling thread's stack.
pub(crate) struct ScopeGuard {
    state: Arc<ThreadState>,
    id: ScopeId,
    open: Arc<AtomicBool>,
    /// This scope turned tracking on, so it turns it off again.
    started_tracking: bool,
}

impl ScopeGuard {
    pub(crate) fn enter(threshold: u64) -> Result<Self> {
        let max = settings::current().max_scope_depth;
        if scope::with_scopes(|stack| stack.depth()) >= max {
            return Err(Error::NestingTooDeep { max });
        }

        let state = registry::current();
        let started_tracking = !state.is_active();
        if started_tracking {
            state.start();
        }

        let (allocated, freed) = state.raw_counts();
        let open = Arc::new(AtomicBool::new(true));
        let scope = LimitScope::new(threshold, allocated, freed, Arc::clone(&open));
        let id = scope.id;
        let (trip_at, depth) = scope::with_scopes_mut(|stack| {
            stack.push(scope);
            (stack.trip_point(), stack.depth())
        });
        state.arm(trip_at, depth, false);
        trace_event!(
            thread = state.key().get(),
            scope = id.get(),
            threshold,
            depth,
            "limit scope entered"
        );

        Ok(Self {
            state,
            id,
            open,
            started_tracking,
        })
    }

    pub(crate) fn id(&self) -> ScopeId {
        self.id
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.open.store(false, Ordering::Release);
        let (trip_at, depth) = scope::with_scopes_mut(|stack| {
            stack.remove(self.id);
            (stack.trip_point(), stack.depth())
        });
        if self.started_tracking {
            self.state.stop();
        }
        self.state.arm(trip_at, depth, true);
        trace_event!(scope = self.id.get(), depth, "limit scope exited");
    }
}

/// Run `block` under an allocation budget of `threshold` net-live objects.
///
/// Starts tracking on the calling thread if it is not already running and
/// stops it again on exit. If the scope's live count stays above `threshold`
/// after a forced collection, `block` is unwound at its next safe point and
/// `Err(LimitExceeded)` is returned. An error value returned by `block` comes
/// back as `Ok(Err(_))`; a panic in `block` is resumed after cleanup.
///
/// Fails with `InvalidArgument` for a negative or oversized threshold and with
/// `NestingTooDeep` past the configured depth; neither touches any state.
pub fn limit<T, F, R>(threshold: T, block: F) -> Result<R>
where
    T: TryInto<u64>,
    F: FnOnce() -> R,
{
    let threshold: u64 = threshold.try_into().map_err(|_| {
        Error::InvalidArgument("limit() must be passed a non-negative integer".to_string())
    })?;

    let guard = ScopeGuard::enter(threshold)?;
    let id = guard.id();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let value = block();
        // Scope exit is a safe point: nothing pending may outlive the scope.
        checkpoint();
        value
    }));
    drop(guard);

    match outcome {
        Ok(value) => Ok(value),
        Err(payload) => match payload.downcast::<LimitAbort>() {
            Ok(abort) if abort.0.scope == id => Err(Error::LimitExceeded {
                threshold: abort.0.threshold,
                live: abort.0.live,
            }),
            Ok(abort) => panic::resume_unwind(abort),
            Err(other) => panic::resume_unwind(other),
        },
    }
}
