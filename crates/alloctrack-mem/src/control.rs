//! Public control surface.
//!
//! Every call acts on the calling thread only. Reads never create state: a
//! thread that never touched the tracker reads zero counts and is not started.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use alloctrack_core::{Error, Result, ThreadKey};

use crate::registry;
use crate::state::ThreadState;

/// Begin counting on the calling thread. Restarting resets the reported counts.
pub fn start() {
    let state = registry::current();
    state.start();
    trace_event!(thread = state.key().get(), "tracking started");
}

/// Stop counting on the calling thread. Counts keep their last values.
///
/// Scopes still on the stack keep enforcing their budgets.
pub fn stop() {
    if let Some(state) = registry::existing() {
        state.stop();
        trace_event!(thread = state.key().get(), "tracking stopped");
    }
}

pub fn is_started() -> bool {
    registry::existing().is_some_and(|s| s.is_active())
}

/// Allocations counted since `start()`; zero before the first start.
pub fn alloc() -> u64 {
    registry::existing().map_or(0, |s| s.allocated())
}

/// Frees counted since `start()`; zero before the first start.
pub fn free() -> u64 {
    registry::existing().map_or(0, |s| s.freed())
}

/// `alloc() - free()`.
pub fn delta() -> Result<i64> {
    started_state().map(|s| s.delta())
}

/// Highest `delta()` observed since `start()`.
pub fn max_delta() -> Result<i64> {
    started_state().map(|s| s.max_delta())
}

fn started_state() -> Result<Arc<ThreadState>> {
    registry::existing()
        .filter(|s| s.has_started())
        .ok_or(Error::NotStarted)
}

/// One read of the calling thread's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub thread: ThreadKey,
    pub started: bool,
    pub allocated: u64,
    pub freed: u64,
    pub delta: i64,
    pub max_delta: i64,
    pub scope_depth: usize,
}

pub fn snapshot() -> Result<Snapshot> {
    let state = started_state()?;
    Ok(Snapshot {
        thread: state.key(),
        started: state.is_active(),
        allocated: state.allocated(),
        freed: state.freed(),
        delta: state.delta(),
        max_delta: state.max_delta(),
        scope_depth: state.scope_depth(),
    })
}
