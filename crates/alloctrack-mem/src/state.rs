//! Per-thread counter state.
//!
//! Raw counters only ever grow while the thread is counting. `start()` does
//! not zero them; it moves the reporting epoch, so limit scopes (which keep
//! raw baselines) are never disturbed by a restart.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};

use alloctrack_core::ThreadKey;

use crate::abort::Mailbox;
use crate::tracking::PeakTracker;

/// No scope armed: the live count can never reach this.
pub(crate) const DISARMED: i64 = i64::MAX;

#[derive(Debug)]
pub struct ThreadState {
    key: ThreadKey,
    /// `start()`ed and not `stop()`ped.
    active: AtomicBool,
    /// `active || scope_depth > 0`; the only flag the hot path reads for idle threads.
    counting: AtomicBool,
    ever_started: AtomicBool,
    allocated: AtomicU64,
    freed: AtomicU64,
    epoch_allocated: AtomicU64,
    epoch_freed: AtomicU64,
    peak: PeakTracker,
    scope_depth: AtomicUsize,
    /// Smallest raw live count at which some scope on the stack trips.
    trip_at: AtomicI64,
    limit_signal: AtomicBool,
    pub(crate) mailbox: Mailbox,
}

#[inline]
fn live_of(allocated: u64, freed: u64) -> i64 {
    allocated.wrapping_sub(freed) as i64
}

impl ThreadState {
    pub(crate) fn new(key: ThreadKey) -> Self {
        Self {
            key,
            active: AtomicBool::new(false),
            counting: AtomicBool::new(false),
            ever_started: AtomicBool::new(false),
            allocated: AtomicU64::new(0),
            freed: AtomicU64::new(0),
            epoch_allocated: AtomicU64::new(0),
            epoch_freed: AtomicU64::new(0),
            peak: PeakTracker::new(),
            scope_depth: AtomicUsize::new(0),
            trip_at: AtomicI64::new(DISARMED),
            limit_signal: AtomicBool::new(false),
            mailbox: Mailbox::default(),
        }
    }

    pub fn key(&self) -> ThreadKey {
        self.key
    }

    // ----- hot path -----

    #[inline]
    pub(crate) fn record_alloc(&self) {
        if !self.counting.load(Ordering::Relaxed) {
            return;
        }
        let allocated = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
        let live = live_of(allocated, self.freed.load(Ordering::Relaxed));
        self.peak.record(live);
        if live >= self.trip_at.load(Ordering::Relaxed) {
            self.limit_signal.store(true, Ordering::Release);
        }
    }

    #[inline]
    pub(crate) fn record_free(&self) {
        if self.counting.load(Ordering::Relaxed) {
            self.freed.fetch_add(1, Ordering::Relaxed);
        }
    }

    // ----- owner-side transitions -----

    pub(crate) fn start(&self) {
        let (allocated, freed) = self.raw_counts();
        self.epoch_allocated.store(allocated, Ordering::Relaxed);
        self.epoch_freed.store(freed, Ordering::Relaxed);
        self.peak.reset(live_of(allocated, freed));
        self.ever_started.store(true, Ordering::Relaxed);
        self.active.store(true, Ordering::Relaxed);
        self.sync_counting();
    }

    pub(crate) fn stop(&self) {
        self.active.store(false, Ordering::Relaxed);
        self.sync_counting();
    }

    /// Install the trip point for the current scope stack.
    ///
    /// With `recheck`, a live count already at or past the new trip point
    /// raises the signal immediately; used when a scope is popped and an
    /// outer scope may already be over budget.
    pub(crate) fn arm(&self, trip_at: i64, depth: usize, recheck: bool) {
        self.trip_at.store(trip_at, Ordering::Relaxed);
        self.scope_depth.store(depth, Ordering::Relaxed);
        self.sync_counting();
        if recheck && depth > 0 && self.raw_live() >= trip_at {
            self.limit_signal.store(true, Ordering::Release);
        }
    }

    fn sync_counting(&self) {
        let on = self.active.load(Ordering::Relaxed)
            || self.scope_depth.load(Ordering::Relaxed) > 0;
        self.counting.store(on, Ordering::Relaxed);
    }

    pub(crate) fn take_limit_signal(&self) -> bool {
        self.limit_signal.load(Ordering::Acquire) && self.limit_signal.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn raw_counts(&self) -> (u64, u64) {
        (
            self.allocated.load(Ordering::Relaxed),
            self.freed.load(Ordering::Relaxed),
        )
    }

    pub(crate) fn raw_live(&self) -> i64 {
        let (allocated, freed) = self.raw_counts();
        live_of(allocated, freed)
    }

    // ----- reads -----

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_counting(&self) -> bool {
        self.counting.load(Ordering::Relaxed)
    }

    pub fn has_started(&self) -> bool {
        self.ever_started.load(Ordering::Relaxed)
    }

    pub fn scope_depth(&self) -> usize {
        self.scope_depth.load(Ordering::Relaxed)
    }

    /// Allocations counted since the last `start()`.
    pub fn allocated(&self) -> u64 {
        self.allocated
            .load(Ordering::Relaxed)
            .wrapping_sub(self.epoch_allocated.load(Ordering::Relaxed))
    }

    /// Frees counted since the last `start()`.
    pub fn freed(&self) -> u64 {
        self.freed
            .load(Ordering::Relaxed)
            .wrapping_sub(self.epoch_freed.load(Ordering::Relaxed))
    }

    pub fn delta(&self) -> i64 {
        live_of(self.allocated(), self.freed())
    }

    /// Highest `delta` seen since the last `start()`.
    pub fn max_delta(&self) -> i64 {
        let epoch = live_of(
            self.epoch_allocated.load(Ordering::Relaxed),
            self.epoch_freed.load(Ordering::Relaxed),
        );
        self.peak.peak().wrapping_sub(epoch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ThreadState {
        ThreadState::new(ThreadKey::new(u64::MAX))
    }

    #[test]
    fn idle_state_ignores_events() {
        let s = state();
        s.record_alloc();
        s.record_free();
        assert_eq!(s.raw_counts(), (0, 0));
        assert!(!s.has_started());
    }

    #[test]
    fn restart_moves_the_epoch_not_the_raw_counters() {
        let s = state();
        s.start();
        for _ in 0..5 {
            s.record_alloc();
        }
        s.record_free();
        assert_eq!((s.allocated(), s.freed(), s.delta()), (5, 1, 4));
        assert_eq!(s.max_delta(), 5);

        s.start();
        assert_eq!((s.allocated(), s.freed(), s.delta()), (0, 0, 0));
        assert_eq!(s.max_delta(), 0);
        assert_eq!(s.raw_counts(), (5, 1));
    }

    #[test]
    fn stop_freezes_reported_counts() {
        let s = state();
        s.start();
        s.record_alloc();
        s.stop();
        s.record_alloc();
        assert_eq!(s.allocated(), 1);
        assert!(!s.is_active());
        assert!(s.has_started());
    }

    #[test]
    fn armed_scope_keeps_counting_after_stop() {
        let s = state();
        s.start();
        s.arm(3, 1, false);
        s.stop();
        assert!(s.is_counting());
        s.record_alloc();
        s.record_alloc();
        assert!(!s.take_limit_signal());
        s.record_alloc();
        assert!(s.take_limit_signal());
        assert!(!s.take_limit_signal());
    }

    #[test]
    fn recheck_on_rearm_raises_signal_when_already_past() {
        let s = state();
        s.start();
        for _ in 0..4 {
            s.record_alloc();
        }
        s.arm(2, 1, true);
        assert!(s.take_limit_signal());
        s.arm(DISARMED, 0, true);
        assert!(!s.take_limit_signal());
    }

    #[test]
    fn frees_are_counted_even_past_the_same_window() {
        let s = state();
        s.start();
        s.record_free();
        s.record_free();
        assert_eq!(s.delta(), -2);
    }
}
