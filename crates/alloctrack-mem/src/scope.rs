//! Per-thread stack of nested `limit` scopes.
//!
//! Owned exclusively by its thread; other threads only ever see a scope through
//! its [`AbortHandle`](crate::AbortHandle). Every scope is accounted against
//! the thread's raw counters from its own baseline, so nested scopes are
//! enforced independently of each other and of `start`/`stop`.

use std::cell::RefCell;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use alloctrack_core::ScopeId;

use crate::state::DISARMED;

#[derive(Debug)]
pub struct LimitScope {
    pub id: ScopeId,
    pub threshold: u64,
    pub baseline_allocated: u64,
    pub baseline_freed: u64,
    /// Cleared when the scope is popped; shared with abort handles.
    pub(crate) open: Arc<AtomicBool>,
}

impl LimitScope {
    pub(crate) fn new(
        threshold: u64,
        baseline_allocated: u64,
        baseline_freed: u64,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: ScopeId::next(),
            threshold,
            baseline_allocated,
            baseline_freed,
            open,
        }
    }

    fn baseline_live(&self) -> i64 {
        self.baseline_allocated.wrapping_sub(self.baseline_freed) as i64
    }

    fn threshold_i64(&self) -> i64 {
        i64::try_from(self.threshold).unwrap_or(i64::MAX)
    }

    /// Net live allocations made inside this scope, given the thread's raw live count.
    pub fn live(&self, raw_live: i64) -> i64 {
        raw_live.wrapping_sub(self.baseline_live())
    }

    /// Raw live count at which this scope should be re-examined.
    fn trip_point(&self) -> i64 {
        self.baseline_live().saturating_add(self.threshold_i64())
    }

    pub fn is_exceeded(&self, raw_live: i64) -> bool {
        self.live(raw_live) > self.threshold_i64()
    }
}

/// A scope found over budget: which one, its threshold, and what it held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breach {
    pub scope: ScopeId,
    pub threshold: u64,
    pub live: i64,
}

#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<LimitScope>,
}

impl ScopeStack {
    pub const fn new() -> Self {
        Self { scopes: Vec::new() }
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    pub fn push(&mut self, scope: LimitScope) {
        self.scopes.push(scope);
    }

    /// Remove `id`. Guards unwind in LIFO order, so this is the innermost
    /// scope in practice.
    pub fn remove(&mut self, id: ScopeId) -> Option<LimitScope> {
        let pos = self.position(id)?;
        Some(self.scopes.remove(pos))
    }

    pub fn position(&self, id: ScopeId) -> Option<usize> {
        self.scopes.iter().rposition(|s| s.id == id)
    }

    pub fn get(&self, id: ScopeId) -> Option<&LimitScope> {
        self.position(id).map(|pos| &self.scopes[pos])
    }

    pub fn innermost(&self) -> Option<&LimitScope> {
        self.scopes.last()
    }

    /// Minimum trip point over all scopes.
    pub fn trip_point(&self) -> i64 {
        self.scopes
            .iter()
            .map(LimitScope::trip_point)
            .min()
            .unwrap_or(DISARMED)
    }

    /// The innermost scope whose live count exceeds its threshold.
    pub fn innermost_exceeded(&self, raw_live: i64) -> Option<Breach> {
        self.scopes
            .iter()
            .rev()
            .find(|s| s.is_exceeded(raw_live))
            .map(|s| Breach {
                scope: s.id,
                threshold: s.threshold,
                live: s.live(raw_live),
            })
    }
}

thread_local! {
    static SCOPES: RefCell<ScopeStack> = const { RefCell::new(ScopeStack::new()) };
}

pub(crate) fn with_scopes<R>(f: impl FnOnce(&ScopeStack) -> R) -> R {
    SCOPES.with(|s| f(&s.borrow()))
}

pub(crate) fn with_scopes_mut<R>(f: impl FnOnce(&mut ScopeStack) -> R) -> R {
    SCOPES.with(|s| f(&mut s.borrow_mut()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope(threshold: u64, allocated: u64, freed: u64) -> LimitScope {
        LimitScope::new(threshold, allocated, freed, Arc::new(AtomicBool::new(true)))
    }

    #[test]
    fn empty_stack_is_disarmed() {
        let stack = ScopeStack::new();
        assert_eq!(stack.trip_point(), DISARMED);
        assert!(stack.innermost_exceeded(i64::MAX - 1).is_none());
    }

    #[test]
    fn trip_point_is_the_tightest_scope() {
        let mut stack = ScopeStack::new();
        stack.push(scope(100, 10, 0)); // trips at 110
        stack.push(scope(50, 40, 0)); // trips at 90
        stack.push(scope(500, 60, 20)); // trips at 540
        assert_eq!(stack.trip_point(), 90);
    }

    #[test]
    fn reaching_threshold_is_not_exceeding_it() {
        let s = scope(10, 5, 0);
        assert_eq!(s.live(15), 10);
        assert!(!s.is_exceeded(15));
        assert!(s.is_exceeded(16));
    }

    #[test]
    fn innermost_breach_wins() {
        let mut stack = ScopeStack::new();
        let outer = scope(5, 0, 0);
        let inner = scope(5, 2, 0);
        let (outer_id, inner_id) = (outer.id, inner.id);
        stack.push(outer);
        stack.push(inner);

        // raw live 7: outer holds 7 (> 5), inner holds 5 (not > 5)
        let breach = stack.innermost_exceeded(7).unwrap();
        assert_eq!(breach.scope, outer_id);
        assert_eq!(breach.live, 7);

        let breach = stack.innermost_exceeded(8).unwrap();
        assert_eq!(breach.scope, inner_id);
        assert_eq!(breach.live, 6);
    }

    #[test]
    fn remove_pops_by_identity() {
        let mut stack = ScopeStack::new();
        let a = scope(1, 0, 0);
        let b = scope(1, 0, 0);
        let (a_id, b_id) = (a.id, b.id);
        stack.push(a);
        stack.push(b);
        assert_eq!(stack.remove(b_id).map(|s| s.id), Some(b_id));
        assert!(stack.remove(b_id).is_none());
        assert_eq!(stack.innermost().map(|s| s.id), Some(a_id));
    }

    #[test]
    fn huge_thresholds_saturate() {
        let s = scope(u64::MAX, 3, 0);
        assert_eq!(s.trip_point(), i64::MAX);
        assert!(!s.is_exceeded(i64::MAX));
    }
}
