//! High-water tracking for a thread's live allocation count.
//!
//! Runs on every counted allocation, so it is a single relaxed load in the
//! common case and a CAS loop only when a new peak is set.

use std::sync::atomic::{AtomicI64, Ordering};

#[derive(Debug)]
pub struct PeakTracker {
    peak: AtomicI64,
}

impl Default for PeakTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PeakTracker {
    pub const fn new() -> Self {
        Self {
            peak: AtomicI64::new(0),
        }
    }

    /// Record a new live count; updates the peak if higher.
    #[inline]
    pub fn record(&self, live: i64) {
        let mut cur = self.peak.load(Ordering::Relaxed);
        while live > cur {
            match self
                .peak
                .compare_exchange_weak(cur, live, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    /// Forget the previous peak and restart from `live`.
    pub fn reset(&self, live: i64) {
        self.peak.store(live, Ordering::Relaxed);
    }

    pub fn peak(&self) -> i64 {
        self.peak.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_the_highest_value() {
        let t = PeakTracker::new();
        t.record(3);
        t.record(7);
        t.record(5);
        assert_eq!(t.peak(), 7);
        t.reset(-2);
        assert_eq!(t.peak(), -2);
        t.record(-5);
        assert_eq!(t.peak(), -2);
    }

    #[test]
    fn concurrent_records_agree_on_max() {
        let t = std::sync::Arc::new(PeakTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let t = t.clone();
                std::thread::spawn(move || {
                    for v in 0..1000 {
                        t.record(v * 8 + i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(t.peak(), 999 * 8 + 7);
    }
}
