//! # Frame Budget
//!
//! Wall-clock ceiling for one slice of time-sliced bulk work.
//!
//! ## Design
//!
//! Bulk operations call [`FrameBudget::exhausted`] *between* items. An item
//! that has started always finishes, so a slice processes at least one item
//! and a stream is never split mid-item.

use std::time::{Duration, Instant};

/// Outcome of one time-sliced step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Progress {
    /// Work remains; step again next frame.
    Continue,
    /// The operation has completed.
    Done,
}

impl Progress {
    /// Returns true once the operation has completed.
    #[inline]
    #[must_use]
    pub const fn is_done(self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Time budget for the current frame's slice of work.
#[derive(Clone, Copy, Debug)]
pub struct FrameBudget {
    started: Instant,
    limit: Option<Duration>,
    items: u64,
}

impl FrameBudget {
    /// Starts a budget that expires `limit` after now.
    ///
    /// A zero limit still allows one item per slice.
    #[must_use]
    pub fn new(limit: Duration) -> Self {
        Self {
            started: Instant::now(),
            limit: Some(limit),
            items: 0,
        }
    }

    /// Starts a budget of `millis` milliseconds.
    #[must_use]
    pub fn from_millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }

    /// A budget that never expires (single-pass processing).
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            limit: None,
            items: 0,
        }
    }

    /// Returns true when no further item may start in this slice.
    #[inline]
    #[must_use]
    pub fn exhausted(&self) -> bool {
        match self.limit {
            Some(limit) => self.items > 0 && self.started.elapsed() >= limit,
            None => false,
        }
    }

    /// Records that one item finished.
    #[inline]
    pub fn record_item(&mut self) {
        self.items += 1;
    }

    /// Returns the number of items finished in this slice.
    #[inline]
    #[must_use]
    pub const fn items(&self) -> u64 {
        self.items
    }

    /// Returns the time elapsed since the slice started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_allows_one_item() {
        let mut budget = FrameBudget::new(Duration::ZERO);
        assert!(!budget.exhausted());
        budget.record_item();
        assert!(budget.exhausted());
        assert_eq!(budget.items(), 1);
    }

    #[test]
    fn test_unbounded_never_exhausts() {
        let mut budget = FrameBudget::unbounded();
        for _ in 0..10_000 {
            budget.record_item();
        }
        assert!(!budget.exhausted());
    }

    #[test]
    fn test_progress_done() {
        assert!(Progress::Done.is_done());
        assert!(!Progress::Continue.is_done());
    }
}
