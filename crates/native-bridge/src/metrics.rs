//! Lifecycle metrics.
//!
//! Counters are kept per thread. A verification run is single-threaded, so
//! the counters of the calling thread describe exactly the handles that run
//! touched.

use std::cell::Cell;

/// Snapshot of the lifecycle counters of the current thread.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifecycleMetrics {
    /// Handles created by wrapping a foreign pointer.
    pub wrapped: usize,
    /// Handles that gave up ownership.
    pub disowned: usize,
    /// Foreign destructors invoked through a handle.
    pub released: usize,
    /// `release()` calls on disowned handles, which do nothing.
    pub skipped_releases: usize,
    /// Attempts to release a handle a second time.
    pub double_releases: usize,
    /// Owned handles released by `Drop` instead of an explicit call.
    pub released_on_drop: usize,
    /// Verification runs that completed without a violation.
    pub runs_passed: usize,
    /// Verification runs that stopped at a violation.
    pub runs_failed: usize,
}

impl LifecycleMetrics {
    /// Create a new `LifecycleMetrics` with all counters at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            wrapped: 0,
            disowned: 0,
            released: 0,
            skipped_releases: 0,
            double_releases: 0,
            released_on_drop: 0,
            runs_passed: 0,
            runs_failed: 0,
        }
    }
}

thread_local! {
    static METRICS: Cell<LifecycleMetrics> = const { Cell::new(LifecycleMetrics::new()) };
}

/// Returns the lifecycle counters of the current thread.
#[must_use]
pub fn lifecycle_metrics() -> LifecycleMetrics {
    METRICS.with(Cell::get)
}

/// Resets the lifecycle counters of the current thread to zero.
pub fn reset_lifecycle_metrics() {
    METRICS.with(|m| m.set(LifecycleMetrics::new()));
}

pub(crate) fn record(update: impl FnOnce(&mut LifecycleMetrics)) {
    METRICS.with(|m| {
        let mut metrics = m.get();
        update(&mut metrics);
        m.set(metrics);
    });
}
