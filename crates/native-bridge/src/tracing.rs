//! Structured tracing for verification runs and handle transitions.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{span, Level};

/// Stable identifier for one verification run.
///
/// Correlates every event emitted during a run. Monotonically increasing,
/// starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunId(pub u64);

static NEXT_RUN_ID: AtomicU64 = AtomicU64::new(1);

/// Generate the next unique run ID.
pub fn next_run_id() -> RunId {
    RunId(NEXT_RUN_ID.fetch_add(1, Ordering::Relaxed))
}

/// Create a span covering one verification run.
pub fn trace_verify_run(
    procedure: &'static str,
    factory: &'static str,
    iterations: usize,
    run_id: RunId,
) -> span::EnteredSpan {
    span!(
        Level::DEBUG,
        "reuse_verify",
        procedure,
        factory,
        iterations,
        run_id = run_id.0
    )
    .entered()
}
