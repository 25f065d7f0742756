mod engine;
mod error;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

pub(crate) use engine::Engine;
pub(crate) use error::OptimizeError;

#[derive(Debug, Clone, Copy)]
pub(crate) struct SearchParams {
    /// Maximum number of evaluation calls (config on split) in one run.
    pub(crate) budget: usize,
    pub(crate) instruction_candidates: usize,
    pub(crate) demo_set_candidates: usize,
    pub(crate) max_demos: usize,
    pub(crate) minibatch_size: usize,
    pub(crate) seed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OptimizeStatus {
    /// The new program scored strictly higher than its parent.
    Improved,
    /// Search completed, but the best candidate did not beat the parent. The
    /// program is persisted anyway for audit; adoption is the caller's call.
    NoImprovement,
    /// The run was cancelled; the result is the best configuration fully
    /// evaluated before the cancellation point.
    Cancelled,
}

#[derive(Debug, Clone)]
pub(crate) struct OptimizeOutcome {
    pub(crate) program_id: i64,
    pub(crate) score: f64,
    pub(crate) status: OptimizeStatus,
    /// True when candidate generation fell back to seed-only candidates
    /// because the teacher model was unreachable.
    pub(crate) degraded: bool,
    pub(crate) trials_used: usize,
}

impl OptimizeOutcome {
    pub(crate) fn improved(&self) -> bool {
        self.status == OptimizeStatus::Improved
    }
}

/// Cooperative cancellation shared between the caller and a running search.
/// Checked at round boundaries; a cancelled run still persists its best
/// result atomically.
#[derive(Debug, Clone, Default)]
pub(crate) struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
