// src/engine/mod.rs

//! Scheduler loop for expflow.
//!
//! The pure state machine lives in [`core`]: it owns the job graph, the
//! package table and the active configuration, and turns observations into
//! status transitions. The async shell in [`runtime`] talks to platforms,
//! persists state, sends notifications and sleeps between iterations.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::dag::Transition;
use crate::types::JobName;

pub mod core;
pub mod runtime;

pub use core::SchedulerCore;
pub use runtime::SchedulerLoop;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing left to do and nothing failed for good.
    Completed,
    /// Nothing left to do, but these jobs ran out of retrials.
    Failed(Vec<JobName>),
    /// Stopped by the operator; state was persisted.
    Cancelled,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::Failed(_) => 1,
            RunOutcome::Cancelled => 2,
        }
    }
}

/// Counters collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Loop iterations started (the priming pass is not counted).
    pub iterations: u64,
    /// Packages accepted by a platform.
    pub submissions: usize,
    /// Packages refused by a platform for a non-transient reason.
    pub submission_failures: usize,
    /// Every applied status change, in order.
    pub transitions: Vec<Transition>,
}

impl RunReport {
    pub fn record(&mut self, transitions: &[Transition]) {
        self.transitions.extend_from_slice(transitions);
    }

    /// Number of transitions recorded per job.
    pub fn transitions_per_job(&self) -> BTreeMap<JobName, usize> {
        let mut counts = BTreeMap::new();
        for t in self.transitions.iter() {
            *counts.entry(t.job.clone()).or_insert(0) += 1;
        }
        counts
    }
}

/// Outcome plus report, returned by [`SchedulerLoop::run`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub report: RunReport,
}

/// Result of a single loop iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationResult {
    Continue,
    Finished(RunOutcome),
}

/// Retry count handed to `get_completed_files`.
pub const COMPLETED_FILE_RETRIES: u32 = 3;

/// Loop timing, taken from `[experiment]` on every reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTiming {
    pub safety_sleep: Duration,
    pub wrapper_check: Duration,
}
