//! Scheduler statistics.

use std::collections::BTreeMap;

use serde::Serialize;
use taskhive_core::JobStatus;

/// Jobs currently in the table, by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub(crate) fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Processing => self.processing += 1,
            JobStatus::Retrying => self.retrying += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.processing
            + self.retrying
            + self.completed
            + self.failed
            + self.cancelled
    }
}

/// Current load of one tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierLoad {
    pub pending: usize,
    pub processing: usize,
    pub max_concurrent: usize,
}

/// Lifetime counters; not reduced by cleanup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Totals {
    pub enqueued: u64,
    pub completed: u64,
    pub failed: u64,
    pub retried: u64,
    pub cancelled: u64,
    pub cleaned_up: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub jobs: StatusCounts,
    pub tiers: BTreeMap<String, TierLoad>,
    pub totals: Totals,
}
