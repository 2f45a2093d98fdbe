//! The job entity and its state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{DomainError, DomainResult};
use crate::id::{JobId, OwnerId};
use crate::retry::RetryPolicy;
use crate::tier::TierPolicy;

/// Submission priority. The ordinal feeds the admission score.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Urgent = 4,
}

impl Priority {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

/// Job execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Waiting in the admission pool
    Pending,
    /// Granted to a worker
    Processing,
    /// Failed, waiting out its backoff before re-entering the pool
    Retrying,
    /// Processor returned a result
    Completed,
    /// Retries exhausted or failure not retryable
    Failed,
    /// Cancelled while pending
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl core::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// Selection granted the job to a worker.
    Grant,
    /// The processor returned a result.
    Succeed,
    /// The processor failed. Non-retryable failures skip the retry budget.
    Fail { retryable: bool },
    /// The retry backoff has elapsed.
    BackoffElapsed,
    /// The owner cancelled the job.
    Cancel,
}

/// The job state machine as a pure function.
///
/// `retry_count` and `max_retries` are the values *before* the event is applied.
pub fn next_status(
    current: JobStatus,
    event: JobEvent,
    retry_count: u32,
    max_retries: u32,
) -> DomainResult<JobStatus> {
    use JobEvent as E;
    use JobStatus as S;

    let next = match (current, event) {
        (S::Pending, E::Grant) => S::Processing,
        (S::Processing, E::Succeed) => S::Completed,
        (S::Processing, E::Fail { retryable: true }) if retry_count < max_retries => S::Retrying,
        (S::Processing, E::Fail { .. }) => S::Failed,
        (S::Retrying, E::BackoffElapsed) => S::Pending,
        (S::Pending, E::Cancel) => S::Cancelled,
        (from, event) => return Err(DomainError::IllegalTransition { from, event }),
    };
    Ok(next)
}

/// A unit of background work.
///
/// Jobs are owned by the scheduler's job table; every mutation goes through
/// one of the transition methods below, which consult [`next_status`] first
/// and leave the job untouched when the transition is illegal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Submitting tenant/user
    pub owner_id: OwnerId,
    /// Processor routing key
    pub job_type: String,
    /// Opaque processor input
    pub payload: JsonValue,
    /// Serialized payload size, measured at enqueue
    pub payload_bytes: usize,
    pub priority: Priority,
    /// Key into the tier table, fixed at enqueue
    pub tier: String,
    pub status: JobStatus,
    /// Insertion order; FIFO tie-breaker among equal scores
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    /// First time the job was granted to a worker
    pub started_at: Option<DateTime<Utc>>,
    /// Set on COMPLETED and FAILED
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Number of times the job was granted to a worker
    pub attempts: u32,
    /// When a RETRYING job becomes eligible again
    pub retry_at: Option<DateTime<Utc>>,
    /// Most recent failure reason
    pub error_message: Option<String>,
    /// Processor output, set only on COMPLETED
    pub result: Option<JsonValue>,
}

impl Job {
    /// Create a new pending job.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        owner_id: OwnerId,
        job_type: impl Into<String>,
        payload: JsonValue,
        payload_bytes: usize,
        priority: Priority,
        tier: impl Into<String>,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: JobId::new(),
            owner_id,
            job_type: job_type.into(),
            payload,
            payload_bytes,
            priority,
            tier: tier.into(),
            status: JobStatus::Pending,
            sequence,
            created_at: now,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: RetryPolicy::default().max_retries,
            attempts: 0,
            retry_at: None,
            error_message: None,
            result: None,
        }
    }

    /// Override the retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Admission score: priority ordinal weighted by the tier multiplier.
    pub fn score(&self, policy: &TierPolicy) -> f64 {
        f64::from(self.priority.ordinal()) * policy.priority_multiplier
    }

    fn advance(&self, event: JobEvent) -> DomainResult<JobStatus> {
        next_status(self.status, event, self.retry_count, self.max_retries)
    }

    /// `PENDING -> PROCESSING`.
    pub fn grant(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        self.status = self.advance(JobEvent::Grant)?;
        self.attempts += 1;
        self.started_at.get_or_insert(now);
        Ok(())
    }

    /// `PROCESSING -> COMPLETED`.
    pub fn complete(&mut self, result: JsonValue, now: DateTime<Utc>) -> DomainResult<()> {
        self.status = self.advance(JobEvent::Succeed)?;
        self.completed_at = Some(now);
        self.result = Some(result);
        self.error_message = None;
        Ok(())
    }

    /// `PROCESSING -> RETRYING | FAILED`.
    ///
    /// Returns the resulting status. A retrying job gets `retry_at` set from
    /// the backoff policy using the incremented retry count.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        retryable: bool,
        backoff: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> DomainResult<JobStatus> {
        let next = self.advance(JobEvent::Fail { retryable })?;
        self.status = next;
        self.error_message = Some(error.into());

        match next {
            JobStatus::Retrying => {
                self.retry_count += 1;
                let delay = backoff.delay_for(self.retry_count);
                self.retry_at = Some(now + chrono::Duration::from_std(delay).unwrap_or_default());
            }
            _ => self.completed_at = Some(now),
        }
        Ok(next)
    }

    /// Whether a RETRYING job has waited out its backoff.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Retrying && self.retry_at.is_none_or(|at| at <= now)
    }

    /// `RETRYING -> PENDING`.
    pub fn release(&mut self) -> DomainResult<()> {
        self.status = self.advance(JobEvent::BackoffElapsed)?;
        self.retry_at = None;
        Ok(())
    }

    /// `PENDING -> CANCELLED`.
    pub fn cancel(&mut self) -> DomainResult<()> {
        self.status = self.advance(JobEvent::Cancel)?;
        Ok(())
    }

    /// The instant retention is measured from, for terminal jobs.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match self.status {
            JobStatus::Cancelled => Some(self.created_at),
            JobStatus::Completed | JobStatus::Failed => self.completed_at,
            _ => None,
        }
    }

    /// Terminal and older than the retention window.
    pub fn is_expired(&self, now: DateTime<Utc>, retention: chrono::Duration) -> bool {
        self.finished_at().is_some_and(|at| now - at > retention)
    }
}

/// Read-only view of a job handed out to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub owner_id: OwnerId,
    pub job_type: String,
    pub priority: Priority,
    pub tier: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub result: Option<JsonValue>,
}

impl From<&Job> for JobSnapshot {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            owner_id: job.owner_id,
            job_type: job.job_type.clone(),
            priority: job.priority,
            tier: job.tier.clone(),
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            attempts: job.attempts,
            error_message: job.error_message.clone(),
            result: job.result.clone(),
        }
    }
}
