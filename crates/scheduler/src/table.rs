//! The job table: owned job arena plus admission/selection and transitions.
//!
//! `JobTable` is plain data with no locking of its own. The scheduler wraps
//! it in a single mutex, which is what makes "select + mark PROCESSING" and
//! every other transition atomic with respect to concurrent workers.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::io;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use taskhive_core::{
    DomainError, Job, JobId, JobSnapshot, JobStatus, OwnerId, Priority, RetryPolicy, TierTable,
};

use crate::error::{ProcessorError, SchedulerError};
use crate::stats::{SchedulerStats, StatusCounts, TierLoad, Totals};

/// Error message recorded when a job's type has no registered processor.
pub const NO_PROCESSOR_MESSAGE: &str = "no processor registered for job_type";

/// A job submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub owner_id: OwnerId,
    pub job_type: String,
    pub payload: JsonValue,
    pub priority: Priority,
    pub tier: String,
    /// Per-job retry budget; the configured default when `None`
    pub max_retries: Option<u32>,
}

impl JobRequest {
    pub fn new(
        owner_id: OwnerId,
        job_type: impl Into<String>,
        payload: JsonValue,
        priority: Priority,
        tier: impl Into<String>,
    ) -> Self {
        Self {
            owner_id,
            job_type: job_type.into(),
            payload,
            priority,
            tier: tier.into(),
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// A job granted to a worker. The job is already `PROCESSING` in the table.
#[derive(Debug, Clone)]
pub struct Claim {
    pub job_id: JobId,
    pub job_type: String,
    pub tier: String,
    pub payload: JsonValue,
    /// 1-based execution attempt
    pub attempt: u32,
}

/// What a worker reports back after running a processor.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Succeeded(JsonValue),
    Failed { error: String, retryable: bool },
}

impl Outcome {
    /// No processor is registered for the job type; retrying cannot help.
    pub fn not_registered() -> Self {
        Self::Failed {
            error: NO_PROCESSOR_MESSAGE.to_string(),
            retryable: false,
        }
    }
}

impl From<Result<JsonValue, ProcessorError>> for Outcome {
    fn from(result: Result<JsonValue, ProcessorError>) -> Self {
        match result {
            Ok(value) => Self::Succeeded(value),
            Err(e) => Self::Failed {
                error: e.message,
                retryable: e.retryable,
            },
        }
    }
}

/// In-memory job arena keyed by job id.
#[derive(Debug)]
pub struct JobTable {
    tiers: TierTable,
    backoff: RetryPolicy,
    jobs: HashMap<JobId, Job>,
    next_sequence: u64,
    totals: Totals,
}

impl JobTable {
    pub fn new(tiers: TierTable, backoff: RetryPolicy) -> Self {
        Self {
            tiers,
            backoff,
            jobs: HashMap::new(),
            next_sequence: 0,
            totals: Totals::default(),
        }
    }

    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Validate and store a new `PENDING` job.
    ///
    /// Nothing is stored when validation fails.
    pub fn insert(
        &mut self,
        request: JobRequest,
        now: DateTime<Utc>,
    ) -> Result<JobId, SchedulerError> {
        let payload_bytes = serialized_len(&request.payload).map_err(SchedulerError::Validation)?;
        self.tiers
            .admit(&request.tier, payload_bytes)
            .map_err(SchedulerError::Validation)?;

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let job = Job::new(
            request.owner_id,
            request.job_type,
            request.payload,
            payload_bytes,
            request.priority,
            request.tier,
            sequence,
            now,
        )
        .with_max_retries(request.max_retries.unwrap_or(self.backoff.max_retries));

        let id = job.id;
        debug!(
            job_id = %id,
            job_type = %job.job_type,
            tier = %job.tier,
            priority = ?job.priority,
            payload_bytes,
            "job enqueued"
        );
        self.jobs.insert(id, job);
        self.totals.enqueued += 1;
        Ok(id)
    }

    /// Number of jobs of `tier` currently `PROCESSING`.
    pub fn processing_count(&self, tier: &str) -> usize {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Processing && j.tier == tier)
            .count()
    }

    /// Pick the next job to run without changing any state.
    ///
    /// Ranking is score descending, then insertion order ascending; the first
    /// ranked job whose tier is below its concurrency cap wins. Taking the
    /// best job among non-saturated tiers yields exactly that job without
    /// sorting the whole pool.
    pub fn select_candidate(&self) -> Option<JobId> {
        let mut processing: HashMap<&str, usize> = HashMap::new();
        for job in self.jobs.values() {
            if job.status == JobStatus::Processing {
                *processing.entry(job.tier.as_str()).or_default() += 1;
            }
        }

        let mut best: Option<(f64, u64, JobId)> = None;
        for job in self.jobs.values() {
            if job.status != JobStatus::Pending {
                continue;
            }
            // Tiers are fixed at construction and validated at enqueue.
            let Some(policy) = self.tiers.get(&job.tier) else {
                continue;
            };
            let running = processing.get(job.tier.as_str()).copied().unwrap_or(0);
            if running >= policy.max_concurrent {
                continue;
            }

            let candidate = (job.score(policy), job.sequence, job.id);
            let better = match &best {
                None => true,
                Some(current) => rank(&candidate, current) == Ordering::Less,
            };
            if better {
                best = Some(candidate);
            }
        }

        best.map(|(_, _, id)| id)
    }

    /// Promote due retries, then select and mark the next job `PROCESSING`.
    pub fn claim_next(&mut self, now: DateTime<Utc>) -> Option<Claim> {
        self.promote_due(now);

        let id = self.select_candidate()?;
        let job = self.jobs.get_mut(&id)?;
        if let Err(e) = job.grant(now) {
            error!(job_id = %id, error = %e, "selected job could not be granted");
            return None;
        }

        debug!(job_id = %id, tier = %job.tier, attempt = job.attempts, "job granted");
        Some(Claim {
            job_id: id,
            job_type: job.job_type.clone(),
            tier: job.tier.clone(),
            payload: job.payload.clone(),
            attempt: job.attempts,
        })
    }

    /// Move every `RETRYING` job whose backoff has elapsed back to `PENDING`.
    pub fn promote_due(&mut self, now: DateTime<Utc>) -> usize {
        let mut promoted = 0;
        for job in self.jobs.values_mut().filter(|j| j.is_due(now)) {
            match job.release() {
                Ok(()) => {
                    promoted += 1;
                    debug!(
                        job_id = %job.id,
                        retry_count = job.retry_count,
                        "retry re-entered pool"
                    );
                }
                Err(e) => error!(job_id = %job.id, error = %e, "failed to release retry"),
            }
        }
        promoted
    }

    /// Earliest instant at which a `RETRYING` job becomes due.
    pub fn next_retry_at(&self) -> Option<DateTime<Utc>> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Retrying)
            .filter_map(|j| j.retry_at)
            .min()
    }

    /// Apply a worker's outcome to a `PROCESSING` job.
    pub fn record_outcome(
        &mut self,
        job_id: JobId,
        outcome: Outcome,
        now: DateTime<Utc>,
    ) -> Result<JobStatus, SchedulerError> {
        let job = self
            .jobs
            .get_mut(&job_id)
            .ok_or(SchedulerError::NotFound(job_id))?;

        match outcome {
            Outcome::Succeeded(result) => {
                job.complete(result, now)?;
                self.totals.completed += 1;
                info!(job_id = %job_id, attempt = job.attempts, "job completed");
                Ok(JobStatus::Completed)
            }
            Outcome::Failed { error, retryable } => {
                let status = job.fail(error, retryable, &self.backoff, now)?;
                let reason = job.error_message.as_deref().unwrap_or_default();
                if status == JobStatus::Retrying {
                    self.totals.retried += 1;
                    warn!(
                        job_id = %job_id,
                        retry_count = job.retry_count,
                        max_retries = job.max_retries,
                        error = %reason,
                        "job failed; retry scheduled"
                    );
                } else {
                    self.totals.failed += 1;
                    warn!(job_id = %job_id, attempts = job.attempts, error = %reason, "job failed");
                }
                Ok(status)
            }
        }
    }

    /// Cancel a `PENDING` job owned by `owner_id`.
    ///
    /// Returns `false` for unknown jobs, foreign jobs and any non-pending
    /// status; running jobs cannot be cancelled.
    pub fn cancel(&mut self, job_id: JobId, owner_id: OwnerId) -> bool {
        let Some(job) = self.jobs.get_mut(&job_id) else {
            return false;
        };
        if job.owner_id != owner_id {
            return false;
        }
        match job.cancel() {
            Ok(()) => {
                self.totals.cancelled += 1;
                info!(job_id = %job_id, "job cancelled");
                true
            }
            Err(DomainError::IllegalTransition { from, .. }) => {
                debug!(job_id = %job_id, status = %from, "cancel rejected");
                false
            }
            Err(_) => false,
        }
    }

    pub fn get(&self, job_id: JobId) -> Option<JobSnapshot> {
        self.jobs.get(&job_id).map(JobSnapshot::from)
    }

    /// Owner-checked lookup.
    pub fn get_for_owner(
        &self,
        job_id: JobId,
        owner_id: OwnerId,
    ) -> Result<JobSnapshot, SchedulerError> {
        match self.jobs.get(&job_id) {
            Some(job) if job.owner_id == owner_id => Ok(JobSnapshot::from(job)),
            Some(_) => Err(SchedulerError::OwnerMismatch(job_id)),
            None => Err(SchedulerError::NotFound(job_id)),
        }
    }

    /// An owner's jobs, most recently enqueued first.
    pub fn list(&self, owner_id: OwnerId, limit: usize) -> Vec<JobSnapshot> {
        let mut jobs: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| j.owner_id == owner_id)
            .collect();
        jobs.sort_by(|a, b| b.sequence.cmp(&a.sequence));
        jobs.into_iter().take(limit).map(JobSnapshot::from).collect()
    }

    /// Remove terminal jobs older than `retention`; returns how many were removed.
    pub fn sweep(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.is_expired(now, retention));
        let removed = before - self.jobs.len();
        self.totals.cleaned_up += removed as u64;
        removed
    }

    pub fn stats(&self) -> SchedulerStats {
        let mut stats = SchedulerStats {
            totals: self.totals,
            ..Default::default()
        };
        for (name, policy) in self.tiers.iter() {
            stats.tiers.insert(
                name.to_string(),
                TierLoad {
                    max_concurrent: policy.max_concurrent,
                    ..Default::default()
                },
            );
        }

        let mut jobs = StatusCounts::default();
        for job in self.jobs.values() {
            jobs.record(job.status);
            if let Some(load) = stats.tiers.get_mut(&job.tier) {
                match job.status {
                    JobStatus::Pending => load.pending += 1,
                    JobStatus::Processing => load.processing += 1,
                    _ => {}
                }
            }
        }
        stats.jobs = jobs;
        stats
    }
}

/// Orders `(score, sequence, _)` so that the preferred job sorts first.
fn rank(a: &(f64, u64, JobId), b: &(f64, u64, JobId)) -> Ordering {
    b.0.total_cmp(&a.0).then(a.1.cmp(&b.1))
}

/// Serialized JSON size, measured without buffering the output.
fn serialized_len(payload: &JsonValue) -> Result<usize, DomainError> {
    struct Counter(usize);

    impl io::Write for Counter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0 += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    let mut counter = Counter(0);
    serde_json::to_writer(&mut counter, payload)
        .map_err(|e| DomainError::validation(format!("payload is not serializable: {e}")))?;
    Ok(counter.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use taskhive_core::TierPolicy;

    fn tiers() -> TierTable {
        TierTable::new([
            ("free".to_string(), TierPolicy::new(1, 10_000_000, 1.0)),
            ("pro".to_string(), TierPolicy::new(2, 50_000_000, 2.0)),
            ("frozen".to_string(), TierPolicy::new(0, 1_000, 1.0)),
        ])
        .unwrap()
    }

    fn table() -> JobTable {
        JobTable::new(
            tiers(),
            RetryPolicy::exponential(3, Duration::from_millis(10), Duration::from_secs(1)),
        )
    }

    fn request(owner: OwnerId, priority: Priority, tier: &str) -> JobRequest {
        JobRequest::new(owner, "extract", serde_json::json!({"doc": 1}), priority, tier)
    }

    #[test]
    fn oversized_payload_is_rejected_and_not_stored() {
        let mut table = table();
        let payload = JsonValue::String("x".repeat(11_000_000));
        let req = JobRequest::new(OwnerId::new(), "parse", payload, Priority::Normal, "free");

        let err = table.insert(req, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            SchedulerError::Validation(DomainError::PayloadTooLarge { .. })
        ));
        assert!(table.is_empty());
        assert_eq!(table.stats().totals.enqueued, 0);
    }

    #[test]
    fn unknown_tier_is_rejected() {
        let mut table = table();
        let err = table
            .insert(request(OwnerId::new(), Priority::Low, "gold"), Utc::now())
            .unwrap_err();
        assert!(matches!(err, SchedulerError::Validation(DomainError::UnknownTier(_))));
        assert!(table.is_empty());
    }

    #[test]
    fn higher_priority_wins_within_a_tier() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        let _low = table.insert(request(owner, Priority::Low, "free"), now).unwrap();
        let high = table.insert(request(owner, Priority::High, "free"), now).unwrap();

        assert_eq!(table.select_candidate(), Some(high));
        let claim = table.claim_next(now).unwrap();
        assert_eq!(claim.job_id, high);
        assert_eq!(claim.attempt, 1);

        // free allows one concurrent job
        assert!(table.claim_next(now).is_none());
    }

    #[test]
    fn equal_scores_are_served_in_insertion_order() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        let ids: Vec<_> = (0..3)
            .map(|_| table.insert(request(owner, Priority::Normal, "pro"), now).unwrap())
            .collect();

        assert_eq!(table.claim_next(now).unwrap().job_id, ids[0]);
        assert_eq!(table.claim_next(now).unwrap().job_id, ids[1]);
    }

    #[test]
    fn tier_multiplier_outranks_raw_priority() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        // free HIGH scores 3.0, pro NORMAL scores 4.0
        let _free = table.insert(request(owner, Priority::High, "free"), now).unwrap();
        let pro = table.insert(request(owner, Priority::Normal, "pro"), now).unwrap();

        assert_eq!(table.select_candidate(), Some(pro));
    }

    #[test]
    fn saturated_tier_does_not_block_other_tiers() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        for _ in 0..3 {
            table.insert(request(owner, Priority::Urgent, "pro"), now).unwrap();
        }
        let free = table.insert(request(owner, Priority::Low, "free"), now).unwrap();

        table.claim_next(now).unwrap();
        table.claim_next(now).unwrap();
        assert_eq!(table.processing_count("pro"), 2);

        assert_eq!(table.claim_next(now).unwrap().job_id, free);
        assert!(table.claim_next(now).is_none());
    }

    #[test]
    fn zero_capacity_tier_is_never_selected() {
        let mut table = table();
        let now = Utc::now();
        table.insert(request(OwnerId::new(), Priority::Urgent, "frozen"), now).unwrap();
        assert!(table.claim_next(now).is_none());
    }

    #[test]
    fn completion_frees_capacity() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        let first = table.insert(request(owner, Priority::Normal, "free"), now).unwrap();
        let second = table.insert(request(owner, Priority::Normal, "free"), now).unwrap();

        table.claim_next(now).unwrap();
        assert!(table.claim_next(now).is_none());

        let status = table
            .record_outcome(first, Outcome::Succeeded(serde_json::json!("ok")), now)
            .unwrap();
        assert_eq!(status, JobStatus::Completed);
        assert_eq!(table.claim_next(now).unwrap().job_id, second);
    }

    #[test]
    fn retries_wait_for_backoff_then_exhaust() {
        let mut table = table();
        let now = Utc::now();
        let id = table
            .insert(request(OwnerId::new(), Priority::Normal, "free"), now)
            .unwrap();

        let mut clock = now;
        let mut attempts = 0;
        loop {
            let Some(claim) = table.claim_next(clock) else {
                panic!("job should be claimable once its backoff elapsed");
            };
            attempts += 1;
            let status = table
                .record_outcome(
                    claim.job_id,
                    Outcome::Failed {
                        error: format!("attempt {attempts} failed"),
                        retryable: true,
                    },
                    clock,
                )
                .unwrap();
            if status == JobStatus::Failed {
                break;
            }

            assert!(table.claim_next(clock).is_none(), "still backing off");
            clock = table.next_retry_at().unwrap();
        }

        let job = table.get(id).unwrap();
        assert_eq!(attempts, 4);
        assert_eq!(job.attempts, 4);
        assert_eq!(job.retry_count, 3);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("attempt 4 failed"));
        assert!(job.completed_at.is_some());

        let totals = table.stats().totals;
        assert_eq!(totals.retried, 3);
        assert_eq!(totals.failed, 1);
    }

    #[test]
    fn missing_processor_fails_without_retry() {
        let mut table = table();
        let now = Utc::now();
        let id = table
            .insert(request(OwnerId::new(), Priority::Normal, "free"), now)
            .unwrap();
        table.claim_next(now).unwrap();

        let status = table.record_outcome(id, Outcome::not_registered(), now).unwrap();
        assert_eq!(status, JobStatus::Failed);

        let job = table.get(id).unwrap();
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.error_message.as_deref(), Some(NO_PROCESSOR_MESSAGE));
    }

    #[test]
    fn outcome_for_unknown_or_idle_job_is_an_error() {
        let mut table = table();
        let now = Utc::now();
        let ok = Outcome::Succeeded(JsonValue::Null);

        assert!(matches!(
            table.record_outcome(JobId::new(), ok.clone(), now),
            Err(SchedulerError::NotFound(_))
        ));

        let id = table
            .insert(request(OwnerId::new(), Priority::Normal, "free"), now)
            .unwrap();
        assert!(matches!(
            table.record_outcome(id, ok, now),
            Err(SchedulerError::Domain(DomainError::IllegalTransition { .. }))
        ));
        assert_eq!(table.get(id).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn cancel_only_applies_to_own_pending_jobs() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        let running = table.insert(request(owner, Priority::Urgent, "free"), now).unwrap();
        let waiting = table.insert(request(owner, Priority::Low, "free"), now).unwrap();
        table.claim_next(now).unwrap();

        assert!(!table.cancel(waiting, OwnerId::new()));
        assert!(!table.cancel(running, owner));
        assert!(!table.cancel(JobId::new(), owner));
        assert!(table.cancel(waiting, owner));
        assert!(!table.cancel(waiting, owner), "already cancelled");

        assert_eq!(table.get(running).unwrap().status, JobStatus::Processing);
        assert_eq!(table.get(waiting).unwrap().status, JobStatus::Cancelled);

        table
            .record_outcome(running, Outcome::Succeeded(JsonValue::Null), now)
            .unwrap();
        assert!(table.claim_next(now).is_none(), "cancelled jobs are never selected");
    }

    #[test]
    fn sweep_removes_expired_terminal_jobs_only() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        let retention = Duration::from_secs(24 * 60 * 60);

        let done = table.insert(request(owner, Priority::Urgent, "pro"), now).unwrap();
        let cancelled = table.insert(request(owner, Priority::Low, "free"), now).unwrap();
        let _pending = table.insert(request(owner, Priority::Low, "pro"), now).unwrap();
        table.claim_next(now).unwrap();
        table
            .record_outcome(done, Outcome::Succeeded(JsonValue::Null), now)
            .unwrap();
        assert!(table.cancel(cancelled, owner));

        assert_eq!(table.sweep(now + chrono::Duration::hours(23), retention), 0);

        let later = now + chrono::Duration::hours(25);
        assert_eq!(table.sweep(later, retention), 2);
        assert_eq!(table.sweep(later, retention), 0);
        assert_eq!(table.len(), 1);
        assert!(table.get(done).is_none());
        assert_eq!(table.stats().totals.cleaned_up, 2);
    }

    #[test]
    fn list_is_most_recent_first_and_owner_scoped() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        let ids: Vec<_> = (0..4)
            .map(|_| table.insert(request(owner, Priority::Normal, "pro"), now).unwrap())
            .collect();
        table.insert(request(OwnerId::new(), Priority::Normal, "pro"), now).unwrap();

        let listed: Vec<_> = table.list(owner, 3).into_iter().map(|s| s.id).collect();
        assert_eq!(listed, vec![ids[3], ids[2], ids[1]]);
        assert_eq!(table.list(owner, 10).len(), 4);
    }

    #[test]
    fn owner_checked_lookup() {
        let mut table = table();
        let owner = OwnerId::new();
        let id = table.insert(request(owner, Priority::Normal, "pro"), Utc::now()).unwrap();

        assert!(table.get_for_owner(id, owner).is_ok());
        assert!(matches!(
            table.get_for_owner(id, OwnerId::new()),
            Err(SchedulerError::OwnerMismatch(_))
        ));
        assert!(matches!(
            table.get_for_owner(JobId::new(), owner),
            Err(SchedulerError::NotFound(_))
        ));
    }

    #[test]
    fn stats_report_tier_load() {
        let mut table = table();
        let owner = OwnerId::new();
        let now = Utc::now();
        for _ in 0..3 {
            table.insert(request(owner, Priority::Normal, "pro"), now).unwrap();
        }
        table.claim_next(now).unwrap();
        table.claim_next(now).unwrap();

        let stats = table.stats();
        assert_eq!(stats.jobs.pending, 1);
        assert_eq!(stats.jobs.processing, 2);
        assert_eq!(stats.jobs.total(), 3);
        assert_eq!(
            stats.tiers["pro"],
            TierLoad {
                pending: 1,
                processing: 2,
                max_concurrent: 2
            }
        );
        assert_eq!(stats.tiers["free"].processing, 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Enqueue { tier: usize, priority: usize },
        Claim,
        Finish { pick: usize, succeed: bool },
        Advance,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, 0usize..4).prop_map(|(tier, priority)| Op::Enqueue { tier, priority }),
            Just(Op::Claim),
            (any::<usize>(), any::<bool>())
                .prop_map(|(pick, succeed)| Op::Finish { pick, succeed }),
            Just(Op::Advance),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no interleaving of enqueues, claims, outcomes and clock
        /// advances ever puts a tier above its concurrency cap.
        #[test]
        fn tier_caps_always_hold(ops in prop::collection::vec(op(), 1..80)) {
            const TIERS: [&str; 3] = ["free", "pro", "frozen"];
            const PRIORITIES: [Priority; 4] =
                [Priority::Low, Priority::Normal, Priority::High, Priority::Urgent];

            let mut table = table();
            let owner = OwnerId::new();
            let mut clock = Utc::now();
            let mut running: Vec<JobId> = Vec::new();

            for op in ops {
                match op {
                    Op::Enqueue { tier, priority } => {
                        let req = request(owner, PRIORITIES[priority], TIERS[tier]);
                        table.insert(req, clock).unwrap();
                    }
                    Op::Claim => {
                        if let Some(claim) = table.claim_next(clock) {
                            running.push(claim.job_id);
                        }
                    }
                    Op::Finish { pick, succeed } => {
                        if !running.is_empty() {
                            let id = running.swap_remove(pick % running.len());
                            let outcome = if succeed {
                                Outcome::Succeeded(JsonValue::Null)
                            } else {
                                Outcome::Failed { error: "boom".to_string(), retryable: true }
                            };
                            table.record_outcome(id, outcome, clock).unwrap();
                        }
                    }
                    Op::Advance => clock += chrono::Duration::seconds(2),
                }

                for (name, policy) in table.tiers().iter() {
                    prop_assert!(table.processing_count(name) <= policy.max_concurrent);
                }
            }
        }
    }
}
