//! Public scheduler façade and background lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, mpsc};
use std::thread;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::{error, info, warn};

use taskhive_core::{JobId, JobSnapshot, OwnerId, Priority, TierTable};

use crate::cleanup;
use crate::config::SchedulerConfig;
use crate::error::{ProcessorError, SchedulerError};
use crate::processor::ProcessorRegistry;
use crate::stats::SchedulerStats;
use crate::table::{Claim, JobRequest, JobTable, Outcome};
use crate::worker::Worker;

/// State shared between the façade, workers, executions and cleanup.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    table: Mutex<JobTable>,
    /// Signalled whenever work may have become available.
    changed: Condvar,
}

impl Shared {
    pub(crate) fn table(&self) -> MutexGuard<'_, JobTable> {
        lock(&self.table)
    }

    /// Wake every idle worker.
    ///
    /// The table lock is held while signalling, so a worker that has checked
    /// its stop flag but not yet started waiting cannot miss the wake-up.
    pub(crate) fn notify(&self) {
        let _table = self.table();
        self.changed.notify_all();
    }

    /// Block until a job is granted or `stopped` is set.
    ///
    /// The wait is bounded by the idle poll interval and by the earliest
    /// pending retry, so a due retry is picked up without an extra signal.
    pub(crate) fn wait_for_claim(&self, stopped: &AtomicBool) -> Option<Claim> {
        let idle = self.config.idle_poll_interval;
        let mut table = self.table();
        loop {
            if stopped.load(Ordering::Acquire) {
                return None;
            }

            let now = Utc::now();
            if let Some(claim) = table.claim_next(now) {
                return Some(claim);
            }

            let timeout = table
                .next_retry_at()
                .and_then(|at| (at - now).to_std().ok())
                .map_or(idle, |until_due| until_due.min(idle));
            table = match self.changed.wait_timeout(table, timeout) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Apply an execution outcome and wake idle workers.
    pub(crate) fn report(&self, job_id: JobId, outcome: Outcome) {
        let applied = self.table().record_outcome(job_id, outcome, Utc::now());
        match applied {
            Ok(_) => self.notify(),
            Err(e) => error!(job_id = %job_id, error = %e, "failed to record job outcome"),
        }
    }

    pub(crate) fn sweep(&self) -> usize {
        self.table().sweep(Utc::now(), self.config.retention)
    }
}

/// Lock, recovering the data if a previous holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned: PoisonError<_>| {
        warn!("scheduler lock poisoned; recovering");
        poisoned.into_inner()
    })
}

#[derive(Debug, Default)]
struct Lifecycle {
    registry: ProcessorRegistry,
    run: Option<RunState>,
}

/// Handles of one `start()`..`stop()` run.
#[derive(Debug)]
struct RunState {
    stopped: Arc<AtomicBool>,
    cleanup_shutdown: mpsc::Sender<()>,
    workers: Vec<thread::JoinHandle<()>>,
    cleanup: Option<thread::JoinHandle<()>>,
}

impl RunState {
    fn new(cleanup_shutdown: mpsc::Sender<()>) -> Self {
        Self {
            stopped: Arc::new(AtomicBool::new(false)),
            cleanup_shutdown,
            workers: Vec::new(),
            cleanup: None,
        }
    }

    /// Signal every loop and wait for it to exit.
    fn shutdown(mut self, shared: &Shared) {
        self.stopped.store(true, Ordering::Release);
        shared.notify();
        let _ = self.cleanup_shutdown.send(());

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }
        if let Some(handle) = self.cleanup.take() {
            if handle.join().is_err() {
                error!("cleanup thread panicked during shutdown");
            }
        }
    }
}

/// Multi-tenant job scheduler.
///
/// Jobs can be submitted and inspected whether or not workers are running.
/// Dropping the scheduler stops it.
#[derive(Debug)]
pub struct Scheduler {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let table = JobTable::new(config.tiers.clone(), config.backoff.clone());
        Self {
            shared: Arc::new(Shared {
                config,
                table: Mutex::new(table),
                changed: Condvar::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn tiers(&self) -> &TierTable {
        &self.shared.config.tiers
    }

    /// Register the processor for a job type.
    ///
    /// The registry is frozen while workers run.
    pub fn register_processor<F>(
        &self,
        job_type: impl Into<String>,
        processor: F,
    ) -> Result<(), SchedulerError>
    where
        F: Fn(&JsonValue) -> Result<JsonValue, ProcessorError> + Send + Sync + 'static,
    {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.run.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        lifecycle.registry.register(job_type, processor);
        Ok(())
    }

    /// Spawn `num_workers` workers and the cleanup task.
    pub fn start(&self, num_workers: usize) -> Result<(), SchedulerError> {
        if num_workers == 0 {
            return Err(SchedulerError::InvalidArgument(
                "num_workers must be at least 1".to_string(),
            ));
        }

        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.run.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }

        let registry = Arc::new(lifecycle.registry.clone());
        let (cleanup_tx, cleanup_rx) = mpsc::channel();
        let mut run = RunState::new(cleanup_tx);

        for index in 0..num_workers {
            let worker = Worker::new(
                format!("taskhive-worker-{index}"),
                self.shared.clone(),
                registry.clone(),
                run.stopped.clone(),
            );
            match worker.spawn() {
                Ok(handle) => run.workers.push(handle),
                Err(e) => {
                    run.shutdown(&self.shared);
                    return Err(e);
                }
            }
        }

        match cleanup::spawn(self.shared.clone(), cleanup_rx) {
            Ok(handle) => run.cleanup = Some(handle),
            Err(e) => {
                run.shutdown(&self.shared);
                return Err(e);
            }
        }

        info!(
            workers = num_workers,
            slots_per_worker = self.shared.config.worker_slots,
            processors = registry.len(),
            "scheduler started"
        );
        lifecycle.run = Some(run);
        Ok(())
    }

    /// Stop workers and cleanup, blocking until their loops have exited.
    ///
    /// Running processors are not interrupted. Their jobs stay `PROCESSING`
    /// until the processor returns, and the outcome is then recorded as
    /// usual, so a later `start()` finds the tier capacity released.
    /// No-op when not running.
    pub fn stop(&self) {
        let run = lock(&self.lifecycle).run.take();
        if let Some(run) = run {
            run.shutdown(&self.shared);
            info!("scheduler stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.lifecycle).run.is_some()
    }

    /// Submit a job with the configured default retry budget.
    pub fn enqueue(
        &self,
        owner_id: OwnerId,
        job_type: impl Into<String>,
        payload: JsonValue,
        priority: Priority,
        tier: impl Into<String>,
    ) -> Result<JobId, SchedulerError> {
        self.submit(JobRequest::new(owner_id, job_type, payload, priority, tier))
    }

    /// Submit a job described by a [`JobRequest`].
    pub fn submit(&self, request: JobRequest) -> Result<JobId, SchedulerError> {
        let id = self.shared.table().insert(request, Utc::now())?;
        self.shared.notify();
        Ok(id)
    }

    pub fn get_status(&self, job_id: JobId) -> Result<JobSnapshot, SchedulerError> {
        self.shared
            .table()
            .get(job_id)
            .ok_or(SchedulerError::NotFound(job_id))
    }

    pub fn get_status_for_owner(
        &self,
        job_id: JobId,
        owner_id: OwnerId,
    ) -> Result<JobSnapshot, SchedulerError> {
        self.shared.table().get_for_owner(job_id, owner_id)
    }

    /// An owner's jobs, most recent first.
    pub fn list_jobs(&self, owner_id: OwnerId, limit: usize) -> Vec<JobSnapshot> {
        self.shared.table().list(owner_id, limit)
    }

    /// Cancel a pending job. See [`JobTable::cancel`].
    pub fn cancel(&self, job_id: JobId, owner_id: OwnerId) -> bool {
        self.shared.table().cancel(job_id, owner_id)
    }

    /// Run one cleanup sweep now; returns the number of removed jobs.
    pub fn run_cleanup(&self) -> usize {
        self.shared.sweep()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.table().stats()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn start_rejects_zero_workers_and_double_start() {
        let scheduler = Scheduler::new(SchedulerConfig::default());

        assert!(matches!(
            scheduler.start(0),
            Err(SchedulerError::InvalidArgument(_))
        ));
        scheduler.start(1).unwrap();
        assert!(matches!(scheduler.start(1), Err(SchedulerError::AlreadyRunning)));
        assert!(matches!(
            scheduler.register_processor("late", |v| Ok(v.clone())),
            Err(SchedulerError::AlreadyRunning)
        ));

        scheduler.stop();
        assert!(!scheduler.is_running());
        scheduler.stop();
    }

    #[test]
    fn can_restart_after_stop() {
        let scheduler = Scheduler::new(
            SchedulerConfig::default().with_idle_poll_interval(Duration::from_millis(10)),
        );
        scheduler.start(2).unwrap();
        scheduler.stop();
        scheduler.register_processor("noop", |_| Ok(JsonValue::Null)).unwrap();
        scheduler.start(1).unwrap();
        assert!(scheduler.is_running());
    }

    #[test]
    fn enqueue_and_inspect_without_workers() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let owner = OwnerId::new();

        let id = scheduler
            .enqueue(owner, "ocr", serde_json::json!({"page": 1}), Priority::High, "pro")
            .unwrap();

        let snapshot = scheduler.get_status(id).unwrap();
        assert_eq!(snapshot.status, taskhive_core::JobStatus::Pending);
        assert_eq!(snapshot.max_retries, 3);
        assert!(snapshot.started_at.is_none());
        assert_eq!(scheduler.list_jobs(owner, 10).len(), 1);
        assert!(matches!(
            scheduler.get_status(JobId::new()),
            Err(SchedulerError::NotFound(_))
        ));
    }
}
