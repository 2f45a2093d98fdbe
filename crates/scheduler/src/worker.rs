//! Worker dispatch loop and job execution.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;

use tracing::{debug, error, info, warn};

use crate::error::SchedulerError;
use crate::processor::ProcessorRegistry;
use crate::scheduler::Shared;
use crate::table::{Claim, Outcome};

/// One worker: claims admitted jobs and runs each on an execution thread,
/// keeping at most `worker_slots` executions in flight.
pub(crate) struct Worker {
    name: String,
    shared: Arc<Shared>,
    registry: Arc<ProcessorRegistry>,
    stopped: Arc<AtomicBool>,
}

enum Dispatch {
    /// Handed to an execution thread; occupies a slot until it reports.
    Spawned,
    /// Executed on the worker thread itself.
    Inline,
    Stopped,
}

impl Worker {
    pub(crate) fn new(
        name: String,
        shared: Arc<Shared>,
        registry: Arc<ProcessorRegistry>,
        stopped: Arc<AtomicBool>,
    ) -> Self {
        Self {
            name,
            shared,
            registry,
            stopped,
        }
    }

    pub(crate) fn spawn(self) -> Result<thread::JoinHandle<()>, SchedulerError> {
        let name = self.name.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || self.run())
            .map_err(|source| SchedulerError::Spawn { name, source })
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn run(self) {
        info!(worker = %self.name, "worker started");

        let slots = self.shared.config.worker_slots.max(1);
        let idle = self.shared.config.idle_poll_interval;
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let mut in_flight = 0usize;

        while !self.is_stopped() {
            while done_rx.try_recv().is_ok() {
                in_flight = in_flight.saturating_sub(1);
            }

            if in_flight >= slots {
                if done_rx.recv_timeout(idle).is_ok() {
                    in_flight = in_flight.saturating_sub(1);
                }
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch_next(&done_tx))) {
                Ok(Dispatch::Spawned) => in_flight += 1,
                Ok(Dispatch::Inline) => {}
                Ok(Dispatch::Stopped) => break,
                Err(panic) => {
                    error!(
                        worker = %self.name,
                        panic = %panic_message(panic.as_ref()),
                        "worker iteration panicked; pausing"
                    );
                    thread::sleep(idle);
                }
            }
        }

        info!(worker = %self.name, in_flight, "worker stopped");
    }

    fn dispatch_next(&self, done_tx: &mpsc::Sender<()>) -> Dispatch {
        let Some(claim) = self.shared.wait_for_claim(&self.stopped) else {
            return Dispatch::Stopped;
        };

        let execution = Execution {
            shared: self.shared.clone(),
            registry: self.registry.clone(),
        };

        let (claim_tx, claim_rx) = mpsc::channel::<Claim>();
        let slot = SlotGuard(done_tx.clone());
        let threaded = execution.clone();
        let spawned = thread::Builder::new()
            .name(format!("{}-exec", self.name))
            .spawn(move || {
                let _slot = slot;
                if let Ok(claim) = claim_rx.recv() {
                    threaded.run(claim);
                }
            });

        match spawned {
            Ok(_) => match claim_tx.send(claim) {
                Ok(()) => Dispatch::Spawned,
                Err(mpsc::SendError(claim)) => {
                    warn!(
                        worker = %self.name,
                        job_id = %claim.job_id,
                        "execution thread gone; running inline"
                    );
                    execution.run(claim);
                    Dispatch::Spawned
                }
            },
            Err(e) => {
                warn!(
                    worker = %self.name,
                    job_id = %claim.job_id,
                    error = %e,
                    "could not spawn execution thread; running inline"
                );
                execution.run(claim);
                Dispatch::Inline
            }
        }
    }
}

/// Frees a worker slot when the execution thread ends, however it ends.
struct SlotGuard(mpsc::Sender<()>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// Runs one claimed job and reports the outcome.
///
/// The outcome is recorded even when the run that claimed the job has been
/// stopped since, so a restarted scheduler sees the tier slot freed.
#[derive(Clone)]
struct Execution {
    shared: Arc<Shared>,
    registry: Arc<ProcessorRegistry>,
}

impl Execution {
    fn run(&self, claim: Claim) {
        debug!(
            job_id = %claim.job_id,
            job_type = %claim.job_type,
            tier = %claim.tier,
            attempt = claim.attempt,
            "executing job"
        );

        let outcome = match self.registry.get(&claim.job_type) {
            None => {
                warn!(
                    job_id = %claim.job_id,
                    job_type = %claim.job_type,
                    "no processor registered"
                );
                Outcome::not_registered()
            }
            Some(processor) => {
                match panic::catch_unwind(AssertUnwindSafe(|| processor(&claim.payload))) {
                    Ok(result) => Outcome::from(result),
                    Err(panic) => Outcome::Failed {
                        error: format!("processor panicked: {}", panic_message(panic.as_ref())),
                        retryable: true,
                    },
                }
            }
        };

        self.shared.report(claim.job_id, outcome);
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
