//! Periodic removal of terminal jobs past the retention window.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::error::SchedulerError;
use crate::scheduler::Shared;
use crate::worker::panic_message;

const THREAD_NAME: &str = "taskhive-cleanup";

/// Spawn the cleanup loop. It exits when `shutdown` receives a message or
/// its sender is dropped.
pub(crate) fn spawn(
    shared: Arc<Shared>,
    shutdown: mpsc::Receiver<()>,
) -> Result<thread::JoinHandle<()>, SchedulerError> {
    thread::Builder::new()
        .name(THREAD_NAME.to_string())
        .spawn(move || {
            let config = &shared.config;
            info!(
                interval_secs = config.cleanup_interval.as_secs(),
                retention_secs = config.retention.as_secs(),
                "cleanup task started"
            );
            cleanup_loop(
                config.cleanup_interval,
                config.cleanup_retry_delay,
                &shutdown,
                || shared.sweep(),
            );
            info!("cleanup task stopped");
        })
        .map_err(|source| SchedulerError::Spawn {
            name: THREAD_NAME.to_string(),
            source,
        })
}

/// Run `sweep` every `interval` until shutdown. A panicking sweep is logged
/// and retried after `retry_delay`.
fn cleanup_loop<F>(
    interval: Duration,
    retry_delay: Duration,
    shutdown: &mpsc::Receiver<()>,
    sweep: F,
) where
    F: Fn() -> usize,
{
    let mut wait = interval;
    loop {
        match shutdown.recv_timeout(wait) {
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        match panic::catch_unwind(AssertUnwindSafe(&sweep)) {
            Ok(removed) => {
                if removed > 0 {
                    info!(removed, "cleanup removed expired jobs");
                } else {
                    debug!("cleanup found nothing to remove");
                }
                wait = interval;
            }
            Err(panic) => {
                error!(
                    panic = %panic_message(panic.as_ref()),
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "cleanup sweep failed"
                );
                wait = retry_delay;
            }
        }
    }
}
