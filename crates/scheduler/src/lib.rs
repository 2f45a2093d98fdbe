//! In-process job scheduler with tiered admission control.
//!
//! ## Design
//!
//! - One [`JobTable`] per scheduler instance, guarded by a single mutex
//! - Selection and the `PENDING -> PROCESSING` mark happen under that mutex,
//!   so per-tier concurrency caps hold by construction
//! - Idle workers block on a condition variable signalled on every state change
//! - Retry with deterministic backoff; retrying jobs re-enter the pool when due
//! - Periodic cleanup of terminal jobs past the retention window
//!
//! ## Components
//!
//! - `JobTable`: job arena, admission/selection, transitions, introspection
//! - `ProcessorRegistry`: `job_type` -> processor function
//! - `Scheduler`: public façade and worker/cleanup lifecycle
//! - `worker` / `cleanup`: background loops

mod cleanup;
pub mod config;
pub mod error;
pub mod processor;
pub mod scheduler;
pub mod stats;
pub mod table;
mod worker;

pub use config::SchedulerConfig;
pub use error::{ConfigError, ProcessorError, SchedulerError};
pub use processor::{Processor, ProcessorRegistry};
pub use scheduler::Scheduler;
pub use stats::{SchedulerStats, StatusCounts, TierLoad, Totals};
pub use table::{Claim, JobRequest, JobTable, Outcome};

pub use taskhive_core::{
    JobId, JobSnapshot, JobStatus, OwnerId, Priority, RetryPolicy, TierPolicy, TierTable,
};
