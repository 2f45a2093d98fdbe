//! `taskhive-core`: scheduling domain building blocks.
//!
//! This crate contains **pure domain** primitives (no threads, no clocks, no IO):
//! identifiers, tier policies, the job entity and its state machine, and the
//! retry/backoff policy. Every function that depends on time takes `now`
//! explicitly so that behavior stays reproducible in tests.

pub mod error;
pub mod id;
pub mod job;
pub mod retry;
pub mod tier;

pub use error::{DomainError, DomainResult};
pub use id::{JobId, OwnerId};
pub use job::{Job, JobEvent, JobSnapshot, JobStatus, Priority, next_status};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use tier::{TierPolicy, TierTable};
