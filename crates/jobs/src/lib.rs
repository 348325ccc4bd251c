//! Durable background job engine.
//!
//! ## Design
//!
//! - Jobs are persisted before they are admitted, and re-admitted at boot
//! - Jobs sharing a group id form a lane that runs strictly FIFO
//! - Unmet requirements hold a job without spending its retry budget
//! - Transient failures back off exponentially within the job's budget
//! - Jobs are revived from their payload by a kind-tag registry
//!
//! ## Components
//!
//! - `Job`: the unit of work (run/serialize/retry hooks)
//! - `JobParameters` / `Requirement`: per-job lane, gating and budget
//! - `Scheduler`: lane bookkeeping, pure and clock-free
//! - `JobQueue`: persistence + scheduling + retry decisions
//! - `JobQueueHandle`: background worker pool
//! - `JobStore` / `KeyValueStore`: persistence seams (in-memory, SQLite)

pub mod executor;
pub mod job;
pub mod kv;
pub mod queue;
pub mod registry;
pub mod requirement;
pub mod scheduler;
#[cfg(feature = "sqlite")]
pub mod sqlite;
pub mod store;
pub mod types;


pub use courier_core::{JobId, RequirementKind};
pub use executor::{ExecutorConfig, ExecutorStats, JobQueueHandle};
pub use job::{Job, JobContext, JobEnqueuer, JobError};
pub use kv::{InMemoryKeyValueStore, KeyValueStore, KeyValueStoreExt};
pub use queue::{JobOutcome, JobQueue, QueueError};
pub use registry::{JobFactory, JobRegistry};
pub use requirement::{
    Requirement, RequirementContext, RequirementNotifier, RequirementProvider, RequirementState,
};
pub use scheduler::{Finish, Phase, Scheduler};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteDatabase, SqliteJobStore, SqliteKeyValueStore};
pub use store::{InMemoryJobStore, JobStore, StoreError};
pub use types::{
    BackoffPolicy, BackoffStrategy, DEFAULT_RETRY_COUNT, JobParameters, JobParametersBuilder,
    JobRecord, JobStatus, LaneKey, RetryBudget,
};
