//! Multi-tenant durable job scheduler for iron-cadence.
//!
//! This crate provides:
//!
//! - **Trigger model**: one-shot and unix-cron triggers with a
//!   skip-not-late misfire policy
//! - **Executor**: the fire-at-time mechanism with per-tenant groups,
//!   pause/resume, and transparent transient retries
//! - **Failure classification**: pluggable mapping of firing failures to
//!   fatal / business / retryable buckets
//! - **Scheduler service**: the orchestrator binding descriptors and
//!   triggers to the executor inside the ambient transaction boundary

pub mod classifier;
pub mod error;
pub mod executor;
pub mod service;
pub mod trigger;

pub use classifier::{DefaultFailureClassifier, ExecutionFailure, FailureClassifier, FailureKind};
pub use error::{ExecutorError, SchedulingError};
pub use executor::{
    ExecutorConfig, FireDisposition, FireHandler, FireRequest, SchedulerExecutor,
    TokioSchedulerExecutor,
};
pub use service::{JobRunner, SchedulerService};
pub use trigger::{OneShotTrigger, Trigger, TriggerKind, UnixCronTrigger};
