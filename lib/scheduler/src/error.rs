//! Error types for the scheduler crate.
//!
//! - `SchedulingError`: schedule-time failures surfaced synchronously to
//!   callers of the service (bad cron expression, duplicate job name, ...)
//! - `ExecutorError`: failures from the underlying fire-at-time mechanism
//!
//! Failures inside a fired job are not errors of these types; they go
//! through the failure classifier and end up as failed-job records or
//! transparent executor retries.

use iron_cadence_core::JobDescriptorId;
use iron_cadence_store::StoreError;
use std::fmt;

/// Errors surfaced synchronously by scheduling operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulingError {
    /// The trigger's cron expression does not parse.
    InvalidCronExpression { expression: String, reason: String },
    /// The tenant already has a job under this name.
    DuplicateJobName { job_name: String },
    /// The job type has no registered factory.
    UnknownJobType { job_type: String },
    /// No descriptor exists under the given ID for the current tenant.
    JobNotFound { descriptor_id: JobDescriptorId },
    /// The persistence gateway failed.
    Store(StoreError),
    /// The fire-at-time executor failed.
    Executor(ExecutorError),
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidCronExpression { expression, reason } => {
                write!(f, "invalid cron expression '{expression}': {reason}")
            }
            Self::DuplicateJobName { job_name } => {
                write!(f, "a job named '{job_name}' is already scheduled")
            }
            Self::UnknownJobType { job_type } => write!(f, "unknown job type: {job_type}"),
            Self::JobNotFound { descriptor_id } => {
                write!(f, "no job found for descriptor {descriptor_id}")
            }
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Executor(e) => write!(f, "executor error: {e}"),
        }
    }
}

impl std::error::Error for SchedulingError {}

impl From<StoreError> for SchedulingError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateJobName { job_name, .. } => Self::DuplicateJobName { job_name },
            other => Self::Store(other),
        }
    }
}

impl From<ExecutorError> for SchedulingError {
    fn from(e: ExecutorError) -> Self {
        Self::Executor(e)
    }
}

/// Errors from the fire-at-time executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    /// The executor is not started, so the operation cannot fire anything.
    NotStarted,
    /// An executor-internal failure.
    Internal { reason: String },
}

impl fmt::Display for ExecutorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotStarted => write!(f, "scheduler executor is not started"),
            Self::Internal { reason } => write!(f, "executor failure: {reason}"),
        }
    }
}

impl std::error::Error for ExecutorError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduling_error_display() {
        let err = SchedulingError::InvalidCronExpression {
            expression: "bogus".to_string(),
            reason: "expected 6 fields".to_string(),
        };
        assert!(err.to_string().contains("bogus"));
        assert!(err.to_string().contains("6 fields"));
    }

    #[test]
    fn duplicate_store_error_maps_to_duplicate_job_name() {
        let store_err = StoreError::DuplicateJobName {
            tenant_id: iron_cadence_core::TenantId::new(),
            job_name: "nightly".to_string(),
        };
        let err = SchedulingError::from(store_err);
        assert_eq!(
            err,
            SchedulingError::DuplicateJobName {
                job_name: "nightly".to_string()
            }
        );
    }

    #[test]
    fn executor_error_display() {
        let err = ExecutorError::NotStarted;
        assert!(err.to_string().contains("not started"));
    }
}
