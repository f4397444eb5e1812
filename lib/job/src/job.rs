//! The executable job contract.
//!
//! A job type implements [`Job`]; instances are produced by the registry at
//! fire time, receive their persisted parameters through
//! [`Job::set_attributes`], and run via [`Job::execute`]. A failing
//! execution reports either a business failure (recorded durably) or a
//! transient failure (retried by the executor, never recorded).

use crate::descriptor::JobParameterMap;
use async_trait::async_trait;
use std::fmt;

/// Failure reported by job code.
///
/// Panics inside `execute` are a third failure class; they are captured by
/// the firing machinery, not represented here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobFailure {
    /// Business-level failure. Recorded as a failed-job row; never retried
    /// automatically.
    Failed {
        /// Human-readable reason, persisted as the failure message.
        message: String,
    },
    /// Transient infrastructure failure. The executor re-fires the same
    /// firing; never visible as a failed-job row.
    Retryable {
        /// Human-readable reason, used for logging only.
        message: String,
    },
}

impl JobFailure {
    /// Creates a business failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Creates a transient failure.
    #[must_use]
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable {
            message: message.into(),
        }
    }

    /// Returns the failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Failed { message } | Self::Retryable { message } => message,
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { message } => write!(f, "job failed: {message}"),
            Self::Retryable { message } => write!(f, "job failed transiently: {message}"),
        }
    }
}

impl std::error::Error for JobFailure {}

/// A unit of work resolvable by job-type name.
///
/// Implementations must be cheap to construct; a fresh instance is created
/// for every firing.
#[async_trait]
pub trait Job: Send + 'static {
    /// Injects the persisted parameters before execution.
    ///
    /// # Errors
    ///
    /// Returns a [`JobFailure`] when required parameters are missing or
    /// malformed; treated like any other execution failure.
    fn set_attributes(&mut self, attributes: &JobParameterMap) -> Result<(), JobFailure>;

    /// Runs the unit of work.
    ///
    /// # Errors
    ///
    /// Returns a [`JobFailure`] describing a business or transient failure.
    async fn execute(&mut self) -> Result<(), JobFailure>;
}
