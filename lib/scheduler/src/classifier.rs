//! Failure classification for fired jobs.
//!
//! Every throwable outcome of a firing lands in exactly one bucket:
//! fatal-and-recorded, business-and-recorded, or retryable-and-invisible.
//! The classifier is the single decision point for the failure handling in
//! the scheduler service; the mapping is pluggable because the boundary
//! between "retry transparently" and "record for an operator" is policy,
//! not mechanism.

use iron_cadence_job::JobFailure;
use std::fmt;

/// The total set of ways a firing can fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionFailure {
    /// The job's task panicked.
    Panic { message: String },
    /// Job code reported a failure.
    Job(JobFailure),
}

impl ExecutionFailure {
    /// Returns the human-readable failure message.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Panic { message } => message,
            Self::Job(failure) => failure.message(),
        }
    }
}

impl fmt::Display for ExecutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Panic { message } => write!(f, "job panicked: {message}"),
            Self::Job(failure) => write!(f, "{failure}"),
        }
    }
}

impl std::error::Error for ExecutionFailure {}

/// Classification buckets driving the scheduler's failure handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Unrecoverable runtime error. Recorded; never retried automatically.
    FatalError,
    /// Deliberate business-level failure. Recorded; never retried
    /// automatically.
    BusinessFailure,
    /// Transient infrastructure failure. Retried by the executor; never
    /// recorded.
    Retryable,
}

/// Maps every execution failure to exactly one [`FailureKind`].
pub trait FailureClassifier: Send + Sync {
    /// Classifies a firing failure.
    fn classify(&self, failure: &ExecutionFailure) -> FailureKind;
}

/// The stock classification rule.
///
/// Panics are fatal; `JobFailure::Failed` is a business failure;
/// `JobFailure::Retryable` is transient.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultFailureClassifier;

impl FailureClassifier for DefaultFailureClassifier {
    fn classify(&self, failure: &ExecutionFailure) -> FailureKind {
        match failure {
            ExecutionFailure::Panic { .. } => FailureKind::FatalError,
            ExecutionFailure::Job(JobFailure::Failed { .. }) => FailureKind::BusinessFailure,
            ExecutionFailure::Job(JobFailure::Retryable { .. }) => FailureKind::Retryable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_classifier_is_total() {
        let classifier = DefaultFailureClassifier;

        let panic = ExecutionFailure::Panic {
            message: "index out of bounds".to_string(),
        };
        assert_eq!(classifier.classify(&panic), FailureKind::FatalError);

        let business = ExecutionFailure::Job(JobFailure::failed("no such recipient"));
        assert_eq!(classifier.classify(&business), FailureKind::BusinessFailure);

        let transient = ExecutionFailure::Job(JobFailure::retryable("connection reset"));
        assert_eq!(classifier.classify(&transient), FailureKind::Retryable);
    }

    #[test]
    fn classification_rule_is_pluggable() {
        // A stricter policy that records even transient failures.
        struct RecordEverything;

        impl FailureClassifier for RecordEverything {
            fn classify(&self, failure: &ExecutionFailure) -> FailureKind {
                match failure {
                    ExecutionFailure::Panic { .. } => FailureKind::FatalError,
                    ExecutionFailure::Job(_) => FailureKind::BusinessFailure,
                }
            }
        }

        let transient = ExecutionFailure::Job(JobFailure::retryable("connection reset"));
        assert_eq!(
            RecordEverything.classify(&transient),
            FailureKind::BusinessFailure
        );
    }

    #[test]
    fn failure_message_passthrough() {
        let failure = ExecutionFailure::Panic {
            message: "boom".to_string(),
        };
        assert_eq!(failure.message(), "boom");
        assert!(failure.to_string().contains("panicked"));
    }
}
