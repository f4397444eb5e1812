//! Job-type registry.
//!
//! Jobs are resolved by name at fire time through an explicit registration
//! table built at startup; there is no reflective loading. The registry is
//! frozen once the service is constructed and shared behind an `Arc`.

use crate::job::Job;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Factory producing a fresh job instance for each firing.
pub type JobFactory = Arc<dyn Fn() -> Box<dyn Job> + Send + Sync>;

/// Error returned when a job type is not registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownJobType {
    /// The unresolved job-type name.
    pub job_type: String,
}

impl fmt::Display for UnknownJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job type: {}", self.job_type)
    }
}

impl std::error::Error for UnknownJobType {}

/// Registration table mapping job-type names to factories.
#[derive(Default)]
pub struct JobRegistry {
    factories: HashMap<String, JobFactory>,
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under a job-type name.
    ///
    /// A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, job_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn Job> + Send + Sync + 'static,
    {
        self.factories.insert(job_type.into(), Arc::new(factory));
    }

    /// Returns true when the job type is registered.
    #[must_use]
    pub fn contains(&self, job_type: &str) -> bool {
        self.factories.contains_key(job_type)
    }

    /// Produces a fresh instance of the named job type.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownJobType`] when no factory is registered.
    pub fn resolve(&self, job_type: &str) -> Result<Box<dyn Job>, UnknownJobType> {
        match self.factories.get(job_type) {
            Some(factory) => Ok(factory()),
            None => Err(UnknownJobType {
                job_type: job_type.to_string(),
            }),
        }
    }

    /// Returns the registered job-type names.
    #[must_use]
    pub fn job_types(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry")
            .field("job_types", &self.job_types())
            .finish()
    }
}
