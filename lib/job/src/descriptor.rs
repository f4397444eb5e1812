//! Durable description of "what to run".
//!
//! A [`JobDescriptor`] names a job type and carries the identity under which
//! it is scheduled; its [`JobParameter`] list is persisted alongside it and
//! injected into the job instance at fire time. Parameters are flat named
//! scalars, looked up by key through a [`JobParameterMap`] view.

use chrono::{DateTime, Utc};
use iron_cadence_core::{JobDescriptorId, TenantId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A persisted job descriptor.
///
/// Identity is the `id`; `(tenant_id, job_name)` is unique per tenant when
/// used as a scheduling key. Immutable once persisted, except for the
/// failure-tracking record kept next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    /// Unique identifier for this descriptor.
    pub id: JobDescriptorId,
    /// The tenant this job belongs to.
    pub tenant_id: TenantId,
    /// Job type name, resolved against the registry at fire time.
    pub job_type: String,
    /// Scheduling key, unique within the tenant.
    pub job_name: String,
    /// When this descriptor was created.
    pub created_at: DateTime<Utc>,
}

impl JobDescriptor {
    /// Creates a new descriptor for the given tenant.
    #[must_use]
    pub fn new(
        tenant_id: TenantId,
        job_type: impl Into<String>,
        job_name: impl Into<String>,
    ) -> Self {
        Self {
            id: JobDescriptorId::new(),
            tenant_id,
            job_type: job_type.into(),
            job_name: job_name.into(),
            created_at: Utc::now(),
        }
    }
}

/// A serializable scalar parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Boolean flag.
    Boolean(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// Text value.
    Text(String),
}

/// A named parameter owned by exactly one job descriptor.
///
/// Insertion order is irrelevant; values are looked up by key at execute
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParameter {
    /// Lookup key.
    pub key: String,
    /// Scalar value.
    pub value: ParameterValue,
}

impl JobParameter {
    /// Creates a parameter with an arbitrary scalar value.
    #[must_use]
    pub fn new(key: impl Into<String>, value: ParameterValue) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Creates a text parameter.
    #[must_use]
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, ParameterValue::Text(value.into()))
    }

    /// Creates an integer parameter.
    #[must_use]
    pub fn integer(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, ParameterValue::Integer(value))
    }

    /// Creates a boolean parameter.
    #[must_use]
    pub fn boolean(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, ParameterValue::Boolean(value))
    }
}

/// Key-indexed view over a descriptor's parameters.
#[derive(Debug, Clone, Default)]
pub struct JobParameterMap {
    values: HashMap<String, ParameterValue>,
}

impl JobParameterMap {
    /// Builds the map from a persisted parameter list.
    ///
    /// Later entries win on duplicate keys.
    #[must_use]
    pub fn from_parameters(parameters: &[JobParameter]) -> Self {
        let values = parameters
            .iter()
            .map(|p| (p.key.clone(), p.value.clone()))
            .collect();
        Self { values }
    }

    /// Returns the raw value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&ParameterValue> {
        self.values.get(key)
    }

    /// Returns a text value for a key.
    #[must_use]
    pub fn get_text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ParameterValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns an integer value for a key.
    #[must_use]
    pub fn get_integer(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(ParameterValue::Integer(i)) => Some(*i),
            _ => None,
        }
    }

    /// Returns a boolean value for a key.
    #[must_use]
    pub fn get_boolean(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(ParameterValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true when no parameters are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
