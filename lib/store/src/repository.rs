//! The persistence gateway consumed by the scheduler.
//!
//! [`JobStore`] hands out scoped transactions; every read and write goes
//! through a [`JobStoreTx`] so the gateway's transactional guarantees hold:
//! reads inside one transaction observe its earlier writes, committed state
//! is visible to all later transactions, rolled-back state to none.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iron_cadence_core::{JobDescriptorId, TenantId};
use iron_cadence_job::{JobDescriptor, JobParameter};
use serde::{Deserialize, Serialize};

/// Durable record of a job execution failure.
///
/// At most one record exists per job descriptor; repeated failures
/// increment [`FailedJob::number_of_failures`] atomically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedJob {
    /// The descriptor whose execution failed.
    pub descriptor_id: JobDescriptorId,
    /// Tenant owning the descriptor.
    pub tenant_id: TenantId,
    /// Scheduling key of the descriptor, denormalized for listings.
    pub job_name: String,
    /// Message of the most recent classified failure.
    pub last_message: String,
    /// How many classified failures this descriptor has accumulated.
    pub number_of_failures: u32,
    /// When the most recent failure happened.
    pub last_failed_at: DateTime<Utc>,
}

/// Ordering for descriptor searches.
///
/// Descriptor IDs are ULIDs, so ID order is creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Oldest first.
    #[default]
    IdAscending,
    /// Newest first.
    IdDescending,
}

/// Pagination and filtering for descriptor searches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    /// Zero-based index of the first result.
    pub from: usize,
    /// Maximum number of results to return.
    pub number_of_results: usize,
    /// Optional substring match against the job name.
    pub term: Option<String>,
    /// Result ordering.
    pub order: SortOrder,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            from: 0,
            number_of_results: 20,
            term: None,
            order: SortOrder::default(),
        }
    }
}

impl QueryOptions {
    /// Creates options for one result page.
    #[must_use]
    pub fn page(from: usize, number_of_results: usize) -> Self {
        Self {
            from,
            number_of_results,
            ..Self::default()
        }
    }

    /// Filters results to job names containing the term.
    #[must_use]
    pub fn with_term(mut self, term: impl Into<String>) -> Self {
        self.term = Some(term.into());
        self
    }

    /// Sets the result ordering.
    #[must_use]
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }
}

/// Transactional store of job descriptors, parameters, and failure records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Opens a new transaction.
    async fn begin(&self) -> Result<Box<dyn JobStoreTx>, StoreError>;
}

/// One open transaction against a [`JobStore`].
///
/// Dropping a transaction without calling [`JobStoreTx::commit`] discards
/// its writes.
#[async_trait]
pub trait JobStoreTx: Send {
    /// Persists a new job descriptor.
    ///
    /// Fails with [`StoreError::DuplicateJobName`] when the tenant already
    /// has a descriptor under the same job name.
    async fn create_job_descriptor(&mut self, descriptor: &JobDescriptor)
    -> Result<(), StoreError>;

    /// Loads a descriptor by ID.
    async fn job_descriptor(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Option<JobDescriptor>, StoreError>;

    /// Loads a descriptor by its scheduling key.
    async fn job_descriptor_by_name(
        &mut self,
        tenant_id: TenantId,
        job_name: &str,
    ) -> Result<Option<JobDescriptor>, StoreError>;

    /// Paginated descriptor search.
    async fn search_job_descriptors(
        &mut self,
        tenant_id: TenantId,
        options: &QueryOptions,
    ) -> Result<Vec<JobDescriptor>, StoreError>;

    /// Deletes a descriptor together with its parameters and failure
    /// record. Returns false when the descriptor does not exist.
    async fn delete_job_descriptor(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<bool, StoreError>;

    /// Deletes every descriptor of the tenant, returning how many went.
    async fn delete_job_descriptors(&mut self, tenant_id: TenantId) -> Result<u64, StoreError>;

    /// Persists the parameter list of a descriptor.
    async fn create_job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        parameters: &[JobParameter],
    ) -> Result<(), StoreError>;

    /// Loads the parameter list of a descriptor.
    async fn job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Vec<JobParameter>, StoreError>;

    /// Replaces the parameter list of a descriptor.
    async fn replace_job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        parameters: &[JobParameter],
    ) -> Result<(), StoreError>;

    /// Records a classified failure for a descriptor.
    ///
    /// Atomic upsert keyed by descriptor ID: creates the record on first
    /// failure, otherwise increments the counter and replaces the message.
    async fn record_failure(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        job_name: &str,
        message: &str,
    ) -> Result<FailedJob, StoreError>;

    /// Loads the failure record of a descriptor.
    async fn failed_job(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Option<FailedJob>, StoreError>;

    /// Paginated, tenant-scoped listing of failure records.
    async fn failed_jobs(
        &mut self,
        tenant_id: TenantId,
        from: usize,
        number_of_results: usize,
    ) -> Result<Vec<FailedJob>, StoreError>;

    /// Removes the failure record of a descriptor. Returns false when no
    /// record exists.
    async fn delete_failed_job(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<bool, StoreError>;

    /// Makes the transaction's writes visible to later transactions.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Discards the transaction's writes.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
