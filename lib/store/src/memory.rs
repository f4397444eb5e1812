//! In-memory reference implementation of the persistence gateway.
//!
//! Transactions work on a private copy of the store state plus an
//! operation log. Reads see the transaction's own writes immediately;
//! commit replays the log against the shared state under one lock, so
//! failure-count increments stay atomic even when transactions overlap;
//! rollback simply drops the copy. Commit-time validation re-checks the
//! `(tenant, job_name)` uniqueness invariant against the latest state.

use crate::error::StoreError;
use crate::repository::{FailedJob, JobStore, JobStoreTx, QueryOptions, SortOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iron_cadence_core::{JobDescriptorId, TenantId};
use iron_cadence_job::{JobDescriptor, JobParameter};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

type Key = (TenantId, JobDescriptorId);

#[derive(Debug, Clone, Default)]
struct StoreState {
    descriptors: BTreeMap<Key, JobDescriptor>,
    parameters: HashMap<Key, Vec<JobParameter>>,
    failed: HashMap<Key, FailedJob>,
}

#[derive(Debug, Clone)]
enum WriteOp {
    CreateDescriptor(JobDescriptor),
    DeleteDescriptor(TenantId, JobDescriptorId),
    DeleteTenant(TenantId),
    PutParameters(TenantId, JobDescriptorId, Vec<JobParameter>),
    RecordFailure {
        tenant_id: TenantId,
        descriptor_id: JobDescriptorId,
        job_name: String,
        message: String,
        at: DateTime<Utc>,
    },
    DeleteFailedJob(TenantId, JobDescriptorId),
}

fn apply(state: &mut StoreState, op: &WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::CreateDescriptor(descriptor) => {
            let duplicate = state.descriptors.iter().any(|((tenant, _), existing)| {
                *tenant == descriptor.tenant_id
                    && existing.job_name == descriptor.job_name
                    && existing.id != descriptor.id
            });
            if duplicate {
                return Err(StoreError::DuplicateJobName {
                    tenant_id: descriptor.tenant_id,
                    job_name: descriptor.job_name.clone(),
                });
            }
            state
                .descriptors
                .insert((descriptor.tenant_id, descriptor.id), descriptor.clone());
        }
        WriteOp::DeleteDescriptor(tenant_id, id) => {
            let key = (*tenant_id, *id);
            state.descriptors.remove(&key);
            state.parameters.remove(&key);
            state.failed.remove(&key);
        }
        WriteOp::DeleteTenant(tenant_id) => {
            state.descriptors.retain(|(tenant, _), _| tenant != tenant_id);
            state.parameters.retain(|(tenant, _), _| tenant != tenant_id);
            state.failed.retain(|(tenant, _), _| tenant != tenant_id);
        }
        WriteOp::PutParameters(tenant_id, id, parameters) => {
            state
                .parameters
                .insert((*tenant_id, *id), parameters.clone());
        }
        WriteOp::RecordFailure {
            tenant_id,
            descriptor_id,
            job_name,
            message,
            at,
        } => {
            state
                .failed
                .entry((*tenant_id, *descriptor_id))
                .and_modify(|record| {
                    record.number_of_failures += 1;
                    record.last_message = message.clone();
                    record.last_failed_at = *at;
                })
                .or_insert_with(|| FailedJob {
                    descriptor_id: *descriptor_id,
                    tenant_id: *tenant_id,
                    job_name: job_name.clone(),
                    last_message: message.clone(),
                    number_of_failures: 1,
                    last_failed_at: *at,
                });
        }
        WriteOp::DeleteFailedJob(tenant_id, id) => {
            state.failed.remove(&(*tenant_id, *id));
        }
    }
    Ok(())
}

/// In-memory transactional job store.
///
/// Clones share the same underlying state, like handles onto one pool.
#[derive(Debug, Clone, Default)]
pub struct MemoryJobStore {
    state: Arc<Mutex<StoreState>>,
}

impl MemoryJobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn begin(&self) -> Result<Box<dyn JobStoreTx>, StoreError> {
        let working = self.state.lock().expect("store lock poisoned").clone();
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.state),
            working,
            log: Vec::new(),
        }))
    }
}

struct MemoryTx {
    shared: Arc<Mutex<StoreState>>,
    working: StoreState,
    log: Vec<WriteOp>,
}

impl MemoryTx {
    fn record(&mut self, op: WriteOp) -> Result<(), StoreError> {
        apply(&mut self.working, &op)?;
        self.log.push(op);
        Ok(())
    }
}

#[async_trait]
impl JobStoreTx for MemoryTx {
    async fn create_job_descriptor(
        &mut self,
        descriptor: &JobDescriptor,
    ) -> Result<(), StoreError> {
        self.record(WriteOp::CreateDescriptor(descriptor.clone()))
    }

    async fn job_descriptor(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Option<JobDescriptor>, StoreError> {
        Ok(self.working.descriptors.get(&(tenant_id, id)).cloned())
    }

    async fn job_descriptor_by_name(
        &mut self,
        tenant_id: TenantId,
        job_name: &str,
    ) -> Result<Option<JobDescriptor>, StoreError> {
        Ok(self
            .working
            .descriptors
            .iter()
            .find(|((tenant, _), descriptor)| {
                *tenant == tenant_id && descriptor.job_name == job_name
            })
            .map(|(_, descriptor)| descriptor.clone()))
    }

    async fn search_job_descriptors(
        &mut self,
        tenant_id: TenantId,
        options: &QueryOptions,
    ) -> Result<Vec<JobDescriptor>, StoreError> {
        let mut matches: Vec<JobDescriptor> = self
            .working
            .descriptors
            .iter()
            .filter(|((tenant, _), descriptor)| {
                *tenant == tenant_id
                    && options
                        .term
                        .as_deref()
                        .is_none_or(|term| descriptor.job_name.contains(term))
            })
            .map(|(_, descriptor)| descriptor.clone())
            .collect();

        matches.sort_by_key(|descriptor| descriptor.id);
        if options.order == SortOrder::IdDescending {
            matches.reverse();
        }

        Ok(matches
            .into_iter()
            .skip(options.from)
            .take(options.number_of_results)
            .collect())
    }

    async fn delete_job_descriptor(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<bool, StoreError> {
        if !self.working.descriptors.contains_key(&(tenant_id, id)) {
            return Ok(false);
        }
        self.record(WriteOp::DeleteDescriptor(tenant_id, id))?;
        Ok(true)
    }

    async fn delete_job_descriptors(&mut self, tenant_id: TenantId) -> Result<u64, StoreError> {
        let count = self
            .working
            .descriptors
            .keys()
            .filter(|(tenant, _)| *tenant == tenant_id)
            .count() as u64;
        self.record(WriteOp::DeleteTenant(tenant_id))?;
        Ok(count)
    }

    async fn create_job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        parameters: &[JobParameter],
    ) -> Result<(), StoreError> {
        self.record(WriteOp::PutParameters(tenant_id, id, parameters.to_vec()))
    }

    async fn job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Vec<JobParameter>, StoreError> {
        Ok(self
            .working
            .parameters
            .get(&(tenant_id, id))
            .cloned()
            .unwrap_or_default())
    }

    async fn replace_job_parameters(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        parameters: &[JobParameter],
    ) -> Result<(), StoreError> {
        self.record(WriteOp::PutParameters(tenant_id, id, parameters.to_vec()))
    }

    async fn record_failure(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
        job_name: &str,
        message: &str,
    ) -> Result<FailedJob, StoreError> {
        self.record(WriteOp::RecordFailure {
            tenant_id,
            descriptor_id: id,
            job_name: job_name.to_string(),
            message: message.to_string(),
            at: Utc::now(),
        })?;
        self.working
            .failed
            .get(&(tenant_id, id))
            .cloned()
            .ok_or_else(|| StoreError::persistence("failure record vanished after upsert"))
    }

    async fn failed_job(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<Option<FailedJob>, StoreError> {
        Ok(self.working.failed.get(&(tenant_id, id)).cloned())
    }

    async fn failed_jobs(
        &mut self,
        tenant_id: TenantId,
        from: usize,
        number_of_results: usize,
    ) -> Result<Vec<FailedJob>, StoreError> {
        let mut matches: Vec<FailedJob> = self
            .working
            .failed
            .iter()
            .filter(|((tenant, _), _)| *tenant == tenant_id)
            .map(|(_, record)| record.clone())
            .collect();
        matches.sort_by_key(|record| record.descriptor_id);

        Ok(matches
            .into_iter()
            .skip(from)
            .take(number_of_results)
            .collect())
    }

    async fn delete_failed_job(
        &mut self,
        tenant_id: TenantId,
        id: JobDescriptorId,
    ) -> Result<bool, StoreError> {
        if !self.working.failed.contains_key(&(tenant_id, id)) {
            return Ok(false);
        }
        self.record(WriteOp::DeleteFailedJob(tenant_id, id))?;
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let mut shared = self.shared.lock().expect("store lock poisoned");
        // Validate against the latest state before publishing anything, so
        // a conflicting commit leaves the shared state untouched.
        let mut next = shared.clone();
        for op in &self.log {
            apply(&mut next, op)?;
        }
        *shared = next;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(tenant_id: TenantId, job_name: &str) -> JobDescriptor {
        JobDescriptor::new(tenant_id, "noop", job_name)
    }

    #[tokio::test]
    async fn reads_observe_earlier_writes_in_same_transaction() {
        let store = MemoryJobStore::new();
        let tenant = TenantId::new();
        let d = descriptor(tenant, "alpha");

        let mut tx = store.begin().await.unwrap();
        tx.create_job_descriptor(&d).await.unwrap();

        let loaded = tx.job_descriptor(tenant, d.id).await.unwrap();
        assert_eq!(loaded, Some(d));
    }

    #[tokio::test]
    async fn committed_state_is_visible_to_later_transactions() {
        let store = MemoryJobStore::new();
        let tenant = TenantId::new();
        let d = descriptor(tenant, "alpha");

        let mut tx = store.begin().await.unwrap();
        tx.create_job_descriptor(&d).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let loaded = tx.job_descriptor_by_name(tenant, "alpha").await.unwrap();
        assert_eq!(loaded.map(|d| d.id), Some(d.id));
    }

    #[tokio::test]
    async fn rollback_discards_writes() {
        let store = MemoryJobStore::new();
        let tenant = TenantId::new();
        let d = descriptor(tenant, "alpha");

        let mut tx = store.begin().await.unwrap();
        tx.create_job_descriptor(&d).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert_eq!(tx.job_descriptor(tenant, d.id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn duplicate_job_name_is_rejected() {
        let store = MemoryJobStore::new();
        let tenant = TenantId::new();

        let mut tx = store.begin().await.unwrap();
        tx.create_job_descriptor(&descriptor(tenant, "alpha"))
            .await
            .unwrap();
        let err = tx
            .create_job_descriptor(&descriptor(tenant, "alpha"))
            .await
            .expect_err("duplicate name");
        assert!(matches!(err, StoreError::DuplicateJobName { .. }));
    }

    #[tokio::test]
    async fn same_job_name_is_allowed_across_tenants() {
        let store = MemoryJobStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.create_job_descriptor(&descriptor(TenantId::new(), "alpha"))
            .await
            .unwrap();
        tx.create_job_descriptor(&descriptor(TenantId::new(), "alpha"))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn overlapping_failure_records_increment_one_row() {
        let store = MemoryJobStore::new();
        let tenant = TenantId::new();
        let d = descriptor(tenant, "alpha");

        let mut setup = store.begin().await.unwrap();
        setup.create_job_descriptor(&d).await.unwrap();
        setup.commit().await.unwrap();

        // Two transactions overlap; both record a failure for the same
        // descriptor. The upsert must survive the overlap as one row with
        // count 2, not two rows or a lost update.
        let mut tx1 = store.begin().await.unwrap();
        let mut tx2 = store.begin().await.unwrap();
        tx1.record_failure(tenant, d.id, "alpha", "first").await.unwrap();
        tx2.record_failure(tenant, d.id, "alpha", "second").await.unwrap();
        tx1.commit().await.unwrap();
        tx2.commit().await.unwrap();

        let mut check = store.begin().await.unwrap();
        let rows = check.failed_jobs(tenant, 0, 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].number_of_failures, 2);
        assert_eq!(rows[0].last_message, "second");
    }

    #[tokio::test]
    async fn delete_descriptor_removes_parameters_and_failures() {
        let store = MemoryJobStore::new();
        let tenant = TenantId::new();
        let d = descriptor(tenant, "alpha");

        let mut tx = store.begin().await.unwrap();
        tx.create_job_descriptor(&d).await.unwrap();
        tx.create_job_parameters(tenant, d.id, &[JobParameter::integer("n", 1)])
            .await
            .unwrap();
        tx.record_failure(tenant, d.id, "alpha", "boom").await.unwrap();
        assert!(tx.delete_job_descriptor(tenant, d.id).await.unwrap());
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        assert!(tx.job_parameters(tenant, d.id).await.unwrap().is_empty());
        assert!(tx.failed_jobs(tenant, 0, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_descriptor_returns_false() {
        let store = MemoryJobStore::new();
        let mut tx = store.begin().await.unwrap();
        let deleted = tx
            .delete_job_descriptor(TenantId::new(), JobDescriptorId::new())
            .await
            .unwrap();
        assert!(!deleted);
    }

    #[tokio::test]
    async fn delete_tenant_leaves_other_tenants_alone() {
        let store = MemoryJobStore::new();
        let tenant_a = TenantId::new();
        let tenant_b = TenantId::new();

        let mut tx = store.begin().await.unwrap();
        tx.create_job_descriptor(&descriptor(tenant_a, "a1")).await.unwrap();
        tx.create_job_descriptor(&descriptor(tenant_a, "a2")).await.unwrap();
        tx.create_job_descriptor(&descriptor(tenant_b, "b1")).await.unwrap();
        assert_eq!(tx.delete_job_descriptors(tenant_a).await.unwrap(), 2);
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let remaining = tx
            .search_job_descriptors(tenant_b, &QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].job_name, "b1");
    }

    #[tokio::test]
    async fn search_supports_term_order_and_pagination() {
        let store = MemoryJobStore::new();
        let tenant = TenantId::new();

        let mut tx = store.begin().await.unwrap();
        for name in ["report-daily", "report-weekly", "cleanup"] {
            tx.create_job_descriptor(&descriptor(tenant, name)).await.unwrap();
        }
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let reports = tx
            .search_job_descriptors(tenant, &QueryOptions::page(0, 10).with_term("report"))
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);

        let newest_first = tx
            .search_job_descriptors(
                tenant,
                &QueryOptions::page(0, 1).with_order(SortOrder::IdDescending),
            )
            .await
            .unwrap();
        assert_eq!(newest_first.len(), 1);
        assert_eq!(newest_first[0].job_name, "cleanup");

        let second_page = tx
            .search_job_descriptors(tenant, &QueryOptions::page(2, 10))
            .await
            .unwrap();
        assert_eq!(second_page.len(), 1);
    }

    #[tokio::test]
    async fn replace_parameters_overwrites() {
        let store = MemoryJobStore::new();
        let tenant = TenantId::new();
        let d = descriptor(tenant, "alpha");

        let mut tx = store.begin().await.unwrap();
        tx.create_job_descriptor(&d).await.unwrap();
        tx.create_job_parameters(tenant, d.id, &[JobParameter::integer("n", 1)])
            .await
            .unwrap();
        tx.replace_job_parameters(tenant, d.id, &[JobParameter::integer("n", 2)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let parameters = tx.job_parameters(tenant, d.id).await.unwrap();
        assert_eq!(parameters, vec![JobParameter::integer("n", 2)]);
    }
}
