//! The scheduler service orchestrating persistence and firing.
//!
//! `SchedulerService` binds job descriptors and triggers to the executor,
//! scopes every operation to the session's tenant, and coordinates with
//! the transaction boundary so persistence and trigger arming commit
//! atomically: the executor registration rides an after-commit hook, so a
//! rolled-back `schedule` leaves no persisted job and no armed trigger.
//!
//! At fire time the [`JobRunner`] opens its own transaction, resolves the
//! job type through the registry, injects the persisted parameters, and
//! runs the job on its own task so panics are captured. The classifier
//! then decides between recording a failure, asking the executor for a
//! transparent re-fire, or nothing at all.

use crate::classifier::{ExecutionFailure, FailureClassifier, FailureKind};
use crate::error::SchedulingError;
use crate::executor::{
    ExecutorConfig, FireDisposition, FireHandler, FireRequest, SchedulerExecutor,
    TokioSchedulerExecutor,
};
use crate::trigger::{Trigger, TriggerKind};
use async_trait::async_trait;
use iron_cadence_core::{JobDescriptorId, Session, TenantId};
use iron_cadence_job::{JobDescriptor, JobFailure, JobParameter, JobParameterMap, JobRegistry};
use iron_cadence_store::{FailedJob, QueryOptions, StoreError, Transaction, TransactionService};
use std::sync::{Arc, Mutex};

/// Lifecycle states of the scheduler service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Started,
    Stopped,
}

/// Multi-tenant durable job scheduler.
pub struct SchedulerService {
    lifecycle: Mutex<Lifecycle>,
    executor: Arc<dyn SchedulerExecutor>,
    transactions: TransactionService,
    session: Arc<Session>,
    registry: Arc<JobRegistry>,
}

impl SchedulerService {
    /// Creates a scheduler over the tokio executor.
    #[must_use]
    pub fn new(
        transactions: TransactionService,
        session: Arc<Session>,
        registry: Arc<JobRegistry>,
        classifier: Arc<dyn FailureClassifier>,
        config: ExecutorConfig,
    ) -> Self {
        let runner = Arc::new(JobRunner::new(
            transactions.clone(),
            Arc::clone(&registry),
            classifier,
        ));
        let executor: Arc<dyn SchedulerExecutor> =
            Arc::new(TokioSchedulerExecutor::new(runner, config));
        Self::with_executor(transactions, session, registry, executor)
    }

    /// Creates a scheduler over a caller-provided executor.
    ///
    /// The caller is responsible for wiring the executor's fire handler,
    /// typically a [`JobRunner`] sharing this service's transaction
    /// service.
    #[must_use]
    pub fn with_executor(
        transactions: TransactionService,
        session: Arc<Session>,
        registry: Arc<JobRegistry>,
        executor: Arc<dyn SchedulerExecutor>,
    ) -> Self {
        Self {
            lifecycle: Mutex::new(Lifecycle::Uninitialized),
            executor,
            transactions,
            session,
            registry,
        }
    }

    /// Prepares the scheduler without allowing firings yet. Idempotent.
    pub fn initialize_scheduler(&self) {
        let mut state = self.lifecycle.lock().expect("lifecycle lock poisoned");
        if *state == Lifecycle::Uninitialized {
            *state = Lifecycle::Stopped;
            tracing::info!("scheduler initialized");
        }
    }

    /// Allows registered triggers to fire. Initializes first when needed;
    /// a no-op when already started.
    ///
    /// # Errors
    ///
    /// Propagates executor start failures.
    pub async fn start(&self) -> Result<(), SchedulingError> {
        self.initialize_scheduler();
        {
            let state = self.lifecycle.lock().expect("lifecycle lock poisoned");
            if *state == Lifecycle::Started {
                return Ok(());
            }
        }
        self.executor.start().await?;
        *self.lifecycle.lock().expect("lifecycle lock poisoned") = Lifecycle::Started;
        tracing::info!("scheduler started");
        Ok(())
    }

    /// Stops firing. Always safe to call; pending and future firings are
    /// held until the next [`SchedulerService::start`]. An in-flight
    /// execution is not interrupted.
    ///
    /// # Errors
    ///
    /// Propagates executor stop failures.
    pub async fn stop(&self) -> Result<(), SchedulingError> {
        self.executor.stop().await?;
        *self.lifecycle.lock().expect("lifecycle lock poisoned") = Lifecycle::Stopped;
        tracing::info!("scheduler stopped");
        Ok(())
    }

    /// Returns whether the scheduler accepts and performs firings.
    #[must_use]
    pub fn is_started(&self) -> bool {
        *self.lifecycle.lock().expect("lifecycle lock poisoned") == Lifecycle::Started
    }

    /// Returns whether the scheduler is not firing.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        !self.is_started()
    }

    /// Schedules a job inside the caller's transaction.
    ///
    /// Persists the descriptor and parameters immediately; the trigger is
    /// armed with the executor only once the transaction commits.
    ///
    /// # Errors
    ///
    /// Fails synchronously on an invalid cron expression, an unregistered
    /// job type, a duplicate job name for the tenant, or a store failure.
    pub async fn schedule(
        &self,
        txn: &mut Transaction,
        job_type: impl Into<String>,
        job_name: impl Into<String>,
        parameters: Vec<JobParameter>,
        trigger: Trigger,
    ) -> Result<JobDescriptorId, SchedulingError> {
        let job_type = job_type.into();
        let job_name = job_name.into();
        let tenant_id = self.session.tenant_id();

        trigger.validate()?;
        if !self.registry.contains(&job_type) {
            return Err(SchedulingError::UnknownJobType { job_type });
        }
        if txn
            .store()
            .job_descriptor_by_name(tenant_id, &job_name)
            .await?
            .is_some()
        {
            return Err(SchedulingError::DuplicateJobName { job_name });
        }

        let descriptor = JobDescriptor::new(tenant_id, job_type, job_name.clone());
        txn.store().create_job_descriptor(&descriptor).await?;
        txn.store()
            .create_job_parameters(tenant_id, descriptor.id, &parameters)
            .await?;

        let request = FireRequest {
            tenant_id,
            descriptor_id: descriptor.id,
            job_name: job_name.clone(),
            clears_failure_on_success: false,
        };
        let executor = Arc::clone(&self.executor);
        txn.on_commit(move || async move {
            if let Err(e) = executor.register(trigger, request).await {
                tracing::error!(error = %e, "failed to arm trigger after commit");
            }
        });

        tracing::info!(
            tenant = %tenant_id,
            job_name = %job_name,
            descriptor = %descriptor.id,
            "scheduled job"
        );
        Ok(descriptor.id)
    }

    /// Unschedules and removes a job by name.
    ///
    /// Returns false, never an error, when no such job exists for the
    /// current tenant.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn delete(&self, job_name: &str) -> Result<bool, SchedulingError> {
        let tenant_id = self.session.tenant_id();
        let mut txn = self.transactions.begin().await?;

        let Some(descriptor) = txn
            .store()
            .job_descriptor_by_name(tenant_id, job_name)
            .await?
        else {
            txn.rollback().await?;
            return Ok(false);
        };

        txn.store()
            .delete_job_descriptor(tenant_id, descriptor.id)
            .await?;

        let executor = Arc::clone(&self.executor);
        let name = job_name.to_string();
        txn.on_commit(move || async move {
            if let Err(e) = executor.unregister(tenant_id, &name).await {
                tracing::error!(error = %e, job_name = %name, "failed to disarm deleted job");
            }
        });
        txn.complete().await?;

        tracing::info!(tenant = %tenant_id, job_name = %job_name, "deleted job");
        Ok(true)
    }

    /// Removes every job of the current tenant.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn delete_jobs(&self) -> Result<(), SchedulingError> {
        let tenant_id = self.session.tenant_id();
        let mut txn = self.transactions.begin().await?;
        let removed = txn.store().delete_job_descriptors(tenant_id).await?;

        let executor = Arc::clone(&self.executor);
        txn.on_commit(move || async move {
            if let Err(e) = executor.unregister_group(tenant_id).await {
                tracing::error!(error = %e, tenant = %tenant_id, "failed to disarm tenant triggers");
            }
        });
        txn.complete().await?;

        tracing::info!(tenant = %tenant_id, removed, "deleted tenant jobs");
        Ok(())
    }

    /// Suspends firing for all triggers of the given tenant. Triggers of
    /// other tenants keep firing on time; an in-flight execution is not
    /// aborted.
    ///
    /// # Errors
    ///
    /// Propagates executor failures.
    pub async fn pause_jobs(&self, tenant_id: TenantId) -> Result<(), SchedulingError> {
        self.executor.pause_group(tenant_id).await?;
        Ok(())
    }

    /// Lifts a tenant's suspension.
    ///
    /// # Errors
    ///
    /// Propagates executor failures.
    pub async fn resume_jobs(&self, tenant_id: TenantId) -> Result<(), SchedulingError> {
        self.executor.resume_group(tenant_id).await?;
        Ok(())
    }

    /// Retries a failed job inside the caller's transaction, replacing its
    /// parameters.
    ///
    /// A one-shot job re-executes immediately after commit and its failure
    /// record is cleared when that re-execution succeeds. A recurring job
    /// has its failure record cleared right away and rides its existing
    /// schedule with the new parameters.
    ///
    /// # Errors
    ///
    /// Fails when no descriptor exists under the ID for the current
    /// tenant, or on store failures.
    pub async fn retry_job_that_failed(
        &self,
        txn: &mut Transaction,
        descriptor_id: JobDescriptorId,
        parameters: Vec<JobParameter>,
    ) -> Result<(), SchedulingError> {
        let tenant_id = self.session.tenant_id();
        let descriptor = txn
            .store()
            .job_descriptor(tenant_id, descriptor_id)
            .await?
            .ok_or(SchedulingError::JobNotFound { descriptor_id })?;

        txn.store()
            .replace_job_parameters(tenant_id, descriptor_id, &parameters)
            .await?;

        match self
            .executor
            .registered_kind(tenant_id, &descriptor.job_name)
        {
            Some(TriggerKind::OneShot) => {
                let executor = Arc::clone(&self.executor);
                let job_name = descriptor.job_name.clone();
                txn.on_commit(move || async move {
                    match executor.fire_now(tenant_id, &job_name).await {
                        Ok(true) => {}
                        Ok(false) => {
                            tracing::warn!(job_name = %job_name, "no registration left to re-fire");
                        }
                        Err(e) => {
                            tracing::error!(error = %e, job_name = %job_name, "failed to re-fire job");
                        }
                    }
                });
            }
            Some(TriggerKind::Recurring) | None => {
                txn.store().delete_failed_job(tenant_id, descriptor_id).await?;
            }
        }

        tracing::info!(tenant = %tenant_id, descriptor = %descriptor_id, "retrying failed job");
        Ok(())
    }

    /// Tenant-scoped page of failure records.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn get_failed_jobs(
        &self,
        from: usize,
        number_of_results: usize,
    ) -> Result<Vec<FailedJob>, SchedulingError> {
        let tenant_id = self.session.tenant_id();
        let mut txn = self.transactions.begin().await?;
        let records = txn
            .store()
            .failed_jobs(tenant_id, from, number_of_results)
            .await?;
        txn.complete().await?;
        Ok(records)
    }

    /// Tenant-scoped descriptor search.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn search_job_descriptors(
        &self,
        options: &QueryOptions,
    ) -> Result<Vec<JobDescriptor>, SchedulingError> {
        let tenant_id = self.session.tenant_id();
        let mut txn = self.transactions.begin().await?;
        let descriptors = txn.store().search_job_descriptors(tenant_id, options).await?;
        txn.complete().await?;
        Ok(descriptors)
    }
}

/// Fire handler executing persisted jobs.
///
/// Each firing runs in freshly-opened transactions, independent of the
/// transaction that scheduled the job.
pub struct JobRunner {
    transactions: TransactionService,
    registry: Arc<JobRegistry>,
    classifier: Arc<dyn FailureClassifier>,
}

impl JobRunner {
    /// Creates a runner over the given collaborators.
    #[must_use]
    pub fn new(
        transactions: TransactionService,
        registry: Arc<JobRegistry>,
        classifier: Arc<dyn FailureClassifier>,
    ) -> Self {
        Self {
            transactions,
            registry,
            classifier,
        }
    }

    async fn execute_once(&self, request: &FireRequest) -> Result<FireDisposition, StoreError> {
        let mut txn = self.transactions.begin().await?;
        let descriptor = txn
            .store()
            .job_descriptor(request.tenant_id, request.descriptor_id)
            .await?;
        let Some(descriptor) = descriptor else {
            txn.complete().await?;
            tracing::warn!(
                descriptor = %request.descriptor_id,
                "descriptor vanished before firing, skipping"
            );
            return Ok(FireDisposition::Completed);
        };
        let parameters = txn
            .store()
            .job_parameters(request.tenant_id, request.descriptor_id)
            .await?;
        txn.complete().await?;

        match self.run_job(&descriptor.job_type, &parameters).await {
            Ok(()) => {
                if request.clears_failure_on_success {
                    let mut txn = self.transactions.begin().await?;
                    txn.store()
                        .delete_failed_job(request.tenant_id, request.descriptor_id)
                        .await?;
                    txn.complete().await?;
                }
                tracing::debug!(job_name = %request.job_name, "job completed");
                Ok(FireDisposition::Completed)
            }
            Err(failure) => match self.classifier.classify(&failure) {
                FailureKind::Retryable => {
                    tracing::debug!(
                        job_name = %request.job_name,
                        reason = failure.message(),
                        "transient job failure"
                    );
                    Ok(FireDisposition::RetryRequested)
                }
                FailureKind::FatalError | FailureKind::BusinessFailure => {
                    let mut txn = self.transactions.begin().await?;
                    let record = txn
                        .store()
                        .record_failure(
                            request.tenant_id,
                            request.descriptor_id,
                            &descriptor.job_name,
                            failure.message(),
                        )
                        .await?;
                    txn.complete().await?;
                    tracing::warn!(
                        job_name = %request.job_name,
                        failures = record.number_of_failures,
                        reason = failure.message(),
                        "recorded job failure"
                    );
                    Ok(FireDisposition::Completed)
                }
            },
        }
    }

    async fn run_job(
        &self,
        job_type: &str,
        parameters: &[JobParameter],
    ) -> Result<(), ExecutionFailure> {
        let job = match self.registry.resolve(job_type) {
            Ok(job) => job,
            Err(e) => {
                return Err(ExecutionFailure::Job(JobFailure::failed(e.to_string())));
            }
        };
        let attributes = JobParameterMap::from_parameters(parameters);

        // The job runs on its own task so a panicking job is captured as a
        // fatal failure instead of unwinding into the executor.
        let handle = tokio::spawn(async move {
            let mut job = job;
            job.set_attributes(&attributes)?;
            job.execute().await
        });

        match handle.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(failure)) => Err(ExecutionFailure::Job(failure)),
            Err(join_err) if join_err.is_panic() => {
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "job panicked".to_string());
                Err(ExecutionFailure::Panic { message })
            }
            Err(_) => Err(ExecutionFailure::Job(JobFailure::retryable(
                "job task cancelled",
            ))),
        }
    }
}

#[async_trait]
impl FireHandler for JobRunner {
    async fn fire(&self, request: &FireRequest) -> FireDisposition {
        match self.execute_once(request).await {
            Ok(disposition) => disposition,
            Err(e) => {
                // Persistence failures around a firing are transient
                // infrastructure trouble; surface them in the log and let
                // the executor re-fire.
                tracing::error!(
                    error = %e,
                    job_name = %request.job_name,
                    "persistence failure during firing"
                );
                FireDisposition::RetryRequested
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::DefaultFailureClassifier;
    use crate::trigger::{OneShotTrigger, UnixCronTrigger};
    use chrono::{Duration, Utc};
    use iron_cadence_job::Job;
    use iron_cadence_store::MemoryJobStore;
    use std::collections::HashMap;
    use std::time::Duration as StdDuration;

    /// Thread-safe counter board standing in for observable job side
    /// effects.
    #[derive(Default)]
    struct Counters {
        values: Mutex<HashMap<String, i64>>,
    }

    impl Counters {
        fn add(&self, key: &str) -> i64 {
            let mut values = self.values.lock().unwrap();
            let value = values.entry(key.to_string()).or_insert(0);
            *value += 1;
            *value
        }

        fn get(&self, key: &str) -> i64 {
            *self.values.lock().unwrap().get(key).unwrap_or(&0)
        }
    }

    /// Job whose behavior is scripted through its parameters.
    struct ScriptedJob {
        counters: Arc<Counters>,
        mode: String,
        label: String,
    }

    impl ScriptedJob {
        fn succeed(&self) -> Result<(), JobFailure> {
            self.counters.add(&format!("{}.success", self.label));
            Ok(())
        }
    }

    #[async_trait]
    impl Job for ScriptedJob {
        fn set_attributes(&mut self, attributes: &JobParameterMap) -> Result<(), JobFailure> {
            self.mode = attributes
                .get_text("mode")
                .unwrap_or("succeed")
                .to_string();
            self.label = attributes
                .get_text("label")
                .ok_or_else(|| JobFailure::failed("missing parameter: label"))?
                .to_string();
            Ok(())
        }

        async fn execute(&mut self) -> Result<(), JobFailure> {
            let attempts = self.counters.add(&format!("{}.attempts", self.label));
            match self.mode.as_str() {
                "fail" => Err(JobFailure::failed("deliberate business failure")),
                "panic" => panic!("deliberate fatal error"),
                "fail-once" => {
                    if attempts == 1 {
                        Err(JobFailure::failed("first attempt failed"))
                    } else {
                        self.succeed()
                    }
                }
                "retryable-once" => {
                    if attempts == 1 {
                        self.counters.add(&format!("{}.transient", self.label));
                        Err(JobFailure::retryable("transient hiccup"))
                    } else {
                        self.succeed()
                    }
                }
                _ => self.succeed(),
            }
        }
    }

    struct Harness {
        service: Arc<SchedulerService>,
        transactions: TransactionService,
        session: Arc<Session>,
        counters: Arc<Counters>,
    }

    impl Harness {
        fn new() -> Self {
            let counters = Arc::new(Counters::default());
            let transactions = TransactionService::new(Arc::new(MemoryJobStore::new()));
            let session = Arc::new(Session::new(TenantId::new()));

            let mut registry = JobRegistry::new();
            let job_counters = Arc::clone(&counters);
            registry.register("scripted", move || {
                Box::new(ScriptedJob {
                    counters: Arc::clone(&job_counters),
                    mode: String::new(),
                    label: String::new(),
                })
            });

            let service = Arc::new(SchedulerService::new(
                transactions.clone(),
                Arc::clone(&session),
                Arc::new(registry),
                Arc::new(DefaultFailureClassifier),
                ExecutorConfig::default(),
            ));

            Self {
                service,
                transactions,
                session,
                counters,
            }
        }

        async fn started() -> Self {
            let harness = Self::new();
            harness.service.start().await.expect("scheduler starts");
            harness
        }

        async fn schedule(&self, job_name: &str, mode: &str, trigger: Trigger) -> JobDescriptorId {
            let mut txn = self.transactions.begin().await.expect("begin");
            let id = self
                .service
                .schedule(
                    &mut txn,
                    "scripted",
                    job_name,
                    scripted_parameters(job_name, mode),
                    trigger,
                )
                .await
                .expect("schedule");
            txn.complete().await.expect("commit");
            id
        }

        async fn retry(&self, descriptor_id: JobDescriptorId, job_name: &str, mode: &str) {
            let mut txn = self.transactions.begin().await.expect("begin");
            self.service
                .retry_job_that_failed(
                    &mut txn,
                    descriptor_id,
                    scripted_parameters(job_name, mode),
                )
                .await
                .expect("retry");
            txn.complete().await.expect("commit");
        }

        async fn failed_jobs(&self) -> Vec<FailedJob> {
            self.service.get_failed_jobs(0, 10).await.expect("failed jobs")
        }

        fn success(&self, label: &str) -> i64 {
            self.counters.get(&format!("{label}.success"))
        }

        fn attempts(&self, label: &str) -> i64 {
            self.counters.get(&format!("{label}.attempts"))
        }
    }

    fn scripted_parameters(label: &str, mode: &str) -> Vec<JobParameter> {
        vec![
            JobParameter::text("mode", mode),
            JobParameter::text("label", label),
        ]
    }

    fn one_shot_now(name: &str) -> Trigger {
        Trigger::OneShot(OneShotTrigger::new(name, Utc::now(), Duration::seconds(10)))
    }

    fn one_shot_far_future(name: &str) -> Trigger {
        Trigger::OneShot(OneShotTrigger::new(
            name,
            Utc::now() + Duration::milliseconds(10_000_000),
            Duration::seconds(10),
        ))
    }

    fn every_second(name: &str) -> Trigger {
        Trigger::UnixCron(UnixCronTrigger::new(
            name,
            Utc::now() - Duration::seconds(1),
            "0/1 * * * * *",
        ))
    }

    async fn wait_until(timeout_ms: u64, condition: impl Fn() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + StdDuration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(StdDuration::from_millis(25)).await;
        }
        condition()
    }

    async fn wait_until_async<F, Fut>(timeout_ms: u64, condition: F) -> bool
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + StdDuration::from_millis(timeout_ms);
        while tokio::time::Instant::now() < deadline {
            if condition().await {
                return true;
            }
            tokio::time::sleep(StdDuration::from_millis(25)).await;
        }
        condition().await
    }

    #[tokio::test]
    async fn lifecycle_survives_stop_start_cycles() {
        let harness = Harness::new();
        let service = &harness.service;

        assert!(!service.is_started());
        assert!(service.is_stopped());

        service.initialize_scheduler();
        service.initialize_scheduler(); // idempotent
        assert!(service.is_stopped());

        service.start().await.unwrap();
        assert!(service.is_started());
        assert!(!service.is_stopped());

        service.start().await.unwrap(); // no-op when started
        assert!(service.is_started());

        service.stop().await.unwrap();
        assert!(service.is_stopped());
        assert!(!service.is_started());

        service.start().await.unwrap();
        assert!(service.is_started());

        // The restarted scheduler still fires.
        harness.schedule("after-restart", "succeed", one_shot_now("after-restart")).await;
        assert!(wait_until(3_000, || harness.success("after-restart") == 1).await);
    }

    #[tokio::test]
    async fn stopped_scheduler_holds_firings_until_start() {
        let harness = Harness::new();
        harness
            .schedule("held", "succeed", one_shot_now("held"))
            .await;

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(harness.attempts("held"), 0);

        harness.service.start().await.unwrap();
        assert!(wait_until(3_000, || harness.success("held") == 1).await);
    }

    #[tokio::test]
    async fn far_future_one_shot_has_no_side_effects() {
        let harness = Harness::started().await;
        harness
            .schedule("distant", "succeed", one_shot_far_future("distant"))
            .await;

        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert_eq!(harness.attempts("distant"), 0);
        assert!(harness.failed_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn schedule_search_round_trip() {
        let harness = Harness::started().await;
        let id = harness
            .schedule("roundtrip", "succeed", one_shot_far_future("roundtrip"))
            .await;

        let descriptors = harness
            .service
            .search_job_descriptors(&QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].id, id);
        assert_eq!(descriptors[0].job_name, "roundtrip");
        assert_eq!(descriptors[0].job_type, "scripted");
    }

    #[tokio::test]
    async fn schedule_rejects_unknown_job_type() {
        let harness = Harness::started().await;
        let mut txn = harness.transactions.begin().await.unwrap();
        let err = harness
            .service
            .schedule(
                &mut txn,
                "unregistered",
                "nope",
                Vec::new(),
                one_shot_now("nope"),
            )
            .await
            .unwrap_err();
        txn.rollback().await.unwrap();

        assert!(matches!(err, SchedulingError::UnknownJobType { .. }));
    }

    #[tokio::test]
    async fn schedule_rejects_invalid_cron_expression() {
        let harness = Harness::started().await;
        let mut txn = harness.transactions.begin().await.unwrap();
        let trigger = Trigger::UnixCron(UnixCronTrigger::new("bad", Utc::now(), "not a cron"));
        let err = harness
            .service
            .schedule(&mut txn, "scripted", "bad", Vec::new(), trigger)
            .await
            .unwrap_err();
        txn.rollback().await.unwrap();

        assert!(matches!(
            err,
            SchedulingError::InvalidCronExpression { .. }
        ));
    }

    #[tokio::test]
    async fn schedule_rejects_duplicate_job_name() {
        let harness = Harness::started().await;
        harness
            .schedule("taken", "succeed", one_shot_far_future("taken"))
            .await;

        let mut txn = harness.transactions.begin().await.unwrap();
        let err = harness
            .service
            .schedule(
                &mut txn,
                "scripted",
                "taken",
                Vec::new(),
                one_shot_far_future("taken"),
            )
            .await
            .unwrap_err();
        txn.rollback().await.unwrap();

        assert_eq!(
            err,
            SchedulingError::DuplicateJobName {
                job_name: "taken".to_string()
            }
        );
    }

    #[tokio::test]
    async fn rolled_back_schedule_leaves_no_job_and_no_trigger() {
        let harness = Harness::started().await;

        let mut txn = harness.transactions.begin().await.unwrap();
        harness
            .service
            .schedule(
                &mut txn,
                "scripted",
                "phantom",
                scripted_parameters("phantom", "succeed"),
                one_shot_now("phantom"),
            )
            .await
            .unwrap();
        txn.set_rollback_only();
        txn.complete().await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        assert_eq!(harness.attempts("phantom"), 0);
        let descriptors = harness
            .service
            .search_job_descriptors(&QueryOptions::default())
            .await
            .unwrap();
        assert!(descriptors.is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_job_returns_false() {
        let harness = Harness::started().await;
        assert!(!harness.service.delete("unknown-job").await.unwrap());
    }

    #[tokio::test]
    async fn delete_disarms_and_removes_job() {
        let harness = Harness::started().await;
        harness.schedule("tick", "succeed", every_second("tick")).await;
        assert!(wait_until(3_000, || harness.attempts("tick") >= 1).await);

        assert!(harness.service.delete("tick").await.unwrap());
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        let frozen = harness.attempts("tick");
        tokio::time::sleep(StdDuration::from_millis(1_500)).await;
        assert_eq!(harness.attempts("tick"), frozen);

        let descriptors = harness
            .service
            .search_job_descriptors(&QueryOptions::default())
            .await
            .unwrap();
        assert!(descriptors.is_empty());
    }

    #[tokio::test]
    async fn delete_jobs_clears_only_current_tenant() {
        let harness = Harness::started().await;
        let tenant_a = harness.session.tenant_id();
        let tenant_b = TenantId::new();

        harness
            .schedule("job-a", "succeed", one_shot_far_future("job-a"))
            .await;
        harness.session.set_tenant_id(tenant_b);
        harness
            .schedule("job-b", "succeed", one_shot_far_future("job-b"))
            .await;

        harness.session.set_tenant_id(tenant_a);
        harness.service.delete_jobs().await.unwrap();

        let a_jobs = harness
            .service
            .search_job_descriptors(&QueryOptions::default())
            .await
            .unwrap();
        assert!(a_jobs.is_empty());

        harness.session.set_tenant_id(tenant_b);
        let b_jobs = harness
            .service
            .search_job_descriptors(&QueryOptions::default())
            .await
            .unwrap();
        assert_eq!(b_jobs.len(), 1);
    }

    #[tokio::test]
    async fn paused_tenant_is_silent_while_active_tenant_fires() {
        let harness = Harness::started().await;
        let tenant_a = harness.session.tenant_id();
        let tenant_b = TenantId::new();

        harness.schedule("tick-a", "succeed", every_second("tick-a")).await;
        assert!(wait_until(3_000, || harness.attempts("tick-a") >= 1).await);

        harness.service.pause_jobs(tenant_a).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(300)).await;
        let frozen = harness.attempts("tick-a");

        harness.session.set_tenant_id(tenant_b);
        harness.schedule("once-b", "succeed", one_shot_now("once-b")).await;

        tokio::time::sleep(StdDuration::from_millis(1_500)).await;
        assert_eq!(
            harness.attempts("tick-a"),
            frozen,
            "paused tenant must not fire"
        );
        assert_eq!(harness.success("once-b"), 1, "active tenant fires on time");

        harness.service.resume_jobs(tenant_a).await.unwrap();
        assert!(wait_until(3_000, || harness.attempts("tick-a") > frozen).await);
    }

    #[tokio::test]
    async fn fatal_error_is_recorded_with_its_message() {
        let harness = Harness::started().await;
        harness.schedule("doomed", "panic", one_shot_now("doomed")).await;

        assert!(
            wait_until_async(3_000, || async { harness.failed_jobs().await.len() == 1 }).await
        );
        let failed = harness.failed_jobs().await;
        assert_eq!(failed[0].number_of_failures, 1);
        assert!(failed[0].last_message.contains("deliberate fatal error"));
        assert_eq!(failed[0].job_name, "doomed");

        // No automatic retry of a recorded failure.
        tokio::time::sleep(StdDuration::from_millis(500)).await;
        assert_eq!(harness.attempts("doomed"), 1);
    }

    #[tokio::test]
    async fn business_failure_is_cleared_by_explicit_retry() {
        let harness = Harness::started().await;
        let id = harness.schedule("mailer", "fail", one_shot_now("mailer")).await;

        assert!(
            wait_until_async(3_000, || async { harness.failed_jobs().await.len() == 1 }).await
        );
        let failed = harness.failed_jobs().await;
        assert_eq!(failed[0].number_of_failures, 1);
        assert!(failed[0].last_message.contains("deliberate business failure"));

        harness.retry(id, "mailer", "succeed").await;
        assert!(wait_until(3_000, || harness.success("mailer") == 1).await);
        assert!(
            wait_until_async(3_000, || async { harness.failed_jobs().await.is_empty() }).await
        );
    }

    #[tokio::test]
    async fn recurring_failures_accumulate_in_one_record() {
        let harness = Harness::started().await;
        let id = harness.schedule("relay", "fail", every_second("relay")).await;

        assert!(
            wait_until_async(6_000, || async {
                let failed = harness.failed_jobs().await;
                failed.len() == 1 && failed[0].number_of_failures > 1
            })
            .await
        );

        harness.retry(id, "relay", "succeed").await;
        assert!(
            wait_until_async(3_000, || async { harness.failed_jobs().await.is_empty() }).await
        );
        assert!(wait_until(4_000, || harness.success("relay") > 1).await);
        assert!(harness.failed_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn failure_record_survives_unrelated_later_success() {
        let harness = Harness::started().await;
        harness.schedule("wobbly", "fail-once", every_second("wobbly")).await;

        assert!(wait_until(4_000, || harness.success("wobbly") >= 1).await);

        // The later successful ticks do not clear the recorded failure;
        // only an explicit retry does.
        let failed = harness.failed_jobs().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].number_of_failures, 1);
        assert!(failed[0].last_message.contains("first attempt failed"));
    }

    #[tokio::test]
    async fn retryable_failure_is_invisible() {
        let harness = Harness::started().await;
        harness
            .schedule("flaky", "retryable-once", one_shot_now("flaky"))
            .await;

        assert!(wait_until(3_000, || harness.success("flaky") == 1).await);
        assert_eq!(harness.attempts("flaky"), 2);
        assert_eq!(harness.counters.get("flaky.transient"), 1);
        assert!(harness.failed_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn retry_of_unknown_descriptor_fails() {
        let harness = Harness::started().await;
        let mut txn = harness.transactions.begin().await.unwrap();
        let err = harness
            .service
            .retry_job_that_failed(&mut txn, JobDescriptorId::new(), Vec::new())
            .await
            .unwrap_err();
        txn.rollback().await.unwrap();

        assert!(matches!(err, SchedulingError::JobNotFound { .. }));
    }

    #[tokio::test]
    async fn tenants_only_see_their_own_failures() {
        let harness = Harness::started().await;
        let tenant_a = harness.session.tenant_id();
        let tenant_b = TenantId::new();

        harness.schedule("broken-a", "fail", one_shot_now("broken-a")).await;
        assert!(
            wait_until_async(3_000, || async { harness.failed_jobs().await.len() == 1 }).await
        );

        harness.session.set_tenant_id(tenant_b);
        assert!(harness.failed_jobs().await.is_empty());

        harness.session.set_tenant_id(tenant_a);
        assert_eq!(harness.failed_jobs().await.len(), 1);
    }
}
