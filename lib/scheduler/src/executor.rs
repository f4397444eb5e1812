//! The fire-at-time mechanism wrapped by the scheduler service.
//!
//! The executor knows nothing about tenancy rules or persistence: it arms
//! opaque fire requests against triggers, groups them so whole groups can
//! be paused and resumed, and invokes a single [`FireHandler`] when a
//! trigger comes due. The handler's disposition decides whether the same
//! firing is transparently re-fired (transient failures) or finished.
//!
//! [`TokioSchedulerExecutor`] runs one task per armed trigger. Tasks fire
//! only while the executor is started; stopping flips a watch flag instead
//! of aborting tasks, so an in-flight execution is never interrupted and
//! `start` after `stop` re-arms everything that is still registered. A
//! cron task awaits the handler before computing its next tick, so
//! consecutive firings of one trigger never overlap; tasks of different
//! triggers run concurrently.

use crate::error::ExecutorError;
use crate::trigger::{OneShotTrigger, Trigger, TriggerKind, UnixCronTrigger};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use iron_cadence_core::{JobDescriptorId, TenantId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What the executor hands the fire handler when a trigger comes due.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FireRequest {
    /// Tenant (group) the firing belongs to.
    pub tenant_id: TenantId,
    /// Descriptor to load and execute.
    pub descriptor_id: JobDescriptorId,
    /// Scheduling key of the job, for lookups and logging.
    pub job_name: String,
    /// Set on explicit retries: a successful execution then clears the
    /// job's failure record.
    pub clears_failure_on_success: bool,
}

/// Outcome of one handler invocation, as far as the executor cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireDisposition {
    /// The firing is finished, either a success or a recorded failure.
    Completed,
    /// Transient failure; re-fire the same firing.
    RetryRequested,
}

/// Callback invoked by the executor when a trigger comes due.
#[async_trait]
pub trait FireHandler: Send + Sync {
    /// Executes one firing.
    async fn fire(&self, request: &FireRequest) -> FireDisposition;
}

/// The underlying fire-at-time contract consumed by the scheduler service.
#[async_trait]
pub trait SchedulerExecutor: Send + Sync {
    /// Allows registered triggers to fire.
    async fn start(&self) -> Result<(), ExecutorError>;

    /// Prevents any pending or future firing until the next `start`.
    /// Registrations survive; an in-flight execution is not interrupted.
    async fn stop(&self) -> Result<(), ExecutorError>;

    /// Returns whether firings are currently allowed.
    fn is_started(&self) -> bool;

    /// Arms a trigger for the request's tenant group. A registration under
    /// the same `(tenant, job_name)` replaces the previous one.
    async fn register(&self, trigger: Trigger, request: FireRequest) -> Result<(), ExecutorError>;

    /// Disarms a trigger. Returns false when nothing was registered.
    async fn unregister(&self, tenant_id: TenantId, job_name: &str)
    -> Result<bool, ExecutorError>;

    /// Disarms every trigger of a tenant, returning how many went.
    async fn unregister_group(&self, tenant_id: TenantId) -> Result<u64, ExecutorError>;

    /// Suspends firing for a tenant's triggers. In-flight executions are
    /// not aborted; firings that come due while paused are skipped.
    async fn pause_group(&self, tenant_id: TenantId) -> Result<(), ExecutorError>;

    /// Lifts a tenant's suspension.
    async fn resume_group(&self, tenant_id: TenantId) -> Result<(), ExecutorError>;

    /// Returns the shape of the registered trigger, if any.
    fn registered_kind(&self, tenant_id: TenantId, job_name: &str) -> Option<TriggerKind>;

    /// Immediately re-fires a registered one-shot trigger as an explicit
    /// retry. A recurring registration is left to its own schedule.
    /// Returns false when nothing is registered under the name.
    async fn fire_now(&self, tenant_id: TenantId, job_name: &str) -> Result<bool, ExecutorError>;
}

/// Tuning knobs for [`TokioSchedulerExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// How many immediate re-fires a transient failure gets before the
    /// firing is abandoned.
    pub max_transient_retries: u32,
    /// Delay between transient re-fires.
    pub transient_retry_delay: StdDuration,
    /// How often a due-but-paused one-shot firing rechecks its group.
    pub pause_poll_interval: StdDuration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: 5,
            transient_retry_delay: StdDuration::from_millis(50),
            pause_poll_interval: StdDuration::from_millis(25),
        }
    }
}

struct Registration {
    trigger: Trigger,
    request: FireRequest,
    /// One-shot trigger that already fired or misfired. Kept so explicit
    /// retries can still resolve and re-fire it.
    completed: bool,
}

#[derive(Default)]
struct GroupState {
    paused: bool,
    entries: HashMap<String, Registration>,
}

#[derive(Default)]
struct Inner {
    groups: HashMap<TenantId, GroupState>,
    tasks: HashMap<(TenantId, String), JoinHandle<()>>,
}

/// Tokio-task based executor.
pub struct TokioSchedulerExecutor {
    inner: Arc<Mutex<Inner>>,
    handler: Arc<dyn FireHandler>,
    config: ExecutorConfig,
    started_tx: watch::Sender<bool>,
}

impl TokioSchedulerExecutor {
    /// Creates a stopped executor dispatching to the given handler.
    #[must_use]
    pub fn new(handler: Arc<dyn FireHandler>, config: ExecutorConfig) -> Self {
        let (started_tx, _) = watch::channel(false);
        Self {
            inner: Arc::default(),
            handler,
            config,
            started_tx,
        }
    }

    fn spawn_trigger_task(
        &self,
        tenant_id: TenantId,
        job_name: String,
        trigger: Trigger,
        request: FireRequest,
    ) {
        let inner = Arc::clone(&self.inner);
        let handler = Arc::clone(&self.handler);
        let config = self.config.clone();
        let started = self.started_tx.subscribe();
        let key = (tenant_id, job_name.clone());

        let handle = tokio::spawn(async move {
            match trigger {
                Trigger::OneShot(t) => {
                    run_one_shot(&inner, handler, config, started, tenant_id, &job_name, t, request)
                        .await;
                }
                Trigger::UnixCron(t) => {
                    run_cron(&inner, handler, config, started, tenant_id, &job_name, t, request)
                        .await;
                }
            }
            let mut inner = inner.lock().expect("executor state lock poisoned");
            inner.tasks.remove(&(tenant_id, job_name));
        });

        let mut inner = self.inner.lock().expect("executor state lock poisoned");
        inner.tasks.insert(key, handle);
    }
}

#[async_trait]
impl SchedulerExecutor for TokioSchedulerExecutor {
    async fn start(&self) -> Result<(), ExecutorError> {
        self.started_tx.send_replace(true);
        tracing::info!("scheduler executor started");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ExecutorError> {
        self.started_tx.send_replace(false);
        tracing::info!("scheduler executor stopped");
        Ok(())
    }

    fn is_started(&self) -> bool {
        *self.started_tx.borrow()
    }

    async fn register(&self, trigger: Trigger, request: FireRequest) -> Result<(), ExecutorError> {
        let tenant_id = request.tenant_id;
        let job_name = request.job_name.clone();
        {
            let mut inner = self.inner.lock().expect("executor state lock poisoned");
            if let Some(stale) = inner.tasks.remove(&(tenant_id, job_name.clone())) {
                stale.abort();
            }
            let group = inner.groups.entry(tenant_id).or_default();
            group.entries.insert(
                job_name.clone(),
                Registration {
                    trigger: trigger.clone(),
                    request: request.clone(),
                    completed: false,
                },
            );
        }
        tracing::debug!(
            tenant = %tenant_id,
            job_name = %job_name,
            trigger = %trigger.name(),
            "armed trigger"
        );
        self.spawn_trigger_task(tenant_id, job_name, trigger, request);
        Ok(())
    }

    async fn unregister(
        &self,
        tenant_id: TenantId,
        job_name: &str,
    ) -> Result<bool, ExecutorError> {
        let mut inner = self.inner.lock().expect("executor state lock poisoned");
        let removed = inner
            .groups
            .get_mut(&tenant_id)
            .is_some_and(|group| group.entries.remove(job_name).is_some());
        if let Some(handle) = inner.tasks.remove(&(tenant_id, job_name.to_string())) {
            handle.abort();
        }
        Ok(removed)
    }

    async fn unregister_group(&self, tenant_id: TenantId) -> Result<u64, ExecutorError> {
        let mut inner = self.inner.lock().expect("executor state lock poisoned");
        let count = inner
            .groups
            .remove(&tenant_id)
            .map(|group| group.entries.len() as u64)
            .unwrap_or(0);
        let keys: Vec<_> = inner
            .tasks
            .keys()
            .filter(|(tenant, _)| *tenant == tenant_id)
            .cloned()
            .collect();
        for key in keys {
            if let Some(handle) = inner.tasks.remove(&key) {
                handle.abort();
            }
        }
        Ok(count)
    }

    async fn pause_group(&self, tenant_id: TenantId) -> Result<(), ExecutorError> {
        let mut inner = self.inner.lock().expect("executor state lock poisoned");
        inner.groups.entry(tenant_id).or_default().paused = true;
        tracing::info!(tenant = %tenant_id, "paused job group");
        Ok(())
    }

    async fn resume_group(&self, tenant_id: TenantId) -> Result<(), ExecutorError> {
        let mut inner = self.inner.lock().expect("executor state lock poisoned");
        inner.groups.entry(tenant_id).or_default().paused = false;
        tracing::info!(tenant = %tenant_id, "resumed job group");
        Ok(())
    }

    fn registered_kind(&self, tenant_id: TenantId, job_name: &str) -> Option<TriggerKind> {
        let inner = self.inner.lock().expect("executor state lock poisoned");
        inner
            .groups
            .get(&tenant_id)
            .and_then(|group| group.entries.get(job_name))
            .map(|registration| registration.trigger.kind())
    }

    async fn fire_now(&self, tenant_id: TenantId, job_name: &str) -> Result<bool, ExecutorError> {
        if !self.is_started() {
            return Err(ExecutorError::NotStarted);
        }
        let registration = {
            let inner = self.inner.lock().expect("executor state lock poisoned");
            inner
                .groups
                .get(&tenant_id)
                .and_then(|group| group.entries.get(job_name))
                .map(|r| (r.trigger.kind(), r.request.clone()))
        };
        let Some((kind, request)) = registration else {
            return Ok(false);
        };

        if kind == TriggerKind::Recurring {
            // The recurrence keeps producing firings on its own schedule.
            return Ok(true);
        }

        let request = FireRequest {
            clears_failure_on_success: true,
            ..request
        };
        let handler = Arc::clone(&self.handler);
        let config = self.config.clone();
        tracing::debug!(tenant = %tenant_id, job_name = %job_name, "re-firing one-shot trigger");
        tokio::spawn(async move {
            fire_with_retries(handler.as_ref(), &config, &request).await;
        });
        Ok(true)
    }
}

fn is_paused(inner: &Mutex<Inner>, tenant_id: TenantId) -> bool {
    inner
        .lock()
        .expect("executor state lock poisoned")
        .groups
        .get(&tenant_id)
        .map(|group| group.paused)
        .unwrap_or(false)
}

fn mark_completed(inner: &Mutex<Inner>, tenant_id: TenantId, job_name: &str) {
    let mut inner = inner.lock().expect("executor state lock poisoned");
    if let Some(group) = inner.groups.get_mut(&tenant_id)
        && let Some(registration) = group.entries.get_mut(job_name)
    {
        registration.completed = true;
    }
}

async fn sleep_until_instant(at: DateTime<Utc>) {
    let now = Utc::now();
    if at > now
        && let Ok(wait) = (at - now).to_std()
    {
        tokio::time::sleep(wait).await;
    }
}

/// Blocks until the executor is started. Returns false when the executor
/// itself is gone.
async fn wait_until_started(started: &mut watch::Receiver<bool>) -> bool {
    started.wait_for(|s| *s).await.is_ok()
}

async fn fire_with_retries(handler: &dyn FireHandler, config: &ExecutorConfig, request: &FireRequest) {
    let mut attempts = 0u32;
    loop {
        match handler.fire(request).await {
            FireDisposition::Completed => return,
            FireDisposition::RetryRequested if attempts < config.max_transient_retries => {
                attempts += 1;
                tracing::debug!(
                    job_name = %request.job_name,
                    attempt = attempts,
                    "re-firing after transient failure"
                );
                tokio::time::sleep(config.transient_retry_delay).await;
            }
            FireDisposition::RetryRequested => {
                tracing::warn!(
                    job_name = %request.job_name,
                    "transient retries exhausted, abandoning firing"
                );
                return;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_one_shot(
    inner: &Mutex<Inner>,
    handler: Arc<dyn FireHandler>,
    config: ExecutorConfig,
    mut started: watch::Receiver<bool>,
    tenant_id: TenantId,
    job_name: &str,
    trigger: OneShotTrigger,
    request: FireRequest,
) {
    sleep_until_instant(trigger.fire_at).await;
    if !wait_until_started(&mut started).await {
        return;
    }
    while is_paused(inner, tenant_id) {
        tokio::time::sleep(config.pause_poll_interval).await;
    }

    // Time spent stopped or paused counts toward the misfire threshold.
    if trigger.is_misfired(Utc::now()) {
        tracing::warn!(
            tenant = %tenant_id,
            job_name = %job_name,
            trigger = %trigger.name,
            "one-shot firing misfired, skipping"
        );
        mark_completed(inner, tenant_id, job_name);
        return;
    }

    tracing::debug!(tenant = %tenant_id, job_name = %job_name, "firing one-shot trigger");
    fire_with_retries(handler.as_ref(), &config, &request).await;
    mark_completed(inner, tenant_id, job_name);
}

#[allow(clippy::too_many_arguments)]
async fn run_cron(
    inner: &Mutex<Inner>,
    handler: Arc<dyn FireHandler>,
    config: ExecutorConfig,
    mut started: watch::Receiver<bool>,
    tenant_id: TenantId,
    job_name: &str,
    trigger: UnixCronTrigger,
    request: FireRequest,
) {
    let schedule = match trigger.schedule() {
        Ok(schedule) => schedule,
        Err(e) => {
            tracing::error!(error = %e, job_name = %job_name, "unschedulable cron trigger");
            return;
        }
    };

    loop {
        let Some(next) = trigger.next_fire_after(&schedule, Utc::now()) else {
            tracing::debug!(job_name = %job_name, "cron schedule exhausted");
            return;
        };
        sleep_until_instant(next).await;

        if !*started.borrow() {
            if !wait_until_started(&mut started).await {
                return;
            }
            // Ticks missed while stopped are skipped, not run late.
            continue;
        }
        if is_paused(inner, tenant_id) {
            continue;
        }

        // Awaiting the handler keeps consecutive firings of this trigger
        // strictly sequential.
        fire_with_retries(handler.as_ref(), &config, &request).await;
    }
}
