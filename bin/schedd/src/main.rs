mod config;
mod jobs;

use crate::config::{SchedulerDaemonConfig, StorageBackend};
use crate::jobs::HeartbeatJob;
use chrono::Utc;
use iron_cadence_core::{Session, TenantId};
use iron_cadence_job::{JobParameter, JobRegistry};
use iron_cadence_scheduler::{
    DefaultFailureClassifier, SchedulerService, Trigger, UnixCronTrigger,
};
use iron_cadence_store::{JobStore, MemoryJobStore, PgJobStore, TransactionService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = SchedulerDaemonConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let store: Arc<dyn JobStore> = match config.storage.backend {
        StorageBackend::Memory => {
            tracing::info!("Using in-memory job store");
            Arc::new(MemoryJobStore::new())
        }
        StorageBackend::Postgres => {
            let database_url = config
                .storage
                .database_url
                .as_deref()
                .expect("STORAGE__DATABASE_URL is required for the postgres backend");

            let pool = PgPoolOptions::new()
                .max_connections(config.storage.max_connections)
                .connect(database_url)
                .await
                .expect("failed to connect to database");

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("failed to run migrations");

            Arc::new(PgJobStore::new(pool))
        }
    };

    let transactions = TransactionService::new(store);
    let tenant_id = TenantId::new();
    let session = Arc::new(Session::new(tenant_id));
    tracing::info!(tenant = %tenant_id, "Scheduler session opened");

    let mut registry = JobRegistry::new();
    registry.register("heartbeat", || Box::new(HeartbeatJob::default()));

    let service = SchedulerService::new(
        transactions.clone(),
        session,
        Arc::new(registry),
        Arc::new(DefaultFailureClassifier),
        config.executor.to_executor_config(),
    );
    service.start().await.expect("failed to start scheduler");

    if config.heartbeat.enabled {
        let trigger = Trigger::UnixCron(UnixCronTrigger::new(
            "heartbeat",
            Utc::now(),
            config.heartbeat.cron.clone(),
        ));
        let parameters = vec![JobParameter::text("message", config.heartbeat.message.clone())];

        let mut txn = transactions
            .begin()
            .await
            .expect("failed to open transaction");
        match service
            .schedule(&mut txn, "heartbeat", "heartbeat", parameters, trigger)
            .await
        {
            Ok(descriptor_id) => {
                txn.complete().await.expect("failed to commit");
                tracing::info!(
                    descriptor = %descriptor_id,
                    cron = %config.heartbeat.cron,
                    "Heartbeat scheduled"
                );
            }
            Err(e) => {
                // A previous run of a durable store may have scheduled it
                // already; anything else is a configuration problem.
                txn.rollback().await.expect("failed to roll back");
                tracing::warn!(error = %e, "Heartbeat not scheduled");
            }
        }
    }

    tracing::info!("Scheduler running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for shutdown signal");

    tracing::info!("Shutting down");
    service.stop().await.expect("failed to stop scheduler");
}
