//! Centralized daemon configuration.
//!
//! This module provides strongly-typed configuration for the scheduler
//! daemon, loaded via the `config` crate from environment variables
//! (`STORAGE__BACKEND`, `HEARTBEAT__CRON`, ...).

use iron_cadence_scheduler::ExecutorConfig;
use serde::Deserialize;
use std::time::Duration;

/// Daemon configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct SchedulerDaemonConfig {
    /// Persistence backend selection.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Executor tuning.
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Built-in heartbeat job.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// Which store backs the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// In-process store; state dies with the daemon.
    #[default]
    Memory,
    /// PostgreSQL store; state survives restarts.
    Postgres,
}

/// Storage-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StorageBackend,

    /// PostgreSQL connection URL; required for the postgres backend.
    pub database_url: Option<String>,

    /// Connection pool size for the postgres backend.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            database_url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Executor tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSettings {
    /// How many immediate re-fires a transient failure gets.
    #[serde(default = "default_max_transient_retries")]
    pub max_transient_retries: u32,

    /// Delay between transient re-fires, in milliseconds.
    #[serde(default = "default_transient_retry_delay_ms")]
    pub transient_retry_delay_ms: u64,
}

fn default_max_transient_retries() -> u32 {
    5
}

fn default_transient_retry_delay_ms() -> u64 {
    250
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_transient_retries: default_max_transient_retries(),
            transient_retry_delay_ms: default_transient_retry_delay_ms(),
        }
    }
}

impl ExecutorSettings {
    /// Converts the settings into an executor configuration.
    #[must_use]
    pub fn to_executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_transient_retries: self.max_transient_retries,
            transient_retry_delay: Duration::from_millis(self.transient_retry_delay_ms),
            ..ExecutorConfig::default()
        }
    }
}

/// Heartbeat job configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatConfig {
    /// Whether to schedule the heartbeat job at startup.
    #[serde(default = "default_heartbeat_enabled")]
    pub enabled: bool,

    /// Cron expression for the heartbeat.
    #[serde(default = "default_heartbeat_cron")]
    pub cron: String,

    /// Message logged on each beat.
    #[serde(default = "default_heartbeat_message")]
    pub message: String,
}

fn default_heartbeat_enabled() -> bool {
    true
}

fn default_heartbeat_cron() -> String {
    // Top of every minute.
    "0 * * * * *".to_string()
}

fn default_heartbeat_message() -> String {
    "scheduler heartbeat".to_string()
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: default_heartbeat_enabled(),
            cron: default_heartbeat_cron(),
            message: default_heartbeat_message(),
        }
    }
}

impl SchedulerDaemonConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
