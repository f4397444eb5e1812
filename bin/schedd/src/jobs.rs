//! Built-in job types registered by the daemon.

use async_trait::async_trait;
use iron_cadence_job::{Job, JobFailure, JobParameterMap};

/// Logs a configurable message on every firing.
///
/// Useful as a liveness signal and as a first job to point external
/// schedules at.
#[derive(Default)]
pub struct HeartbeatJob {
    message: String,
}

#[async_trait]
impl Job for HeartbeatJob {
    fn set_attributes(&mut self, attributes: &JobParameterMap) -> Result<(), JobFailure> {
        self.message = attributes
            .get_text("message")
            .unwrap_or("scheduler heartbeat")
            .to_string();
        Ok(())
    }

    async fn execute(&mut self) -> Result<(), JobFailure> {
        tracing::info!(message = %self.message, "heartbeat");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iron_cadence_job::JobParameter;

    #[tokio::test]
    async fn heartbeat_uses_configured_message() {
        let mut job = HeartbeatJob::default();
        let parameters = vec![JobParameter::text("message", "still alive")];
        job.set_attributes(&JobParameterMap::from_parameters(&parameters))
            .unwrap();
        assert!(job.execute().await.is_ok());
    }

    #[tokio::test]
    async fn heartbeat_has_a_default_message() {
        let mut job = HeartbeatJob::default();
        job.set_attributes(&JobParameterMap::from_parameters(&[]))
            .unwrap();
        assert!(job.execute().await.is_ok());
    }
}
