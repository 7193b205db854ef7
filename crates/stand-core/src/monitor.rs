//! Polling a provider job to a terminal status

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gitlab_provider::CiProvider;
use stand_state::{Job, JobStatus, StandStore};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::cache::JobStatusCache;
use crate::error::{EngineError, EngineResult};

#[derive(Clone)]
pub struct JobMonitor {
    store: Arc<dyn StandStore>,
    provider: Arc<dyn CiProvider>,
    cache: JobStatusCache,
    poll_interval: Duration,
}

impl JobMonitor {
    pub fn new(
        store: Arc<dyn StandStore>,
        provider: Arc<dyn CiProvider>,
        cache: JobStatusCache,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            cache,
            poll_interval,
        }
    }

    /// Poll until the job is terminal. The first poll is immediate.
    ///
    /// Status changes are written to the store; repeated identical statuses
    /// are not. A terminal status also records `finished_at`. `failed` and
    /// `canceled` return [`EngineError::JobFailed`].
    #[instrument(skip_all, fields(job = job.external_id, name = %job.name))]
    pub async fn watch(&self, job: &Job) -> EngineResult<JobStatus> {
        let external_id = job.external_id;
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let status = match self.provider.job_status(external_id).await {
                Ok(status) => status,
                Err(err) => {
                    self.cache.clear(external_id);
                    warn!(error = %err, "job status poll failed");
                    return Err(err.into());
                }
            };

            if self.cache.is_new(external_id, status) {
                if let Err(err) = self.store.set_job_status(job.id, status).await {
                    self.cache.clear(external_id);
                    return Err(err.into());
                }
                self.cache.record(external_id, status);
                debug!(%status, "job status changed");
            }

            if !status.is_terminal() {
                continue;
            }

            self.cache.clear(external_id);
            self.store.mark_job_finished(job.id, Utc::now()).await?;
            if status.is_failure() {
                warn!(%status, "job did not succeed");
                return Err(EngineError::JobFailed {
                    job: external_id,
                    status,
                });
            }
            info!("job succeeded");
            return Ok(status);
        }
    }
}
