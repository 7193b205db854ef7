//! Execution of `pending` stands
//!
//! A stand's pending pipelines run one after another, each pipeline's pending
//! steps by ascending ordinal and each step's jobs one at a time:
//! - jobs already `pending`/`running` on the provider are watched first;
//! - `manual` jobs are then played (unless a start time shows they were
//!   already played before a restart) and watched to completion.
//!
//! The first job failure marks its step, pipeline and stand `error` and
//! halts the stand. Every closed step appends a notification. Transient
//! provider or store failures instead revert the stand to `pending` through
//! the recovery transaction so the next tick resumes it. A `pending` stand
//! with no pending pipeline takes the status of its last finished pipeline.

use std::sync::Arc;

use chrono::Utc;
use gitlab_provider::CiProvider;
use stand_state::{
    Job, JobStatus, NewStepState, Pipeline, RunStatus, Stand, StandStatus, StandStore, Step,
    StepOutcome,
};
use tracing::{error, info, instrument, warn};

use crate::error::{EngineError, EngineResult};
use crate::monitor::JobMonitor;

/// What one execution pass did to a stand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Execution {
    /// No pipeline has finished yet; the stand was left untouched.
    Idle,
    /// No pending pipeline; the stand took the status of its last finished one.
    Settled(StandStatus),
    /// Every pending pipeline succeeded; the stand is `success`.
    Succeeded,
}

#[derive(Clone)]
pub struct StandExecutor {
    store: Arc<dyn StandStore>,
    provider: Arc<dyn CiProvider>,
    monitor: JobMonitor,
}

impl StandExecutor {
    pub fn new(
        store: Arc<dyn StandStore>,
        provider: Arc<dyn CiProvider>,
        monitor: JobMonitor,
    ) -> Self {
        Self {
            store,
            provider,
            monitor,
        }
    }

    #[instrument(skip_all, fields(stand = %stand.name))]
    pub async fn execute(&self, stand: &Stand) -> EngineResult<Execution> {
        let pipelines = self.store.pending_pipelines(stand.id).await?;
        if pipelines.is_empty() {
            return self.settle(stand).await;
        }

        self.store
            .set_stand_status(stand.id, StandStatus::Running)
            .await?;
        info!(pipelines = pipelines.len(), "stand running");

        for pipeline in &pipelines {
            if let Err(err) = self.run_pipeline(stand, pipeline).await {
                return Err(self.abort_stand(stand, pipeline, err).await);
            }
        }

        if let Err(err) = self
            .store
            .set_stand_status(stand.id, StandStatus::Success)
            .await
        {
            return Err(self.revert_stand(stand, err.into()).await);
        }
        info!("stand succeeded");
        Ok(Execution::Succeeded)
    }

    /// Give a stand with nothing left to run the status of its last finished
    /// pipeline, e.g. one reverted after its final write failed.
    async fn settle(&self, stand: &Stand) -> EngineResult<Execution> {
        let pipelines = self.store.pipelines_for_stand(stand.id).await?;
        let last = pipelines.iter().rev().find_map(|pipeline| match pipeline.status {
            RunStatus::Success => Some(StandStatus::Success),
            RunStatus::Error => Some(StandStatus::Error),
            _ => None,
        });
        let Some(status) = last else {
            info!("stand has no pending pipelines");
            return Ok(Execution::Idle);
        };
        // still `pending` if this write fails, so the next tick retries it
        self.store.set_stand_status(stand.id, status).await?;
        info!(status = %status, "stand settled from its last pipeline");
        Ok(Execution::Settled(status))
    }

    /// Return the stand to `pending` after a transient failure so the next
    /// tick resumes it. Other errors pass through unchanged.
    async fn revert_stand(&self, stand: &Stand, err: EngineError) -> EngineError {
        if err.is_transient() {
            warn!(error = %err, "transient failure, returning stand to pending");
            if let Err(revert) = self.store.recover_stand(stand.id).await {
                error!(error = %revert, "could not revert stand");
            }
        }
        err
    }

    /// Transient failures revert the stand for the next tick; anything else
    /// marks the pipeline and the stand `error`. Write failures are logged so
    /// the original error still reaches the caller.
    async fn abort_stand(
        &self,
        stand: &Stand,
        pipeline: &Pipeline,
        err: EngineError,
    ) -> EngineError {
        if err.is_transient() {
            return self.revert_stand(stand, err).await;
        }

        error!(error = %err, pipeline = pipeline.external_id, "stand failed");
        let writes = async {
            self.store
                .set_pipeline_status(pipeline.id, RunStatus::Error)
                .await?;
            self.store
                .set_stand_status(stand.id, StandStatus::Error)
                .await
        };
        if let Err(write) = writes.await {
            error!(error = %write, "could not record stand failure");
        }
        err
    }

    #[instrument(skip_all, fields(pipeline = pipeline.external_id))]
    async fn run_pipeline(&self, stand: &Stand, pipeline: &Pipeline) -> EngineResult<()> {
        let steps = self.store.pending_steps(pipeline.id).await?;
        self.store
            .set_pipeline_status(pipeline.id, RunStatus::Running)
            .await?;

        for step in &steps {
            match self.run_step(step).await {
                Ok(()) => {
                    // A step only leaves `running` once its notification is stored.
                    self.store
                        .append_step_state(NewStepState::for_step(
                            stand,
                            step,
                            StepOutcome::Success,
                        ))
                        .await?;
                    self.store
                        .set_step_status(step.id, RunStatus::Success)
                        .await?;
                    info!(step = %step.name, "step succeeded");
                }
                Err(err) if err.is_transient() => return Err(err),
                Err(err) => {
                    self.fail_step(stand, step).await;
                    return Err(err);
                }
            }
        }

        self.store
            .set_pipeline_status(pipeline.id, RunStatus::Success)
            .await?;
        info!("pipeline succeeded");
        Ok(())
    }

    async fn fail_step(&self, stand: &Stand, step: &Step) {
        error!(step = %step.name, "step failed");
        let writes = async {
            self.store
                .set_step_status(step.id, RunStatus::Error)
                .await?;
            self.store
                .append_step_state(NewStepState::for_step(stand, step, StepOutcome::Error))
                .await
        };
        if let Err(write) = writes.await {
            error!(error = %write, "could not record step failure");
        }
    }

    #[instrument(skip_all, fields(step = %step.name, ordinal = step.ordinal))]
    async fn run_step(&self, step: &Step) -> EngineResult<()> {
        let jobs = self.store.unfinished_jobs(step.id).await?;
        if let Some(failed) = jobs.iter().find(|job| job.status.is_failure()) {
            return Err(EngineError::StepFailed {
                step: step.name.clone(),
                job: failed.external_id,
                status: failed.status,
            });
        }

        self.store
            .set_step_status(step.id, RunStatus::Running)
            .await?;

        let (in_flight, manual): (Vec<&Job>, Vec<&Job>) = jobs
            .iter()
            .partition(|job| matches!(job.status, JobStatus::Pending | JobStatus::Running));

        for job in in_flight {
            // Recovery resets unfinished jobs to `manual`; a start time keeps
            // an auto-started job from being played afterwards.
            if job.started_at.is_none() {
                self.store.mark_job_started(job.id, Utc::now()).await?;
            }
            self.monitor.watch(job).await?;
        }
        for job in manual {
            self.play(job).await?;
            self.monitor.watch(job).await?;
        }
        Ok(())
    }

    /// Trigger a manual job unless it was already started.
    async fn play(&self, job: &Job) -> EngineResult<()> {
        if job.started_at.is_some() {
            info!(job = job.external_id, "job already started, resuming watch");
            return Ok(());
        }
        self.provider.run_job(job.external_id).await?;
        self.store.mark_job_started(job.id, Utc::now()).await?;
        info!(job = job.external_id, name = %job.name, "job triggered");
        Ok(())
    }
}
