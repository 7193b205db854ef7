//! In-memory store (testing and local runs)
//!
//! `MemoryStandStore` satisfies the [`StandStore`] contract without any
//! external dependency. Every method takes a single lock, so the
//! transactional writes are trivially atomic.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::*;
use crate::store::{StandStore, StoreResult};

#[derive(Debug, Default)]
struct Tables {
    stands: Vec<Stand>,
    pipelines: Vec<Pipeline>,
    steps: Vec<Step>,
    jobs: Vec<Job>,
    step_states: Vec<StepState>,
    /// Stand names whose `recover_stand` must fail.
    failing_recoveries: HashSet<String>,
}

impl Tables {
    fn stand_mut(&mut self, id: Uuid) -> StoreResult<&mut Stand> {
        self.stands
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::not_found("stand", id.to_string()))
    }
}

/// In-memory stand store backed by `Vec`s in insertion order.
#[derive(Debug, Default)]
pub struct MemoryStandStore {
    tables: Mutex<Tables>,
}

impl MemoryStandStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `recover_stand` for `stand_name` fail with a
    /// transaction error, leaving its rows untouched.
    pub fn fail_recovery_of(&self, stand_name: &str) {
        self.lock().failing_recoveries.insert(stand_name.to_string());
    }

    /// Snapshot of every job of every stand (test inspection).
    pub fn all_jobs(&self) -> Vec<Job> {
        self.lock().jobs.clone()
    }

    /// Snapshot of every step notification, delivered or not.
    pub fn all_step_states(&self) -> Vec<StepState> {
        self.lock().step_states.clone()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl StandStore for MemoryStandStore {
    async fn create_stand(&self, stand: NewStand) -> StoreResult<Stand> {
        let mut tables = self.lock();
        if tables.stands.iter().any(|s| s.name == stand.name) {
            return Err(StoreError::Conflict(format!(
                "stand {} already exists",
                stand.name
            )));
        }
        let now = Utc::now();
        let record = Stand {
            id: Uuid::new_v4(),
            name: stand.name,
            user_id: stand.user_id,
            products: stand.products,
            git_ref: stand.git_ref,
            status: StandStatus::Created,
            created_at: now,
            updated_at: now,
        };
        tables.stands.push(record.clone());
        Ok(record)
    }

    async fn stands_with_status(&self, status: StandStatus) -> StoreResult<Vec<Stand>> {
        let tables = self.lock();
        Ok(tables
            .stands
            .iter()
            .filter(|s| s.status == status)
            .cloned()
            .collect())
    }

    async fn stand_by_name(&self, name: &str) -> StoreResult<Option<Stand>> {
        let tables = self.lock();
        Ok(tables.stands.iter().find(|s| s.name == name).cloned())
    }

    async fn list_stands(&self) -> StoreResult<Vec<Stand>> {
        Ok(self.lock().stands.clone())
    }

    async fn stand_products(&self, name: &str) -> StoreResult<Vec<String>> {
        let tables = self.lock();
        tables
            .stands
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.products.clone())
            .ok_or_else(|| StoreError::not_found("stand", name))
    }

    async fn set_stand_status(&self, stand_id: Uuid, status: StandStatus) -> StoreResult<()> {
        let mut tables = self.lock();
        let stand = tables.stand_mut(stand_id)?;
        stand.status = status;
        stand.updated_at = Utc::now();
        Ok(())
    }

    async fn recover_stand(&self, stand_id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock();
        let name = tables.stand_mut(stand_id)?.name.clone();
        if tables.failing_recoveries.contains(&name) {
            return Err(StoreError::Transaction(format!(
                "recovery of stand {name} rolled back"
            )));
        }

        let now = Utc::now();
        let stand = tables.stand_mut(stand_id)?;
        stand.status = StandStatus::Pending;
        stand.updated_at = now;

        let pipeline_ids: HashSet<Uuid> = tables
            .pipelines
            .iter()
            .filter(|p| p.stand_id == stand_id)
            .map(|p| p.id)
            .collect();
        let running_steps: HashSet<Uuid> = tables
            .steps
            .iter()
            .filter(|s| pipeline_ids.contains(&s.pipeline_id) && s.status == RunStatus::Running)
            .map(|s| s.id)
            .collect();

        for job in tables.jobs.iter_mut() {
            if running_steps.contains(&job.step_id) && job.status != JobStatus::Success {
                job.status = JobStatus::Manual;
            }
        }
        for step in tables.steps.iter_mut() {
            if running_steps.contains(&step.id) {
                step.status = RunStatus::Pending;
            }
        }
        for pipeline in tables.pipelines.iter_mut() {
            if pipeline.stand_id == stand_id && pipeline.status == RunStatus::Running {
                pipeline.status = RunStatus::Pending;
                pipeline.updated_at = now;
            }
        }
        Ok(())
    }

    async fn record_provisioning(
        &self,
        stand_id: Uuid,
        provisioned: ProvisionedPipeline,
    ) -> StoreResult<Pipeline> {
        let mut tables = self.lock();
        let stand = tables.stand_mut(stand_id)?;
        if stand.status != StandStatus::Created {
            return Err(StoreError::Conflict(format!(
                "stand {} is {}, expected created",
                stand.name, stand.status
            )));
        }
        let now = Utc::now();
        stand.status = StandStatus::Pending;
        stand.updated_at = now;

        let pipeline = Pipeline {
            id: Uuid::new_v4(),
            stand_id,
            name: provisioned.name,
            external_id: provisioned.external_id,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        tables.pipelines.push(pipeline.clone());

        for planned in provisioned.steps {
            let step = Step {
                id: Uuid::new_v4(),
                pipeline_id: pipeline.id,
                name: planned.kind.title().to_string(),
                description: planned.kind.description().to_string(),
                ordinal: planned.kind.ordinal(),
                status: RunStatus::Pending,
            };
            for job in planned.jobs {
                tables.jobs.push(Job {
                    id: Uuid::new_v4(),
                    step_id: step.id,
                    external_id: job.external_id,
                    name: job.name,
                    stage: job.stage,
                    ordinal: job.ordinal,
                    status: job.status,
                    started_at: None,
                    finished_at: None,
                });
            }
            tables.steps.push(step);
        }
        Ok(pipeline)
    }

    async fn pending_pipelines(&self, stand_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        let tables = self.lock();
        Ok(tables
            .pipelines
            .iter()
            .filter(|p| p.stand_id == stand_id && p.status == RunStatus::Pending)
            .cloned()
            .collect())
    }

    async fn pipelines_for_stand(&self, stand_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        let tables = self.lock();
        Ok(tables
            .pipelines
            .iter()
            .filter(|p| p.stand_id == stand_id)
            .cloned()
            .collect())
    }

    async fn set_pipeline_status(&self, pipeline_id: Uuid, status: RunStatus) -> StoreResult<()> {
        let mut tables = self.lock();
        let pipeline = tables
            .pipelines
            .iter_mut()
            .find(|p| p.id == pipeline_id)
            .ok_or_else(|| StoreError::not_found("pipeline", pipeline_id.to_string()))?;
        pipeline.status = status;
        pipeline.updated_at = Utc::now();
        Ok(())
    }

    async fn pending_steps(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>> {
        let mut steps = self.steps_for_pipeline(pipeline_id).await?;
        steps.retain(|s| s.status == RunStatus::Pending);
        Ok(steps)
    }

    async fn steps_for_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>> {
        let tables = self.lock();
        let mut steps: Vec<Step> = tables
            .steps
            .iter()
            .filter(|s| s.pipeline_id == pipeline_id)
            .cloned()
            .collect();
        steps.sort_by_key(|s| s.ordinal);
        Ok(steps)
    }

    async fn set_step_status(&self, step_id: Uuid, status: RunStatus) -> StoreResult<()> {
        let mut tables = self.lock();
        let step = tables
            .steps
            .iter_mut()
            .find(|s| s.id == step_id)
            .ok_or_else(|| StoreError::not_found("step", step_id.to_string()))?;
        step.status = status;
        Ok(())
    }

    async fn unfinished_jobs(&self, step_id: Uuid) -> StoreResult<Vec<Job>> {
        let mut jobs = self.jobs_for_step(step_id).await?;
        jobs.retain(|j| j.status != JobStatus::Success);
        Ok(jobs)
    }

    async fn jobs_for_step(&self, step_id: Uuid) -> StoreResult<Vec<Job>> {
        let tables = self.lock();
        let mut jobs: Vec<Job> = tables
            .jobs
            .iter()
            .filter(|j| j.step_id == step_id)
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.ordinal);
        Ok(jobs)
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> StoreResult<()> {
        self.update_job(job_id, |job| job.status = status)
    }

    async fn mark_job_started(&self, job_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.update_job(job_id, |job| job.started_at = Some(at))
    }

    async fn mark_job_finished(&self, job_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.update_job(job_id, |job| job.finished_at = Some(at))
    }

    async fn append_step_state(&self, state: NewStepState) -> StoreResult<StepState> {
        let record = StepState {
            id: Uuid::new_v4(),
            stand_name: state.stand_name,
            step_name: state.step_name,
            user_id: state.user_id,
            status: state.status,
            ordinal: state.ordinal,
            delivered: false,
            created_at: Utc::now(),
        };
        self.lock().step_states.push(record.clone());
        Ok(record)
    }

    async fn undelivered_step_states(&self) -> StoreResult<Vec<StepState>> {
        let tables = self.lock();
        Ok(tables
            .step_states
            .iter()
            .filter(|s| !s.delivered)
            .cloned()
            .collect())
    }

    async fn mark_step_state_delivered(&self, id: Uuid) -> StoreResult<()> {
        let mut tables = self.lock();
        let state = tables
            .step_states
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::not_found("step state", id.to_string()))?;
        state.delivered = true;
        Ok(())
    }
}

impl MemoryStandStore {
    fn update_job(&self, job_id: Uuid, apply: impl FnOnce(&mut Job)) -> StoreResult<()> {
        let mut tables = self.lock();
        let job = tables
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| StoreError::not_found("job", job_id.to_string()))?;
        apply(job);
        Ok(())
    }
}
