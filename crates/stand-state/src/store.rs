//! Persistent store contract for stand orchestration
//!
//! The engine mutates stands, pipelines, steps and jobs exclusively through
//! [`StandStore`]. Two kinds of writes exist:
//! - single-row status updates, visible to other readers immediately;
//! - transactional multi-row writes (`recover_stand`, `record_provisioning`)
//!   that either apply completely or not at all.
//!
//! All methods are async and backend-agnostic. An in-memory implementation
//! lives in the `fakes` module, the SurrealDB one in `surreal_store`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{
    Job, JobStatus, NewStand, NewStepState, Pipeline, ProvisionedPipeline, RunStatus, Stand,
    StandStatus, Step, StepState,
};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait StandStore: Send + Sync {
    // -- stands --------------------------------------------------------------

    /// Insert a stand in `created` status. Fails with `Conflict` on a duplicate name.
    async fn create_stand(&self, stand: NewStand) -> StoreResult<Stand>;

    /// All stands currently in `status`, oldest first.
    async fn stands_with_status(&self, status: StandStatus) -> StoreResult<Vec<Stand>>;

    async fn stand_by_name(&self, name: &str) -> StoreResult<Option<Stand>>;

    async fn list_stands(&self) -> StoreResult<Vec<Stand>>;

    /// Products requested by the named stand.
    async fn stand_products(&self, name: &str) -> StoreResult<Vec<String>>;

    async fn set_stand_status(&self, stand_id: Uuid, status: StandStatus) -> StoreResult<()>;

    // -- transactional writes ------------------------------------------------

    /// Revert a stand interrupted mid-execution, in one transaction:
    /// - stand → `pending`
    /// - its `running` pipelines → `pending`
    /// - jobs under its `running` steps that are not `success` → `manual`
    /// - its `running` steps → `pending`
    async fn recover_stand(&self, stand_id: Uuid) -> StoreResult<()>;

    /// Persist a freshly triggered pipeline with its steps and jobs and move
    /// the stand `created → pending`, in one transaction.
    ///
    /// Fails with `Conflict` if the stand is no longer `created`.
    async fn record_provisioning(
        &self,
        stand_id: Uuid,
        pipeline: ProvisionedPipeline,
    ) -> StoreResult<Pipeline>;

    // -- pipelines -----------------------------------------------------------

    /// Pending pipelines of a stand, in ascending creation order.
    async fn pending_pipelines(&self, stand_id: Uuid) -> StoreResult<Vec<Pipeline>>;

    async fn pipelines_for_stand(&self, stand_id: Uuid) -> StoreResult<Vec<Pipeline>>;

    async fn set_pipeline_status(&self, pipeline_id: Uuid, status: RunStatus) -> StoreResult<()>;

    // -- steps ---------------------------------------------------------------

    /// Pending steps of a pipeline, by ascending ordinal.
    async fn pending_steps(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>>;

    async fn steps_for_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>>;

    async fn set_step_status(&self, step_id: Uuid, status: RunStatus) -> StoreResult<()>;

    // -- jobs ----------------------------------------------------------------

    /// Jobs of a step whose status is not `success`, by ascending ordinal.
    async fn unfinished_jobs(&self, step_id: Uuid) -> StoreResult<Vec<Job>>;

    async fn jobs_for_step(&self, step_id: Uuid) -> StoreResult<Vec<Job>>;

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> StoreResult<()>;

    async fn mark_job_started(&self, job_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    async fn mark_job_finished(&self, job_id: Uuid, at: DateTime<Utc>) -> StoreResult<()>;

    // -- step notifications --------------------------------------------------

    async fn append_step_state(&self, state: NewStepState) -> StoreResult<StepState>;

    /// Notifications not yet delivered, oldest first.
    async fn undelivered_step_states(&self) -> StoreResult<Vec<StepState>>;

    async fn mark_step_state_delivered(&self, id: Uuid) -> StoreResult<()>;
}
