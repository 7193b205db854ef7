//! CI provider capability contract
//!
//! The engine drives every external side effect through [`CiProvider`]:
//! existence checks and creation of the stand's branch, environment and
//! `PRODUCTS` variable, pipeline triggering, job listing, job triggering and
//! job status polling. Implementations hold the project scope and credentials.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stand_state::JobStatus;

use crate::error::ProviderError;

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// A job the provider generated for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderJob {
    pub id: i64,
    pub name: String,
    pub stage: String,
    /// State reported when the job was listed
    pub status: JobStatus,
}

impl ProviderJob {
    /// A job waiting to be played.
    pub fn new(id: i64, name: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            stage: stage.into(),
            status: JobStatus::Manual,
        }
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }
}

#[async_trait]
pub trait CiProvider: Send + Sync {
    async fn branch_exists(&self, name: &str) -> ProviderResult<bool>;

    /// Create branch `name` from `git_ref`.
    async fn clone_branch(&self, name: &str, git_ref: &str) -> ProviderResult<()>;

    /// Whether an environment with exactly this name exists.
    async fn environment_exists(&self, name: &str) -> ProviderResult<bool>;

    async fn create_environment(&self, name: &str) -> ProviderResult<()>;

    /// Whether the `PRODUCTS` variable is defined for the environment scope.
    async fn variables_exist(&self, environment: &str) -> ProviderResult<bool>;

    async fn create_variables(&self, environment: &str, products: &[String])
        -> ProviderResult<()>;

    /// Replace the environment's `PRODUCTS` value with `products`.
    async fn update_variables(&self, environment: &str, products: &[String])
        -> ProviderResult<()>;

    /// Trigger a pipeline on `branch`, returning the provider pipeline id.
    async fn run_pipeline(&self, branch: &str) -> ProviderResult<i64>;

    async fn jobs_for_pipeline(&self, pipeline_id: i64) -> ProviderResult<Vec<ProviderJob>>;

    /// Play a manual job.
    async fn run_job(&self, job_id: i64) -> ProviderResult<()>;

    async fn job_status(&self, job_id: i64) -> ProviderResult<JobStatus>;
}
