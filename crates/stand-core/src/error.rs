//! Error types for stand-core

use gitlab_provider::ProviderError;
use stand_state::{JobStatus, StoreError};
use thiserror::Error;

/// Errors raised while dispatching, provisioning or executing stands
#[derive(Error, Debug)]
pub enum EngineError {
    /// CI provider call failed
    #[error("Provider call failed: {0}")]
    Provider(#[from] ProviderError),

    /// Store read or write failed
    #[error("Store operation failed: {0}")]
    Store(#[from] StoreError),

    /// A monitored job reached `failed` or `canceled`
    #[error("Job {job} finished with status {status}")]
    JobFailed { job: i64, status: JobStatus },

    /// A step already held a failed job when it was picked up
    #[error("Step {step:?} halted: job {job} is {status}")]
    StepFailed {
        step: String,
        job: i64,
        status: JobStatus,
    },

    /// Engine configuration rejected at startup
    #[error("Invalid engine configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the unit of work may succeed on a later tick unchanged:
    /// transport failures, provider responses other than 404 or a rejected
    /// request, and backend errors.
    pub fn is_transient(&self) -> bool {
        match self {
            EngineError::Provider(err) => {
                matches!(
                    err,
                    ProviderError::Transport(_) | ProviderError::Status { .. }
                ) && !err.is_not_found()
                    && !err.is_rejected()
            }
            EngineError::Store(err) => matches!(
                err,
                StoreError::Connection(_) | StoreError::Query(_) | StoreError::Transaction(_)
            ),
            EngineError::JobFailed { .. }
            | EngineError::StepFailed { .. }
            | EngineError::Config(_) => false,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
