//! Stand-State: persistence for stand orchestration
//!
//! Owns the status vocabulary and the entity hierarchy
//! `Stand → Pipeline → Step → Job`, plus append-only step notifications.
//!
//! ## Key Components
//!
//! - `StandStore`: async contract every backend implements
//! - `SurrealStandStore`: SurrealDB backend (in-memory, file or remote)
//! - `MemoryStandStore`: lock-based in-memory backend for tests
//! - `StoreConfig`: env-driven connection settings

mod config;
mod error;
pub mod fakes;
pub mod migrations;
pub mod model;
mod schema;
pub mod store;
mod surreal_store;

pub use config::{CloudConfig, StoreConfig, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
pub use error::StoreError;
pub use fakes::MemoryStandStore;
pub use model::{
    Job, JobStatus, NewStand, NewStepState, Pipeline, PlannedJob, PlannedStep,
    ProvisionedPipeline, RunStatus, Stand, StandStatus, Step, StepKind, StepOutcome, StepState,
};
pub use store::{StandStore, StoreResult};
pub use surreal_store::SurrealStandStore;

/// Result type for stand-state operations
pub type Result<T> = std::result::Result<T, StoreError>;
