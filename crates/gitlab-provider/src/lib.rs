//! GitLab provider for stand orchestration
//!
//! ## Key Components
//!
//! - `CiProvider`: capability contract the engine drives
//! - `GitlabClient`: REST implementation over `reqwest`
//! - `GitlabConfig`: env-driven project scope and credentials
//! - `fakes::ScriptedProvider`: in-memory provider with status scripts and failure injection

mod client;
mod config;
mod error;
pub mod fakes;
pub mod provider;

pub use client::{map_job_status, GitlabClient, PRODUCTS_VARIABLE};
pub use config::{GitlabConfig, DEFAULT_TIMEOUT};
pub use error::ProviderError;
pub use provider::{CiProvider, ProviderJob, ProviderResult};
