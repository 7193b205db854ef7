//! Stand orchestration engine
//!
//! Two dispatch lanes drive stands through their lifecycle:
//! `created` stands are provisioned on the CI provider, `pending` stands have
//! their pipelines executed step by step. See [`Scheduler`] for the loop and
//! [`recover_stale_stands`] for the startup pass.

pub mod active_set;
pub mod cache;
pub mod config;
pub mod error;
pub mod executor;
pub mod monitor;
pub mod provisioning;
pub mod recovery;
pub mod scheduler;
pub mod taxonomy;
pub mod telemetry;

pub use active_set::{ActiveGuard, ActiveSet};
pub use cache::JobStatusCache;
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use executor::{Execution, StandExecutor};
pub use monitor::JobMonitor;
pub use provisioning::Provisioner;
pub use recovery::{recover_stale_stands, RecoveryReport};
pub use scheduler::{Lane, Scheduler, TickOutcome};
pub use taxonomy::{job_order_key, plan_steps, StepPlan};
pub use telemetry::init_tracing;
