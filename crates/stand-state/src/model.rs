//! Status vocabulary and entity types
//!
//! Lifecycles:
//! - Stand: `created → pending → running → {success | error}`
//! - Pipeline / Step: `pending → running → {success | error}`
//! - Job: mirrors the provider, `manual | pending | running | success | failed | canceled`
//!
//! Every status has a lowercase wire form used both in the database and in
//! log output. Parsing an unknown string is an error, never a sentinel value.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

macro_rules! wire_enum {
    ($(#[$meta:meta])* $name:ident, $kind:literal { $($variant:ident => $wire:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            /// Lowercase wire form.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.pad(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($name::$variant),)+
                    other => Err(StoreError::InvalidStatus {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

wire_enum!(
    /// Lifecycle of a stand.
    StandStatus, "stand" {
        Created => "created",
        Pending => "pending",
        Running => "running",
        Success => "success",
        Error => "error",
    }
);

wire_enum!(
    /// Lifecycle shared by pipelines and steps.
    RunStatus, "run" {
        Pending => "pending",
        Running => "running",
        Success => "success",
        Error => "error",
    }
);

wire_enum!(
    /// Job status, mirrored from the CI provider.
    JobStatus, "job" {
        Manual => "manual",
        Pending => "pending",
        Running => "running",
        Success => "success",
        Failed => "failed",
        Canceled => "canceled",
    }
);

wire_enum!(
    /// Terminal outcome recorded in a step notification.
    StepOutcome, "step outcome" {
        Success => "success",
        Error => "error",
    }
);

impl JobStatus {
    /// `success`, `failed` or `canceled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled
        )
    }

    /// `failed` or `canceled`.
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failed | JobStatus::Canceled)
    }
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Error)
    }
}

/// The closed step taxonomy. A pipeline always has exactly these three steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// VM provisioning (terraform stage)
    Infrastructure,
    /// Configuration management (ansible stage)
    Automation,
    /// Application release (helm stage)
    Release,
}

impl StepKind {
    pub const ALL: [StepKind; 3] = [
        StepKind::Infrastructure,
        StepKind::Automation,
        StepKind::Release,
    ];

    /// Fixed position of the step inside its pipeline (1-based).
    pub fn ordinal(&self) -> u32 {
        match self {
            StepKind::Infrastructure => 1,
            StepKind::Automation => 2,
            StepKind::Release => 3,
        }
    }

    /// Provider stage name whose jobs belong to this step.
    pub fn stage(&self) -> &'static str {
        match self {
            StepKind::Infrastructure => "terraform",
            StepKind::Automation => "ansible",
            StepKind::Release => "helm",
        }
    }

    /// Resolve a provider stage name. Unknown stages have no step.
    pub fn from_stage(stage: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.stage() == stage)
    }

    pub fn title(&self) -> &'static str {
        match self {
            StepKind::Infrastructure => "Creating vm",
            StepKind::Automation => "Executing automation",
            StepKind::Release => "Executing helm",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            StepKind::Infrastructure => "Initial creation step",
            StepKind::Automation => "Kubernetes installation",
            StepKind::Release => "Running helm",
        }
    }
}

/// An ephemeral environment requested by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stand {
    pub id: Uuid,
    /// Unique; also the name of the provider branch and environment.
    pub name: String,
    /// Owning user (chat identifier of the requester).
    pub user_id: i64,
    pub products: Vec<String>,
    /// Source ref the stand branch is cut from.
    pub git_ref: String,
    pub status: StandStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to create a stand in `created` status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStand {
    pub name: String,
    pub user_id: i64,
    pub products: Vec<String>,
    pub git_ref: String,
}

impl NewStand {
    pub fn new(
        name: impl Into<String>,
        user_id: i64,
        products: Vec<String>,
        git_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            user_id,
            products,
            git_ref: git_ref.into(),
        }
    }
}

/// One provider pipeline run for a stand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: Uuid,
    pub stand_id: Uuid,
    pub name: String,
    /// Pipeline identifier assigned by the provider.
    pub external_id: i64,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    pub pipeline_id: Uuid,
    pub name: String,
    pub description: String,
    pub ordinal: u32,
    pub status: RunStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub step_id: Uuid,
    /// Job identifier assigned by the provider.
    pub external_id: i64,
    pub name: String,
    pub stage: String,
    /// 1-based position within the step.
    pub ordinal: u32,
    pub status: JobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Append-only notification of a step's terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub id: Uuid,
    pub stand_name: String,
    pub step_name: String,
    pub user_id: i64,
    pub status: StepOutcome,
    pub ordinal: u32,
    /// Set by the external notifier once the user has been told.
    pub delivered: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStepState {
    pub stand_name: String,
    pub step_name: String,
    pub user_id: i64,
    pub status: StepOutcome,
    pub ordinal: u32,
}

impl NewStepState {
    pub fn for_step(stand: &Stand, step: &Step, status: StepOutcome) -> Self {
        Self {
            stand_name: stand.name.clone(),
            step_name: step.name.clone(),
            user_id: stand.user_id,
            status,
            ordinal: step.ordinal,
        }
    }
}

/// Provider job resolved into a step slot during provisioning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedJob {
    pub external_id: i64,
    pub name: String,
    pub stage: String,
    pub ordinal: u32,
    /// Provider state at provisioning time
    pub status: JobStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub kind: StepKind,
    pub jobs: Vec<PlannedJob>,
}

/// Everything provisioning persists for a stand in one transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedPipeline {
    pub name: String,
    pub external_id: i64,
    pub steps: Vec<PlannedStep>,
}
