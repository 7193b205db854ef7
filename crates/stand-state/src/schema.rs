//! SurrealDB row definitions
//!
//! Tables:
//! - stands: requested environments
//! - pipelines: provider pipeline runs of a stand
//! - steps: the three ordinal stages of a pipeline
//! - jobs: provider jobs grouped under a step
//! - step_states: append-only step outcome notifications
//!
//! Rows carry their own UUID key (`stand_id`, `pipeline_id`, ...) next to the
//! SurrealDB record id, and statuses as their lowercase wire form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{Job, Pipeline, Stand, Step, StepState};

/// Row timestamps are stored as native SurrealDB datetimes.
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use surrealdb::sql::Datetime;

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, out: S) -> Result<S::Ok, S::Error> {
        Datetime::from(*at).serialize(out)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(input: D) -> Result<DateTime<Utc>, D::Error> {
        Datetime::deserialize(input).map(DateTime::from)
    }

    /// Same, for nullable columns.
    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serialize, Serializer};
        use surrealdb::sql::Datetime;

        pub fn serialize<S: Serializer>(
            at: &Option<DateTime<Utc>>,
            out: S,
        ) -> Result<S::Ok, S::Error> {
            at.map(Datetime::from).serialize(out)
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            input: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<Datetime>::deserialize(input).map(|at| at.map(DateTime::from))
        }
    }
}

fn parse_uuid(field: &'static str, raw: &str) -> Result<Uuid, StoreError> {
    Uuid::parse_str(raw)
        .map_err(|e| StoreError::Serialization(format!("invalid {field} {raw:?}: {e}")))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandRow {
    /// SurrealDB record ID
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub stand_id: String,
    pub name: String,
    pub user_id: i64,
    pub products: Vec<String>,
    pub git_ref: String,
    pub status: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl From<&Stand> for StandRow {
    fn from(stand: &Stand) -> Self {
        StandRow {
            id: None,
            stand_id: stand.id.to_string(),
            name: stand.name.clone(),
            user_id: stand.user_id,
            products: stand.products.clone(),
            git_ref: stand.git_ref.clone(),
            status: stand.status.to_string(),
            created_at: stand.created_at,
            updated_at: stand.updated_at,
        }
    }
}

impl TryFrom<StandRow> for Stand {
    type Error = StoreError;

    fn try_from(row: StandRow) -> Result<Self, Self::Error> {
        Ok(Stand {
            id: parse_uuid("stand_id", &row.stand_id)?,
            name: row.name,
            user_id: row.user_id,
            products: row.products,
            git_ref: row.git_ref,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRow {
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub pipeline_id: String,
    pub stand_id: String,
    pub name: String,
    pub external_id: i64,
    pub status: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl From<&Pipeline> for PipelineRow {
    fn from(pipeline: &Pipeline) -> Self {
        PipelineRow {
            id: None,
            pipeline_id: pipeline.id.to_string(),
            stand_id: pipeline.stand_id.to_string(),
            name: pipeline.name.clone(),
            external_id: pipeline.external_id,
            status: pipeline.status.to_string(),
            created_at: pipeline.created_at,
            updated_at: pipeline.updated_at,
        }
    }
}

impl TryFrom<PipelineRow> for Pipeline {
    type Error = StoreError;

    fn try_from(row: PipelineRow) -> Result<Self, Self::Error> {
        Ok(Pipeline {
            id: parse_uuid("pipeline_id", &row.pipeline_id)?,
            stand_id: parse_uuid("stand_id", &row.stand_id)?,
            name: row.name,
            external_id: row.external_id,
            status: row.status.parse()?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRow {
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub step_id: String,
    pub pipeline_id: String,
    pub name: String,
    pub description: String,
    pub ordinal: u32,
    pub status: String,
}

impl From<&Step> for StepRow {
    fn from(step: &Step) -> Self {
        StepRow {
            id: None,
            step_id: step.id.to_string(),
            pipeline_id: step.pipeline_id.to_string(),
            name: step.name.clone(),
            description: step.description.clone(),
            ordinal: step.ordinal,
            status: step.status.to_string(),
        }
    }
}

impl TryFrom<StepRow> for Step {
    type Error = StoreError;

    fn try_from(row: StepRow) -> Result<Self, Self::Error> {
        Ok(Step {
            id: parse_uuid("step_id", &row.step_id)?,
            pipeline_id: parse_uuid("pipeline_id", &row.pipeline_id)?,
            name: row.name,
            description: row.description,
            ordinal: row.ordinal,
            status: row.status.parse()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRow {
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub job_id: String,
    pub step_id: String,
    pub external_id: i64,
    pub name: String,
    pub stage: String,
    pub ordinal: u32,
    pub status: String,
    #[serde(default, with = "surreal_datetime::option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime::option")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobRow {
    fn from(job: &Job) -> Self {
        JobRow {
            id: None,
            job_id: job.id.to_string(),
            step_id: job.step_id.to_string(),
            external_id: job.external_id,
            name: job.name.clone(),
            stage: job.stage.clone(),
            ordinal: job.ordinal,
            status: job.status.to_string(),
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: parse_uuid("job_id", &row.job_id)?,
            step_id: parse_uuid("step_id", &row.step_id)?,
            external_id: row.external_id,
            name: row.name,
            stage: row.stage,
            ordinal: row.ordinal,
            status: row.status.parse()?,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepStateRow {
    #[serde(default, skip_serializing)]
    pub id: Option<surrealdb::sql::Thing>,
    pub state_id: String,
    pub stand_name: String,
    pub step_name: String,
    pub user_id: i64,
    pub status: String,
    pub ordinal: u32,
    pub delivered: bool,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl From<&StepState> for StepStateRow {
    fn from(state: &StepState) -> Self {
        StepStateRow {
            id: None,
            state_id: state.id.to_string(),
            stand_name: state.stand_name.clone(),
            step_name: state.step_name.clone(),
            user_id: state.user_id,
            status: state.status.to_string(),
            ordinal: state.ordinal,
            delivered: state.delivered,
            created_at: state.created_at,
        }
    }
}

impl TryFrom<StepStateRow> for StepState {
    type Error = StoreError;

    fn try_from(row: StepStateRow) -> Result<Self, Self::Error> {
        Ok(StepState {
            id: parse_uuid("state_id", &row.state_id)?,
            stand_name: row.stand_name,
            step_name: row.step_name,
            user_id: row.user_id,
            status: row.status.parse()?,
            ordinal: row.ordinal,
            delivered: row.delivered,
            created_at: row.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{JobStatus, StandStatus};

    fn sample_stand() -> Stand {
        let now = Utc::now();
        Stand {
            id: Uuid::new_v4(),
            name: "feature-x".to_string(),
            user_id: 42,
            products: vec!["A".to_string(), "B".to_string()],
            git_ref: "master".to_string(),
            status: StandStatus::Created,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn stand_row_keeps_wire_status() {
        let stand = sample_stand();
        let row = StandRow::from(&stand);
        assert_eq!(row.status, "created");
        assert_eq!(row.stand_id, stand.id.to_string());
        assert_eq!(Stand::try_from(row).unwrap(), stand);
    }

    #[test]
    fn corrupt_status_is_rejected() {
        let mut row = StandRow::from(&sample_stand());
        row.status = "nil".to_string();
        assert!(matches!(
            Stand::try_from(row),
            Err(StoreError::InvalidStatus { .. })
        ));
    }

    #[test]
    fn corrupt_uuid_is_rejected() {
        let job = Job {
            id: Uuid::new_v4(),
            step_id: Uuid::new_v4(),
            external_id: 7,
            name: "[1-1]-plan".to_string(),
            stage: "terraform".to_string(),
            ordinal: 1,
            status: JobStatus::Manual,
            started_at: None,
            finished_at: None,
        };
        let mut row = JobRow::from(&job);
        row.step_id = "not-a-uuid".to_string();
        assert!(matches!(
            Job::try_from(row),
            Err(StoreError::Serialization(_))
        ));
    }
}
