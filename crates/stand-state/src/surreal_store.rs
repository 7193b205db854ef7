//! SurrealDB-backed StandStore implementation
//!
//! Uses the rows in `schema.rs` for persistence, converting to and from the
//! `model` types at the boundary. The two multi-row writes run as a single
//! `BEGIN TRANSACTION ... COMMIT TRANSACTION` query.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use surrealdb::engine::any::Any;
use surrealdb::sql::Datetime as SurrealDatetime;
use surrealdb::Surreal;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::model::*;
use crate::schema::{JobRow, PipelineRow, StandRow, StepRow, StepStateRow};
use crate::store::{StandStore, StoreResult};

const RECOVER_STAND: &str = r#"
    BEGIN TRANSACTION;
    UPDATE jobs SET status = 'manual'
        WHERE status != 'success'
        AND step_id IN (
            SELECT VALUE step_id FROM steps
            WHERE status = 'running'
            AND pipeline_id IN (SELECT VALUE pipeline_id FROM pipelines WHERE stand_id = $stand)
        );
    UPDATE steps SET status = 'pending'
        WHERE status = 'running'
        AND pipeline_id IN (SELECT VALUE pipeline_id FROM pipelines WHERE stand_id = $stand);
    UPDATE pipelines SET status = 'pending', updated_at = time::now()
        WHERE stand_id = $stand AND status = 'running';
    UPDATE stands SET status = 'pending', updated_at = time::now()
        WHERE stand_id = $stand;
    COMMIT TRANSACTION;
"#;

const CLAIM_CREATED_STAND: &str = r#"
    LET $claimed = (UPDATE stands SET status = 'pending', updated_at = time::now()
        WHERE stand_id = $stand AND status = 'created' RETURN AFTER);
    IF array::len($claimed) = 0 { THROW "stand is no longer created" };
    CREATE pipelines CONTENT $pipeline;
"#;

/// SurrealDB implementation of [`StandStore`].
#[derive(Clone)]
pub struct SurrealStandStore {
    db: Surreal<Any>,
}

impl SurrealStandStore {
    /// Connect to `mem://` and initialize the schema.
    pub async fn in_memory() -> StoreResult<Self> {
        Self::connect(&StoreConfig::Memory).await
    }

    #[instrument(skip_all)]
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let db = config.connect().await?;
        info!(target = %config.describe(), "SurrealStandStore ready");
        Ok(Self { db })
    }

    /// Wrap an already connected and migrated handle.
    pub fn from_handle(db: Surreal<Any>) -> Self {
        Self { db }
    }

    // -- private helpers -----------------------------------------------------

    async fn select_rows<T>(&self, sql: &'static str, key: String) -> StoreResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut res = self.db.query(sql).bind(("key", key)).await?;
        let rows: Vec<T> = res.take(0)?;
        Ok(rows)
    }

    /// Run a keyed `UPDATE ... RETURN AFTER`; no matching row is `NotFound`.
    async fn update_one<T, V>(
        &self,
        entity: &'static str,
        sql: &'static str,
        key: Uuid,
        value: V,
    ) -> StoreResult<()>
    where
        T: DeserializeOwned,
        V: Serialize + Send + Sync + 'static,
    {
        let mut res = self
            .db
            .query(sql)
            .bind(("key", key.to_string()))
            .bind(("value", value))
            .await?;
        let rows: Vec<T> = res.take(0)?;
        if rows.is_empty() {
            return Err(StoreError::not_found(entity, key.to_string()));
        }
        Ok(())
    }

    async fn fetch_stand(&self, stand_id: Uuid) -> StoreResult<Stand> {
        let rows: Vec<StandRow> = self
            .select_rows("SELECT * FROM stands WHERE stand_id = $key", stand_id.to_string())
            .await?;
        rows.into_iter()
            .next()
            .ok_or_else(|| StoreError::not_found("stand", stand_id.to_string()))?
            .try_into()
    }

    fn convert<R, T>(rows: Vec<R>) -> StoreResult<Vec<T>>
    where
        T: TryFrom<R, Error = StoreError>,
    {
        rows.into_iter().map(T::try_from).collect()
    }
}

#[async_trait]
impl StandStore for SurrealStandStore {
    async fn create_stand(&self, stand: NewStand) -> StoreResult<Stand> {
        if self.stand_by_name(&stand.name).await?.is_some() {
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
        debug!(stand = %record.name, "creating stand");

        let _created: Option<StandRow> = self
            .db
            .create("stands")
            .content(StandRow::from(&record))
            .await?;
        Ok(record)
    }

    async fn stands_with_status(&self, status: StandStatus) -> StoreResult<Vec<Stand>> {
        let rows: Vec<StandRow> = self
            .select_rows(
                "SELECT * FROM stands WHERE status = $key ORDER BY created_at ASC",
                status.to_string(),
            )
            .await?;
        Self::convert(rows)
    }

    async fn stand_by_name(&self, name: &str) -> StoreResult<Option<Stand>> {
        let rows: Vec<StandRow> = self
            .select_rows("SELECT * FROM stands WHERE name = $key", name.to_string())
            .await?;
        rows.into_iter().next().map(Stand::try_from).transpose()
    }

    async fn list_stands(&self) -> StoreResult<Vec<Stand>> {
        let mut res = self
            .db
            .query("SELECT * FROM stands ORDER BY created_at ASC")
            .await?;
        let rows: Vec<StandRow> = res.take(0)?;
        Self::convert(rows)
    }

    async fn stand_products(&self, name: &str) -> StoreResult<Vec<String>> {
        self.stand_by_name(name)
            .await?
            .map(|stand| stand.products)
            .ok_or_else(|| StoreError::not_found("stand", name))
    }

    async fn set_stand_status(&self, stand_id: Uuid, status: StandStatus) -> StoreResult<()> {
        self.update_one::<StandRow, _>(
            "stand",
            "UPDATE stands SET status = $value, updated_at = time::now() WHERE stand_id = $key RETURN AFTER",
            stand_id,
            status.to_string(),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn recover_stand(&self, stand_id: Uuid) -> StoreResult<()> {
        self.fetch_stand(stand_id).await?;

        self.db
            .query(RECOVER_STAND)
            .bind(("stand", stand_id.to_string()))
            .await
            .and_then(|response| response.check())
            .map_err(|e| StoreError::Transaction(e.to_string()))?;
        Ok(())
    }

    #[instrument(skip(self, provisioned), fields(pipeline = %provisioned.external_id))]
    async fn record_provisioning(
        &self,
        stand_id: Uuid,
        provisioned: ProvisionedPipeline,
    ) -> StoreResult<Pipeline> {
        let stand = self.fetch_stand(stand_id).await?;
        if stand.status != StandStatus::Created {
            return Err(StoreError::Conflict(format!(
                "stand {} is {}, expected created",
                stand.name, stand.status
            )));
        }

        let now = Utc::now();
        let pipeline = Pipeline {
            id: Uuid::new_v4(),
            stand_id,
            name: provisioned.name,
            external_id: provisioned.external_id,
            status: RunStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let mut steps = Vec::new();
        let mut jobs = Vec::new();
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
                jobs.push(JobRow::from(&Job {
                    id: Uuid::new_v4(),
                    step_id: step.id,
                    external_id: job.external_id,
                    name: job.name,
                    stage: job.stage,
                    ordinal: job.ordinal,
                    status: job.status,
                    started_at: None,
                    finished_at: None,
                }));
            }
            steps.push(StepRow::from(&step));
        }

        let mut sql = String::from("BEGIN TRANSACTION;");
        sql.push_str(CLAIM_CREATED_STAND);
        if !steps.is_empty() {
            sql.push_str("INSERT INTO steps $steps;");
        }
        if !jobs.is_empty() {
            sql.push_str("INSERT INTO jobs $jobs;");
        }
        sql.push_str("COMMIT TRANSACTION;");

        debug!(steps = steps.len(), jobs = jobs.len(), "recording provisioning");
        self.db
            .query(sql)
            .bind(("stand", stand_id.to_string()))
            .bind(("pipeline", PipelineRow::from(&pipeline)))
            .bind(("steps", steps))
            .bind(("jobs", jobs))
            .await
            .and_then(|response| response.check())
            .map_err(|e| {
                let message = e.to_string();
                if message.contains("stand is no longer created") {
                    StoreError::Conflict(format!("stand {} is no longer created", stand.name))
                } else {
                    StoreError::Transaction(message)
                }
            })?;

        Ok(pipeline)
    }

    async fn pending_pipelines(&self, stand_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        let rows: Vec<PipelineRow> = self
            .select_rows(
                "SELECT * FROM pipelines WHERE stand_id = $key AND status = 'pending' ORDER BY created_at ASC",
                stand_id.to_string(),
            )
            .await?;
        Self::convert(rows)
    }

    async fn pipelines_for_stand(&self, stand_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        let rows: Vec<PipelineRow> = self
            .select_rows(
                "SELECT * FROM pipelines WHERE stand_id = $key ORDER BY created_at ASC",
                stand_id.to_string(),
            )
            .await?;
        Self::convert(rows)
    }

    async fn set_pipeline_status(&self, pipeline_id: Uuid, status: RunStatus) -> StoreResult<()> {
        self.update_one::<PipelineRow, _>(
            "pipeline",
            "UPDATE pipelines SET status = $value, updated_at = time::now() WHERE pipeline_id = $key RETURN AFTER",
            pipeline_id,
            status.to_string(),
        )
        .await
    }

    async fn pending_steps(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>> {
        let rows: Vec<StepRow> = self
            .select_rows(
                "SELECT * FROM steps WHERE pipeline_id = $key AND status = 'pending' ORDER BY ordinal ASC",
                pipeline_id.to_string(),
            )
            .await?;
        Self::convert(rows)
    }

    async fn steps_for_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>> {
        let rows: Vec<StepRow> = self
            .select_rows(
                "SELECT * FROM steps WHERE pipeline_id = $key ORDER BY ordinal ASC",
                pipeline_id.to_string(),
            )
            .await?;
        Self::convert(rows)
    }

    async fn set_step_status(&self, step_id: Uuid, status: RunStatus) -> StoreResult<()> {
        self.update_one::<StepRow, _>(
            "step",
            "UPDATE steps SET status = $value WHERE step_id = $key RETURN AFTER",
            step_id,
            status.to_string(),
        )
        .await
    }

    async fn unfinished_jobs(&self, step_id: Uuid) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = self
            .select_rows(
                "SELECT * FROM jobs WHERE step_id = $key AND status != 'success' ORDER BY ordinal ASC",
                step_id.to_string(),
            )
            .await?;
        Self::convert(rows)
    }

    async fn jobs_for_step(&self, step_id: Uuid) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = self
            .select_rows(
                "SELECT * FROM jobs WHERE step_id = $key ORDER BY ordinal ASC",
                step_id.to_string(),
            )
            .await?;
        Self::convert(rows)
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> StoreResult<()> {
        self.update_one::<JobRow, _>(
            "job",
            "UPDATE jobs SET status = $value WHERE job_id = $key RETURN AFTER",
            job_id,
            status.to_string(),
        )
        .await
    }

    async fn mark_job_started(&self, job_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.update_one::<JobRow, _>(
            "job",
            "UPDATE jobs SET started_at = $value WHERE job_id = $key RETURN AFTER",
            job_id,
            SurrealDatetime::from(at),
        )
        .await
    }

    async fn mark_job_finished(&self, job_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.update_one::<JobRow, _>(
            "job",
            "UPDATE jobs SET finished_at = $value WHERE job_id = $key RETURN AFTER",
            job_id,
            SurrealDatetime::from(at),
        )
        .await
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
        let _created: Option<StepStateRow> = self
            .db
            .create("step_states")
            .content(StepStateRow::from(&record))
            .await?;
        Ok(record)
    }

    async fn undelivered_step_states(&self) -> StoreResult<Vec<StepState>> {
        let mut res = self
            .db
            .query("SELECT * FROM step_states WHERE delivered = false ORDER BY created_at ASC")
            .await?;
        let rows: Vec<StepStateRow> = res.take(0)?;
        Self::convert(rows)
    }

    async fn mark_step_state_delivered(&self, id: Uuid) -> StoreResult<()> {
        self.update_one::<StepStateRow, _>(
            "step state",
            "UPDATE step_states SET delivered = $value WHERE state_id = $key RETURN AFTER",
            id,
            true,
        )
        .await
    }
}
