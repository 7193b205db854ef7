//! SurrealDB schema initialization
//!
//! All tables are SCHEMALESS; row shape is owned by `schema.rs`. Indexes
//! back the lookups the engine performs every tick.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::store::StoreResult;

/// Initialize all stand tables. Idempotent.
pub async fn init_schema(db: &Surreal<Any>) -> StoreResult<()> {
    info!("Initializing stand schema");

    init_stands_table(db).await?;
    init_pipelines_table(db).await?;
    init_steps_table(db).await?;
    init_jobs_table(db).await?;
    init_step_states_table(db).await?;

    info!("stand schema initialization complete");
    Ok(())
}

async fn run(db: &Surreal<Any>, table: &str, sql: &str) -> StoreResult<()> {
    debug!(table, "initializing table");
    db.query(sql)
        .await
        .and_then(|response| response.check())
        .map_err(|e| StoreError::SchemaSetup(format!("{table}: {e}")))?;
    Ok(())
}

/// ```text
/// TABLE stands {
///   stand_id:   STRING (unique)
///   name:       STRING (unique, branch/environment name)
///   user_id:    INT
///   products:   ARRAY<STRING>
///   git_ref:    STRING
///   status:     STRING (created | pending | running | success | error)
///   created_at: DATETIME
///   updated_at: DATETIME
/// }
/// ```
async fn init_stands_table(db: &Surreal<Any>) -> StoreResult<()> {
    let sql = r#"
        DEFINE TABLE stands SCHEMALESS;
        DEFINE INDEX idx_stand_id ON TABLE stands COLUMNS stand_id UNIQUE;
        DEFINE INDEX idx_stand_name ON TABLE stands COLUMNS name UNIQUE;
        DEFINE INDEX idx_stand_status ON TABLE stands COLUMNS status;
    "#;
    run(db, "stands", sql).await
}

/// ```text
/// TABLE pipelines {
///   pipeline_id: STRING (unique)
///   stand_id:    STRING
///   name:        STRING
///   external_id: INT (provider pipeline id)
///   status:      STRING (pending | running | success | error)
///   created_at:  DATETIME
///   updated_at:  DATETIME
/// }
/// ```
async fn init_pipelines_table(db: &Surreal<Any>) -> StoreResult<()> {
    let sql = r#"
        DEFINE TABLE pipelines SCHEMALESS;
        DEFINE INDEX idx_pipeline_id ON TABLE pipelines COLUMNS pipeline_id UNIQUE;
        DEFINE INDEX idx_pipeline_stand_status ON TABLE pipelines COLUMNS stand_id, status;
    "#;
    run(db, "pipelines", sql).await
}

/// ```text
/// TABLE steps {
///   step_id:     STRING (unique)
///   pipeline_id: STRING
///   name:        STRING
///   description: STRING
///   ordinal:     INT (1..=3)
///   status:      STRING (pending | running | success | error)
/// }
/// ```
async fn init_steps_table(db: &Surreal<Any>) -> StoreResult<()> {
    let sql = r#"
        DEFINE TABLE steps SCHEMALESS;
        DEFINE INDEX idx_step_id ON TABLE steps COLUMNS step_id UNIQUE;
        DEFINE INDEX idx_step_pipeline_ordinal ON TABLE steps COLUMNS pipeline_id, ordinal UNIQUE;
    "#;
    run(db, "steps", sql).await
}

/// ```text
/// TABLE jobs {
///   job_id:      STRING (unique)
///   step_id:     STRING
///   external_id: INT (provider job id)
///   name:        STRING
///   stage:       STRING
///   ordinal:     INT
///   status:      STRING (manual | pending | running | success | failed | canceled)
///   started_at:  DATETIME?
///   finished_at: DATETIME?
/// }
/// ```
async fn init_jobs_table(db: &Surreal<Any>) -> StoreResult<()> {
    let sql = r#"
        DEFINE TABLE jobs SCHEMALESS;
        DEFINE INDEX idx_job_id ON TABLE jobs COLUMNS job_id UNIQUE;
        DEFINE INDEX idx_job_step ON TABLE jobs COLUMNS step_id;
    "#;
    run(db, "jobs", sql).await
}

/// Append-only; `delivered` is the only field ever updated.
async fn init_step_states_table(db: &Surreal<Any>) -> StoreResult<()> {
    let sql = r#"
        DEFINE TABLE step_states SCHEMALESS;
        DEFINE INDEX idx_state_id ON TABLE step_states COLUMNS state_id UNIQUE;
        DEFINE INDEX idx_state_delivered ON TABLE step_states COLUMNS delivered;
    "#;
    run(db, "step_states", sql).await
}
