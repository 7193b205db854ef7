//! Provisioning of `created` stands
//!
//! Sequence, aborted at the first failure:
//! 1. branch named after the stand, cut from its ref if absent
//! 2. environment named after the stand, created if absent
//! 3. `PRODUCTS` variable for the environment, created or overwritten
//! 4. pipeline triggered on the branch
//! 5. pipeline jobs listed and mapped onto the three steps
//! 6. pipeline, steps and jobs persisted with the stand moved to `pending`,
//!    in one store transaction
//!
//! Steps 1-3 check before they write, so a stand that failed half-way is
//! simply provisioned again on a later tick.

use std::sync::Arc;

use gitlab_provider::CiProvider;
use stand_state::{Pipeline, ProvisionedPipeline, Stand, StandStore};
use tracing::{debug, info, instrument};

use crate::error::EngineResult;
use crate::taxonomy::plan_steps;

#[derive(Clone)]
pub struct Provisioner {
    store: Arc<dyn StandStore>,
    provider: Arc<dyn CiProvider>,
}

impl Provisioner {
    pub fn new(store: Arc<dyn StandStore>, provider: Arc<dyn CiProvider>) -> Self {
        Self { store, provider }
    }

    #[instrument(skip_all, fields(stand = %stand.name))]
    pub async fn provision(&self, stand: &Stand) -> EngineResult<Pipeline> {
        info!("provisioning stand");
        self.ensure_branch(stand).await?;
        self.ensure_environment(stand).await?;
        self.sync_products(stand).await?;

        let external_id = self.provider.run_pipeline(&stand.name).await?;
        info!(pipeline = external_id, "pipeline triggered");

        let jobs = self.provider.jobs_for_pipeline(external_id).await?;
        let plan = plan_steps(&jobs);
        debug!(
            jobs = jobs.len(),
            dropped = plan.dropped.len(),
            "pipeline jobs mapped"
        );

        let pipeline = self
            .store
            .record_provisioning(
                stand.id,
                ProvisionedPipeline {
                    name: stand.name.clone(),
                    external_id,
                    steps: plan.steps,
                },
            )
            .await?;
        info!(pipeline = external_id, "stand provisioned, now pending");
        Ok(pipeline)
    }

    async fn ensure_branch(&self, stand: &Stand) -> EngineResult<()> {
        if self.provider.branch_exists(&stand.name).await? {
            debug!("branch exists");
            return Ok(());
        }
        self.provider
            .clone_branch(&stand.name, &stand.git_ref)
            .await?;
        info!(git_ref = %stand.git_ref, "branch created");
        Ok(())
    }

    async fn ensure_environment(&self, stand: &Stand) -> EngineResult<()> {
        if self.provider.environment_exists(&stand.name).await? {
            debug!("environment exists");
            return Ok(());
        }
        self.provider.create_environment(&stand.name).await?;
        info!("environment created");
        Ok(())
    }

    /// Write the stand's current product list, replacing any previous value.
    async fn sync_products(&self, stand: &Stand) -> EngineResult<()> {
        let products = self.store.stand_products(&stand.name).await?;
        if self.provider.variables_exist(&stand.name).await? {
            self.provider
                .update_variables(&stand.name, &products)
                .await?;
            debug!(?products, "products variable replaced");
        } else {
            self.provider
                .create_variables(&stand.name, &products)
                .await?;
            debug!(?products, "products variable created");
        }
        Ok(())
    }
}
