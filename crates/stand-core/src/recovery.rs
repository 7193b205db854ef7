//! Startup reconciliation of stands interrupted mid-execution
//!
//! A stand left `running` by a previous process is moved back to `pending`
//! together with its running pipelines and steps; unfinished jobs under those
//! steps become `manual` so the executor re-checks them before triggering.
//! Each stand is recovered in its own transaction: one failure is logged and
//! the pass moves on.

use stand_state::{StandStatus, StandStore};
use tracing::{error, info, instrument, warn};

use crate::active_set::ActiveSet;
use crate::error::EngineResult;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovered: Vec<String>,
    /// Stands claimed by a running task at the time of the pass.
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Recover every `running` stand not currently claimed in `active`.
///
/// Only the initial query can fail the pass; per-stand failures land in
/// [`RecoveryReport::failed`].
#[instrument(skip_all)]
pub async fn recover_stale_stands(
    store: &dyn StandStore,
    active: &ActiveSet,
) -> EngineResult<RecoveryReport> {
    let stale = store.stands_with_status(StandStatus::Running).await?;
    let mut report = RecoveryReport::default();
    if stale.is_empty() {
        info!("no interrupted stands to recover");
        return Ok(report);
    }

    for stand in stale {
        let Some(_claim) = active.try_claim(&stand.name) else {
            warn!(stand = %stand.name, "stand is active, not recovering");
            report.skipped.push(stand.name);
            continue;
        };

        match store.recover_stand(stand.id).await {
            Ok(()) => {
                info!(stand = %stand.name, "stand reverted to pending");
                report.recovered.push(stand.name);
            }
            Err(err) => {
                error!(stand = %stand.name, error = %err, "stand recovery failed");
                report.failed.push(stand.name);
            }
        }
    }

    info!(
        recovered = report.recovered.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "recovery pass complete"
    );
    Ok(report)
}
