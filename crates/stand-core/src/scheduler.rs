//! Dual-lane dispatch loop
//!
//! Two lanes tick on independent intervals:
//! - `Created` provisions stands in status `created`;
//! - `Pending` executes stands in status `pending`.
//!
//! A lane runs at most one tick at a time. A tick that fires while the
//! previous one is still working is skipped, never queued. Inside a tick,
//! every eligible stand not already claimed in the shared [`ActiveSet`] is
//! admitted into the lane's worker pool, and the tick completes once all of
//! its admitted work has finished.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use gitlab_provider::CiProvider;
use stand_state::{Stand, StandStatus, StandStore};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::active_set::ActiveSet;
use crate::cache::JobStatusCache;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::executor::StandExecutor;
use crate::monitor::JobMonitor;
use crate::provisioning::Provisioner;
use crate::recovery::{recover_stale_stands, RecoveryReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Executes pipelines of `pending` stands
    Pending,
    /// Provisions `created` stands
    Created,
}

impl Lane {
    /// Stand status this lane picks up.
    pub fn status(&self) -> StandStatus {
        match self {
            Lane::Pending => StandStatus::Pending,
            Lane::Created => StandStatus::Created,
        }
    }
}

impl fmt::Display for Lane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.status().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The previous tick of the lane was still running.
    Skipped,
    Completed {
        admitted: usize,
        succeeded: usize,
        failed: usize,
    },
}

struct LaneSlots {
    /// Single permit held for the duration of a tick
    tick: Arc<Semaphore>,
    /// Bounded worker pool for the stands of a tick
    workers: Arc<Semaphore>,
}

impl LaneSlots {
    fn new(concurrency: usize) -> Self {
        Self {
            tick: Arc::new(Semaphore::new(1)),
            workers: Arc::new(Semaphore::new(concurrency)),
        }
    }
}

struct Inner {
    store: Arc<dyn StandStore>,
    provisioner: Provisioner,
    executor: StandExecutor,
    active: ActiveSet,
    cache: JobStatusCache,
    config: EngineConfig,
    pending: LaneSlots,
    created: LaneSlots,
    in_flight: Mutex<JoinSet<()>>,
}

/// Owns the per-process dispatch state: active set, job status cache and
/// lane slots. Cheap to clone; clones share that state.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn StandStore>,
        provider: Arc<dyn CiProvider>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;

        let cache = JobStatusCache::new();
        let monitor = JobMonitor::new(
            Arc::clone(&store),
            Arc::clone(&provider),
            cache.clone(),
            config.poll_interval,
        );
        let inner = Inner {
            provisioner: Provisioner::new(Arc::clone(&store), Arc::clone(&provider)),
            executor: StandExecutor::new(Arc::clone(&store), provider, monitor),
            store,
            active: ActiveSet::new(),
            cache,
            pending: LaneSlots::new(config.concurrency(Lane::Pending)),
            created: LaneSlots::new(config.concurrency(Lane::Created)),
            config,
            in_flight: Mutex::new(JoinSet::new()),
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn active_set(&self) -> &ActiveSet {
        &self.inner.active
    }

    pub fn job_cache(&self) -> &JobStatusCache {
        &self.inner.cache
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Revert stands left `running` by a previous process. Run once before
    /// [`Scheduler::run`].
    pub async fn recover(&self) -> EngineResult<RecoveryReport> {
        recover_stale_stands(self.inner.store.as_ref(), &self.inner.active).await
    }

    fn slots(&self, lane: Lane) -> &LaneSlots {
        match lane {
            Lane::Pending => &self.inner.pending,
            Lane::Created => &self.inner.created,
        }
    }

    /// One tick of `lane`: claim eligible stands and run them to completion.
    #[instrument(skip_all, fields(lane = %lane))]
    pub async fn tick(&self, lane: Lane) -> EngineResult<TickOutcome> {
        let slots = self.slots(lane);
        let Ok(_tick) = Arc::clone(&slots.tick).try_acquire_owned() else {
            warn!("previous tick still running, skipping");
            return Ok(TickOutcome::Skipped);
        };

        let stands = self.inner.store.stands_with_status(lane.status()).await?;
        let mut tasks = JoinSet::new();
        let mut admitted = 0;

        for stand in stands {
            let Some(claim) = self.inner.active.try_claim(&stand.name) else {
                debug!(stand = %stand.name, "stand already active");
                continue;
            };
            let Ok(permit) = Arc::clone(&slots.workers).acquire_owned().await else {
                error!(stand = %stand.name, "worker pool closed");
                break;
            };

            admitted += 1;
            let this = self.clone();
            tasks.spawn(async move {
                let _claim = claim;
                let _permit = permit;
                let result = this.process(lane, &stand).await;
                (stand.name, result)
            });
        }

        let (mut succeeded, mut failed) = (0, 0);
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => succeeded += 1,
                Ok((name, Err(err))) => {
                    failed += 1;
                    error!(stand = %name, error = %err, transient = err.is_transient(), "stand processing failed");
                }
                Err(join_err) => {
                    failed += 1;
                    error!(error = %join_err, "stand task aborted");
                }
            }
        }

        if admitted > 0 {
            info!(admitted, succeeded, failed, "tick complete");
        }
        Ok(TickOutcome::Completed {
            admitted,
            succeeded,
            failed,
        })
    }

    async fn process(&self, lane: Lane, stand: &Stand) -> EngineResult<()> {
        match lane {
            Lane::Created => self.inner.provisioner.provision(stand).await.map(|_| ()),
            Lane::Pending => self.inner.executor.execute(stand).await.map(|_| ()),
        }
    }

    /// Drive both lanes until `shutdown` turns `true` or its sender is
    /// dropped. Each lane first fires one period after start; missed ticks
    /// are skipped. Ticks run as background tasks, see [`Scheduler::drain`].
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let config = &self.inner.config;
        let mut pending = lane_interval(config.period(Lane::Pending));
        let mut created = lane_interval(config.period(Lane::Created));

        info!(
            pending_period = ?config.pending_period,
            created_period = ?config.created_period,
            "scheduler started"
        );

        loop {
            tokio::select! {
                _ = pending.tick() => self.spawn_tick(Lane::Pending),
                _ = created.tick() => self.spawn_tick(Lane::Created),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    fn spawn_tick(&self, lane: Lane) {
        let this = self.clone();
        let mut in_flight = self.in_flight();
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            if let Err(err) = this.tick(lane).await {
                error!(lane = %lane, error = %err, "tick failed");
            }
        });
    }

    /// Wait for every tick started by [`Scheduler::run`] to finish.
    pub async fn drain(&self) {
        let mut ticks = std::mem::take(&mut *self.in_flight());
        let pending = ticks.len();
        if pending > 0 {
            info!(ticks = pending, "waiting for in-flight ticks");
        }
        while let Some(joined) = ticks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "tick task aborted");
            }
        }
    }

    fn in_flight(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn lane_interval(period: Duration) -> Interval {
    let mut ticks = interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticks
}
