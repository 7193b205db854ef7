//! End-to-end engine behaviour over the in-memory store and a scripted
//! provider. Time is paused, so job polling advances instantly.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gitlab_provider::fakes::{Operation, ProviderCall, ScriptedProvider};
use gitlab_provider::ProviderJob;
use stand_core::{EngineConfig, Lane, Scheduler, TickOutcome};
use stand_state::fakes::MemoryStandStore;
use stand_state::{
    Job, JobStatus, NewStand, NewStepState, Pipeline, ProvisionedPipeline, RunStatus, Stand,
    StandStatus, StandStore, Step, StepOutcome, StepState, StoreError, StoreResult,
};
use tokio::sync::{watch, Notify};
use uuid::Uuid;

fn pipeline_jobs() -> Vec<ProviderJob> {
    vec![
        ProviderJob::new(31, "[1-1]-helm", "helm"),
        ProviderJob::new(22, "[2-1]-k8s", "ansible"),
        ProviderJob::new(11, "[1-1]-vm", "terraform"),
        ProviderJob::new(21, "[1-1]-k8s", "ansible"),
        ProviderJob::new(99, "lint", "test"),
    ]
}

/// Delegates to the in-memory store. Can fail the next write of a chosen
/// stand status or step notification, and can hold provisioning after its
/// transaction commits until released.
struct FaultyStore {
    inner: Arc<MemoryStandStore>,
    failing_status: Mutex<Option<StandStatus>>,
    failing_append: Mutex<bool>,
    hold_provisioning: bool,
    committed: Notify,
    release: Notify,
}

impl FaultyStore {
    fn new(inner: Arc<MemoryStandStore>) -> Self {
        Self {
            inner,
            failing_status: Mutex::new(None),
            failing_append: Mutex::new(false),
            hold_provisioning: false,
            committed: Notify::new(),
            release: Notify::new(),
        }
    }

    fn holding_provisioning(mut self) -> Self {
        self.hold_provisioning = true;
        self
    }

    fn fail_next_status(&self, status: StandStatus) {
        *self.failing_status.lock().unwrap() = Some(status);
    }

    fn fail_next_append(&self) {
        *self.failing_append.lock().unwrap() = true;
    }
}

fn injected() -> StoreError {
    StoreError::Query("injected write failure".to_string())
}

#[async_trait]
impl StandStore for FaultyStore {
    async fn create_stand(&self, stand: NewStand) -> StoreResult<Stand> {
        self.inner.create_stand(stand).await
    }

    async fn stands_with_status(&self, status: StandStatus) -> StoreResult<Vec<Stand>> {
        self.inner.stands_with_status(status).await
    }

    async fn stand_by_name(&self, name: &str) -> StoreResult<Option<Stand>> {
        self.inner.stand_by_name(name).await
    }

    async fn list_stands(&self) -> StoreResult<Vec<Stand>> {
        self.inner.list_stands().await
    }

    async fn stand_products(&self, name: &str) -> StoreResult<Vec<String>> {
        self.inner.stand_products(name).await
    }

    async fn set_stand_status(&self, stand_id: Uuid, status: StandStatus) -> StoreResult<()> {
        let fail = {
            let mut failing = self.failing_status.lock().unwrap();
            let hit = *failing == Some(status);
            if hit {
                *failing = None;
            }
            hit
        };
        if fail {
            return Err(injected());
        }
        self.inner.set_stand_status(stand_id, status).await
    }

    async fn recover_stand(&self, stand_id: Uuid) -> StoreResult<()> {
        self.inner.recover_stand(stand_id).await
    }

    async fn record_provisioning(
        &self,
        stand_id: Uuid,
        pipeline: ProvisionedPipeline,
    ) -> StoreResult<Pipeline> {
        let pipeline = self.inner.record_provisioning(stand_id, pipeline).await?;
        if self.hold_provisioning {
            self.committed.notify_one();
            self.release.notified().await;
        }
        Ok(pipeline)
    }

    async fn pending_pipelines(&self, stand_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        self.inner.pending_pipelines(stand_id).await
    }

    async fn pipelines_for_stand(&self, stand_id: Uuid) -> StoreResult<Vec<Pipeline>> {
        self.inner.pipelines_for_stand(stand_id).await
    }

    async fn set_pipeline_status(&self, pipeline_id: Uuid, status: RunStatus) -> StoreResult<()> {
        self.inner.set_pipeline_status(pipeline_id, status).await
    }

    async fn pending_steps(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>> {
        self.inner.pending_steps(pipeline_id).await
    }

    async fn steps_for_pipeline(&self, pipeline_id: Uuid) -> StoreResult<Vec<Step>> {
        self.inner.steps_for_pipeline(pipeline_id).await
    }

    async fn set_step_status(&self, step_id: Uuid, status: RunStatus) -> StoreResult<()> {
        self.inner.set_step_status(step_id, status).await
    }

    async fn unfinished_jobs(&self, step_id: Uuid) -> StoreResult<Vec<Job>> {
        self.inner.unfinished_jobs(step_id).await
    }

    async fn jobs_for_step(&self, step_id: Uuid) -> StoreResult<Vec<Job>> {
        self.inner.jobs_for_step(step_id).await
    }

    async fn set_job_status(&self, job_id: Uuid, status: JobStatus) -> StoreResult<()> {
        self.inner.set_job_status(job_id, status).await
    }

    async fn mark_job_started(&self, job_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.mark_job_started(job_id, at).await
    }

    async fn mark_job_finished(&self, job_id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        self.inner.mark_job_finished(job_id, at).await
    }

    async fn append_step_state(&self, state: NewStepState) -> StoreResult<StepState> {
        if std::mem::take(&mut *self.failing_append.lock().unwrap()) {
            return Err(injected());
        }
        self.inner.append_step_state(state).await
    }

    async fn undelivered_step_states(&self) -> StoreResult<Vec<StepState>> {
        self.inner.undelivered_step_states().await
    }

    async fn mark_step_state_delivered(&self, id: Uuid) -> StoreResult<()> {
        self.inner.mark_step_state_delivered(id).await
    }
}

struct Harness {
    store: Arc<MemoryStandStore>,
    provider: Arc<ScriptedProvider>,
    scheduler: Scheduler,
}

impl Harness {
    fn new() -> Self {
        Self::with_provider(ScriptedProvider::new().with_pipeline_jobs(pipeline_jobs()))
    }

    fn with_provider(provider: ScriptedProvider) -> Self {
        let store = Arc::new(MemoryStandStore::new());
        Self::over(store.clone(), store, provider)
    }

    /// Wrap the in-memory store before handing it to the engine.
    fn faulty(wrap: impl FnOnce(FaultyStore) -> FaultyStore) -> (Self, Arc<FaultyStore>) {
        let memory = Arc::new(MemoryStandStore::new());
        let faulty = Arc::new(wrap(FaultyStore::new(memory.clone())));
        let provider = ScriptedProvider::new().with_pipeline_jobs(pipeline_jobs());
        (Self::over(memory, faulty.clone(), provider), faulty)
    }

    /// `store` is what the engine writes through; `memory` backs it and is
    /// what assertions read.
    fn over(
        memory: Arc<MemoryStandStore>,
        store: Arc<dyn StandStore>,
        provider: ScriptedProvider,
    ) -> Self {
        let provider = Arc::new(provider);
        let config = EngineConfig::default()
            .with_poll_interval(Duration::from_secs(1))
            .with_concurrency(2, 2);
        let scheduler = Scheduler::new(store, provider.clone(), config).unwrap();
        Self {
            store: memory,
            provider,
            scheduler,
        }
    }

    async fn create(&self, name: &str) -> Stand {
        self.store
            .create_stand(NewStand::new(
                name,
                7,
                vec!["A".to_string(), "B".to_string()],
                "master",
            ))
            .await
            .unwrap()
    }

    /// Create and provision a stand, leaving it `pending`.
    async fn provisioned(&self, name: &str) -> Stand {
        self.create(name).await;
        let outcome = self.scheduler.tick(Lane::Created).await.unwrap();
        assert!(matches!(outcome, TickOutcome::Completed { failed: 0, .. }));
        self.stand(name).await
    }

    async fn stand(&self, name: &str) -> Stand {
        self.store.stand_by_name(name).await.unwrap().unwrap()
    }

    fn job(&self, external_id: i64) -> Job {
        self.store
            .all_jobs()
            .into_iter()
            .find(|job| job.external_id == external_id)
            .unwrap()
    }

    fn played(&self) -> Vec<i64> {
        self.provider
            .calls_of(Operation::RunJob)
            .into_iter()
            .filter_map(|call| match call {
                ProviderCall::RunJob(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    async fn step_statuses(&self, stand: &Stand) -> Vec<RunStatus> {
        let pipeline = self.store.pipelines_for_stand(stand.id).await.unwrap().remove(0);
        self.store
            .steps_for_pipeline(pipeline.id)
            .await
            .unwrap()
            .into_iter()
            .map(|step| step.status)
            .collect()
    }
}

fn completed(admitted: usize, succeeded: usize, failed: usize) -> TickOutcome {
    TickOutcome::Completed {
        admitted,
        succeeded,
        failed,
    }
}

#[tokio::test(start_paused = true)]
async fn provisions_and_executes_a_stand() {
    let h = Harness::new();
    h.create("s1").await;

    assert_eq!(h.scheduler.tick(Lane::Created).await.unwrap(), completed(1, 1, 0));
    assert_eq!(
        h.provider.calls_of(Operation::CloneBranch),
        vec![ProviderCall::CloneBranch {
            name: "s1".to_string(),
            git_ref: "master".to_string()
        }]
    );
    assert!(h.provider.has_environment("s1"));
    assert_eq!(
        h.provider.variables("s1"),
        Some(vec!["A".to_string(), "B".to_string()])
    );

    let stand = h.stand("s1").await;
    assert_eq!(stand.status, StandStatus::Pending);
    // the unknown "test" stage is not persisted
    assert_eq!(h.store.all_jobs().len(), 4);

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 1, 0));
    assert_eq!(h.stand("s1").await.status, StandStatus::Success);
    assert_eq!(h.played(), vec![11, 21, 22, 31]);
    assert!(h.store.all_jobs().iter().all(|job| {
        job.status == JobStatus::Success && job.started_at.is_some() && job.finished_at.is_some()
    }));
    assert_eq!(
        h.store.pipelines_for_stand(stand.id).await.unwrap()[0].status,
        RunStatus::Success
    );

    let states = h.store.all_step_states();
    assert_eq!(
        states.iter().map(|s| s.ordinal).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(states.iter().all(|s| s.status == StepOutcome::Success));
    assert!(states.iter().all(|s| s.stand_name == "s1" && s.user_id == 7));
    assert_eq!(h.scheduler.job_cache().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn existing_variables_are_replaced() {
    let h = Harness::with_provider(
        ScriptedProvider::new()
            .with_branch("s1")
            .with_environment("s1")
            .with_variables("s1", &["OLD"])
            .with_pipeline_jobs(pipeline_jobs()),
    );
    h.provisioned("s1").await;

    assert!(h.provider.calls_of(Operation::CloneBranch).is_empty());
    assert!(h.provider.calls_of(Operation::CreateEnvironment).is_empty());
    assert!(h.provider.calls_of(Operation::CreateVariables).is_empty());
    assert_eq!(
        h.provider.variables("s1"),
        Some(vec!["A".to_string(), "B".to_string()])
    );
}

#[tokio::test(start_paused = true)]
async fn failed_provisioning_leaves_stand_created() {
    let h = Harness::new();
    h.provider.fail_on(Operation::RunPipeline);
    let stand = h.create("s1").await;

    assert_eq!(h.scheduler.tick(Lane::Created).await.unwrap(), completed(1, 0, 1));
    assert_eq!(h.stand("s1").await.status, StandStatus::Created);
    assert!(h.store.pipelines_for_stand(stand.id).await.unwrap().is_empty());
    assert!(h.scheduler.active_set().is_empty());
}

#[tokio::test(start_paused = true)]
async fn failed_job_halts_step_without_polling() {
    let h = Harness::new();
    let stand = h.provisioned("s1").await;
    h.store
        .set_job_status(h.job(11).id, JobStatus::Failed)
        .await
        .unwrap();

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 0, 1));
    assert!(h.provider.calls_of(Operation::JobStatus).is_empty());
    assert!(h.played().is_empty());

    assert_eq!(h.stand("s1").await.status, StandStatus::Error);
    assert_eq!(
        h.step_statuses(&stand).await,
        vec![RunStatus::Error, RunStatus::Pending, RunStatus::Pending]
    );
    assert_eq!(
        h.store.pipelines_for_stand(stand.id).await.unwrap()[0].status,
        RunStatus::Error
    );

    let states = h.store.all_step_states();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].status, StepOutcome::Error);
    assert_eq!(states[0].step_name, "Creating vm");
}

#[tokio::test(start_paused = true)]
async fn job_failure_in_second_step_stops_the_pipeline() {
    let h = Harness::new();
    let stand = h.provisioned("s1").await;
    h.provider
        .script_job(22, &[JobStatus::Running, JobStatus::Failed]);

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 0, 1));
    assert_eq!(h.played(), vec![11, 21, 22]);
    assert_eq!(
        h.step_statuses(&stand).await,
        vec![RunStatus::Success, RunStatus::Error, RunStatus::Pending]
    );
    assert_eq!(h.stand("s1").await.status, StandStatus::Error);

    let failed = h.job(22);
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.finished_at.is_some());
    assert_eq!(h.job(31).status, JobStatus::Manual);

    let outcomes: Vec<(u32, StepOutcome)> = h
        .store
        .all_step_states()
        .into_iter()
        .map(|s| (s.ordinal, s.status))
        .collect();
    assert_eq!(
        outcomes,
        vec![(1, StepOutcome::Success), (2, StepOutcome::Error)]
    );
}

#[tokio::test(start_paused = true)]
async fn transient_poll_error_returns_stand_to_pending() {
    let h = Harness::new();
    let stand = h.provisioned("s1").await;
    h.provider.fail_status_of(11);

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 0, 1));
    assert_eq!(h.stand("s1").await.status, StandStatus::Pending);
    assert_eq!(
        h.step_statuses(&stand).await,
        vec![RunStatus::Pending, RunStatus::Pending, RunStatus::Pending]
    );
    assert_eq!(
        h.store.pending_pipelines(stand.id).await.unwrap().len(),
        1
    );

    let job = h.job(11);
    assert_eq!(job.status, JobStatus::Manual);
    assert!(job.started_at.is_some());
    assert!(h.store.all_step_states().is_empty());
}

#[tokio::test(start_paused = true)]
async fn started_job_is_watched_not_replayed_after_recovery() {
    let h = Harness::new();
    let stand = h.provisioned("s1").await;
    let pipeline = h.store.pending_pipelines(stand.id).await.unwrap().remove(0);
    let first_step = h.store.pending_steps(pipeline.id).await.unwrap().remove(0);
    let job = h.job(11);

    h.store
        .set_stand_status(stand.id, StandStatus::Running)
        .await
        .unwrap();
    h.store
        .set_pipeline_status(pipeline.id, RunStatus::Running)
        .await
        .unwrap();
    h.store
        .set_step_status(first_step.id, RunStatus::Running)
        .await
        .unwrap();
    h.store.set_job_status(job.id, JobStatus::Running).await.unwrap();
    h.store.mark_job_started(job.id, Utc::now()).await.unwrap();

    let report = h.scheduler.recover().await.unwrap();
    assert_eq!(report.recovered, vec!["s1".to_string()]);
    assert!(report.is_clean());

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 1, 0));
    assert_eq!(h.played(), vec![21, 22, 31]);
    assert!(h
        .provider
        .calls_of(Operation::JobStatus)
        .contains(&ProviderCall::JobStatus(11)));
    assert_eq!(h.stand("s1").await.status, StandStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn recovery_is_per_stand_and_idempotent() {
    let h = Harness::new();
    let good = h.create("good").await;
    let stuck = h.create("stuck").await;
    assert_eq!(h.scheduler.tick(Lane::Created).await.unwrap(), completed(2, 2, 0));

    for stand in [&good, &stuck] {
        h.store
            .set_stand_status(stand.id, StandStatus::Running)
            .await
            .unwrap();
    }
    h.store.fail_recovery_of("stuck");

    let report = h.scheduler.recover().await.unwrap();
    assert_eq!(report.recovered, vec!["good".to_string()]);
    assert_eq!(report.failed, vec!["stuck".to_string()]);
    assert!(!report.is_clean());

    let again = h.scheduler.recover().await.unwrap();
    assert!(again.recovered.is_empty());
    assert_eq!(again.failed, vec!["stuck".to_string()]);

    assert_eq!(h.stand("good").await.status, StandStatus::Pending);
    assert_eq!(h.stand("stuck").await.status, StandStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn recovery_skips_claimed_stands() {
    let h = Harness::new();
    let stand = h.provisioned("busy").await;
    h.store
        .set_stand_status(stand.id, StandStatus::Running)
        .await
        .unwrap();

    let _claim = h.scheduler.active_set().try_claim("busy").unwrap();
    let report = h.scheduler.recover().await.unwrap();
    assert_eq!(report.skipped, vec!["busy".to_string()]);
    assert_eq!(h.stand("busy").await.status, StandStatus::Running);
}

#[tokio::test(start_paused = true)]
async fn claimed_stand_is_not_admitted() {
    let h = Harness::new();
    h.create("s1").await;

    let claim = h.scheduler.active_set().try_claim("s1").unwrap();
    assert_eq!(h.scheduler.tick(Lane::Created).await.unwrap(), completed(0, 0, 0));
    assert!(h.provider.calls().is_empty());
    assert_eq!(h.stand("s1").await.status, StandStatus::Created);

    drop(claim);
    assert_eq!(h.scheduler.tick(Lane::Created).await.unwrap(), completed(1, 1, 0));
    assert!(h.scheduler.active_set().is_empty());
}

#[tokio::test(start_paused = true)]
async fn pending_lane_skips_stand_still_held_by_provisioning() {
    let (h, store) = Harness::faulty(FaultyStore::holding_provisioning);
    h.create("s1").await;

    let scheduler = h.scheduler.clone();
    let provisioning = tokio::spawn(async move { scheduler.tick(Lane::Created).await });
    store.committed.notified().await;

    // provisioning has committed but its worker still holds the claim
    assert_eq!(h.stand("s1").await.status, StandStatus::Pending);
    assert!(h.scheduler.active_set().contains("s1"));
    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(0, 0, 0));
    assert!(h.played().is_empty());
    assert!(h.provider.calls_of(Operation::JobStatus).is_empty());

    store.release.notify_one();
    assert_eq!(provisioning.await.unwrap().unwrap(), completed(1, 1, 0));
    assert!(h.scheduler.active_set().is_empty());

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 1, 0));
    assert_eq!(h.stand("s1").await.status, StandStatus::Success);
    assert_eq!(h.played(), vec![11, 21, 22, 31]);
}

#[tokio::test(start_paused = true)]
async fn failed_final_write_is_settled_on_next_tick() {
    let (h, store) = Harness::faulty(|store| store);
    let stand = h.provisioned("s1").await;
    store.fail_next_status(StandStatus::Success);

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 0, 1));
    assert_eq!(h.stand("s1").await.status, StandStatus::Pending);
    assert_eq!(
        h.store.pipelines_for_stand(stand.id).await.unwrap()[0].status,
        RunStatus::Success
    );

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 1, 0));
    assert_eq!(h.stand("s1").await.status, StandStatus::Success);
    assert_eq!(h.played(), vec![11, 21, 22, 31]);
    assert_eq!(h.store.all_step_states().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn recovered_stand_takes_status_of_finished_pipeline() {
    let h = Harness::new();
    let done = h.provisioned("done").await;
    let broken = h.provisioned("broken").await;
    let pipeline = h.store.pipelines_for_stand(broken.id).await.unwrap().remove(0);
    h.store
        .set_pipeline_status(pipeline.id, RunStatus::Error)
        .await
        .unwrap();
    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(2, 2, 0));
    assert_eq!(h.stand("broken").await.status, StandStatus::Error);
    assert_eq!(h.played(), vec![11, 21, 22, 31]);

    // a crash between the last pipeline write and the stand write
    h.store
        .set_stand_status(done.id, StandStatus::Running)
        .await
        .unwrap();
    let report = h.scheduler.recover().await.unwrap();
    assert_eq!(report.recovered, vec!["done".to_string()]);
    assert_eq!(h.stand("done").await.status, StandStatus::Pending);

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 1, 0));
    assert_eq!(h.stand("done").await.status, StandStatus::Success);
    assert_eq!(h.played().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn failed_notification_keeps_step_open() {
    let (h, store) = Harness::faulty(|store| store);
    let stand = h.provisioned("s1").await;
    store.fail_next_append();

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 0, 1));
    assert_eq!(h.stand("s1").await.status, StandStatus::Pending);
    assert_eq!(
        h.step_statuses(&stand).await,
        vec![RunStatus::Pending, RunStatus::Pending, RunStatus::Pending]
    );
    assert_eq!(h.job(11).status, JobStatus::Success);
    assert!(h.store.all_step_states().is_empty());

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 1, 0));
    assert_eq!(h.played(), vec![11, 21, 22, 31]);
    assert_eq!(
        h.store
            .all_step_states()
            .iter()
            .map(|s| s.ordinal)
            .collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test(start_paused = true)]
async fn auto_started_jobs_are_watched_not_played() {
    let h = Harness::with_provider(ScriptedProvider::new().with_pipeline_jobs(vec![
        ProviderJob::new(11, "[1-1]-vm", "terraform").with_status(JobStatus::Pending),
        ProviderJob::new(21, "[1-1]-k8s", "ansible").with_status(JobStatus::Running),
        ProviderJob::new(31, "[1-1]-helm", "helm"),
    ]));
    h.provisioned("s1").await;
    assert_eq!(h.job(11).status, JobStatus::Pending);
    assert_eq!(h.job(21).status, JobStatus::Running);
    assert_eq!(h.job(31).status, JobStatus::Manual);

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 1, 0));
    assert_eq!(h.played(), vec![31]);
    assert!(h.job(11).started_at.is_some());
    assert_eq!(h.stand("s1").await.status, StandStatus::Success);
}

#[tokio::test(start_paused = true)]
async fn unplayable_job_fails_the_stand() {
    let h = Harness::with_provider(ScriptedProvider::new().with_pipeline_jobs(vec![
        ProviderJob::new(11, "[1-1]-vm", "terraform").with_status(JobStatus::Running),
    ]));
    h.provisioned("s1").await;
    // stored as manual without a start time, so the executor tries to play it
    h.store
        .set_job_status(h.job(11).id, JobStatus::Manual)
        .await
        .unwrap();

    assert_eq!(h.scheduler.tick(Lane::Pending).await.unwrap(), completed(1, 0, 1));
    assert_eq!(h.played(), vec![11]);
    assert_eq!(h.stand("s1").await.status, StandStatus::Error);
    assert!(h.store.pending_pipelines(h.stand("s1").await.id).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn busy_lane_skips_its_next_tick() {
    let h = Harness::new();
    h.provisioned("s1").await;
    h.provider.script_job(11, &[JobStatus::Running]);

    let scheduler = h.scheduler.clone();
    let running = tokio::spawn(async move { scheduler.tick(Lane::Pending).await });
    tokio::time::sleep(Duration::from_millis(1)).await;

    assert!(h.scheduler.active_set().contains("s1"));
    assert_eq!(
        h.scheduler.tick(Lane::Pending).await.unwrap(),
        TickOutcome::Skipped
    );
    // lanes are independent
    assert_eq!(h.scheduler.tick(Lane::Created).await.unwrap(), completed(0, 0, 0));

    running.abort();
    assert!(running.await.unwrap_err().is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn run_loop_drives_both_lanes_until_shutdown() {
    let h = Harness::new();
    h.create("s1").await;

    let (tx, rx) = watch::channel(false);
    let scheduler = h.scheduler.clone();
    let run = tokio::spawn(async move { scheduler.run(rx).await });

    tokio::time::sleep(Duration::from_secs(40)).await;
    tx.send(true).unwrap();
    run.await.unwrap();
    h.scheduler.drain().await;

    assert_eq!(h.stand("s1").await.status, StandStatus::Success);
    assert_eq!(h.store.all_step_states().len(), 3);
}

#[test]
fn invalid_config_is_rejected() {
    let store = Arc::new(MemoryStandStore::new());
    let provider = Arc::new(ScriptedProvider::new());
    let config = EngineConfig::default().with_concurrency(0, 1);
    assert!(Scheduler::new(store, provider, config).is_err());
}
