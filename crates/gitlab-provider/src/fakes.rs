//! Scripted in-memory provider (testing)
//!
//! `ScriptedProvider` keeps branches, environments and variables in memory,
//! serves a configured job list for every triggered pipeline and replays a
//! per-job status script on `job_status`. Playing a job listed in any state
//! other than `manual` is refused with HTTP 400. Every call is recorded,
//! including the ones configured to fail.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use stand_state::JobStatus;

use crate::error::ProviderError;
use crate::provider::{CiProvider, ProviderJob, ProviderResult};

/// Provider operation, used to select calls and inject failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    BranchExists,
    CloneBranch,
    EnvironmentExists,
    CreateEnvironment,
    VariablesExist,
    CreateVariables,
    UpdateVariables,
    RunPipeline,
    JobsForPipeline,
    RunJob,
    JobStatus,
}

/// One recorded provider call with its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderCall {
    BranchExists(String),
    CloneBranch { name: String, git_ref: String },
    EnvironmentExists(String),
    CreateEnvironment(String),
    VariablesExist(String),
    CreateVariables { environment: String, products: Vec<String> },
    UpdateVariables { environment: String, products: Vec<String> },
    RunPipeline(String),
    JobsForPipeline(i64),
    RunJob(i64),
    JobStatus(i64),
}

impl ProviderCall {
    pub fn operation(&self) -> Operation {
        match self {
            ProviderCall::BranchExists(_) => Operation::BranchExists,
            ProviderCall::CloneBranch { .. } => Operation::CloneBranch,
            ProviderCall::EnvironmentExists(_) => Operation::EnvironmentExists,
            ProviderCall::CreateEnvironment(_) => Operation::CreateEnvironment,
            ProviderCall::VariablesExist(_) => Operation::VariablesExist,
            ProviderCall::CreateVariables { .. } => Operation::CreateVariables,
            ProviderCall::UpdateVariables { .. } => Operation::UpdateVariables,
            ProviderCall::RunPipeline(_) => Operation::RunPipeline,
            ProviderCall::JobsForPipeline(_) => Operation::JobsForPipeline,
            ProviderCall::RunJob(_) => Operation::RunJob,
            ProviderCall::JobStatus(_) => Operation::JobStatus,
        }
    }
}

#[derive(Debug)]
struct State {
    calls: Vec<ProviderCall>,
    branches: HashSet<String>,
    environments: HashSet<String>,
    variables: HashMap<String, Vec<String>>,
    pipeline_jobs: Vec<ProviderJob>,
    next_pipeline_id: i64,
    /// Remaining statuses per job; the last one repeats forever.
    scripts: HashMap<i64, VecDeque<JobStatus>>,
    failing: HashSet<Operation>,
    failing_jobs: HashSet<i64>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            branches: HashSet::new(),
            environments: HashSet::new(),
            variables: HashMap::new(),
            pipeline_jobs: Vec::new(),
            next_pipeline_id: 1000,
            scripts: HashMap::new(),
            failing: HashSet::new(),
            failing_jobs: HashSet::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ScriptedProvider {
    state: Mutex<State>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_branch(self, name: &str) -> Self {
        self.lock().branches.insert(name.to_string());
        self
    }

    pub fn with_environment(self, name: &str) -> Self {
        self.lock().environments.insert(name.to_string());
        self
    }

    pub fn with_variables(self, environment: &str, products: &[&str]) -> Self {
        self.lock().variables.insert(
            environment.to_string(),
            products.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    /// Jobs returned for every pipeline this provider triggers.
    pub fn with_pipeline_jobs(self, jobs: Vec<ProviderJob>) -> Self {
        self.lock().pipeline_jobs = jobs;
        self
    }

    /// Statuses `job_status` returns for `job_id`, in order. Unscripted jobs
    /// report `success`.
    pub fn script_job(&self, job_id: i64, statuses: &[JobStatus]) {
        self.lock()
            .scripts
            .insert(job_id, statuses.iter().copied().collect());
    }

    /// Every subsequent call of `operation` fails with HTTP 500.
    pub fn fail_on(&self, operation: Operation) {
        self.lock().failing.insert(operation);
    }

    /// `job_status` for this job fails with HTTP 502.
    pub fn fail_status_of(&self, job_id: i64) {
        self.lock().failing_jobs.insert(job_id);
    }

    pub fn calls(&self) -> Vec<ProviderCall> {
        self.lock().calls.clone()
    }

    pub fn calls_of(&self, operation: Operation) -> Vec<ProviderCall> {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.operation() == operation)
            .cloned()
            .collect()
    }

    pub fn variables(&self, environment: &str) -> Option<Vec<String>> {
        self.lock().variables.get(environment).cloned()
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.lock().branches.contains(name)
    }

    pub fn has_environment(&self, name: &str) -> bool {
        self.lock().environments.contains(name)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Record the call and return the guard unless the operation must fail.
    fn record(&self, call: ProviderCall) -> ProviderResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        let operation = call.operation();
        state.calls.push(call);
        if state.failing.contains(&operation) {
            return Err(ProviderError::Status {
                status: 500,
                body: format!("scripted {operation:?} failure"),
            });
        }
        Ok(state)
    }
}

#[async_trait]
impl CiProvider for ScriptedProvider {
    async fn branch_exists(&self, name: &str) -> ProviderResult<bool> {
        let state = self.record(ProviderCall::BranchExists(name.to_string()))?;
        Ok(state.branches.contains(name))
    }

    async fn clone_branch(&self, name: &str, git_ref: &str) -> ProviderResult<()> {
        let mut state = self.record(ProviderCall::CloneBranch {
            name: name.to_string(),
            git_ref: git_ref.to_string(),
        })?;
        state.branches.insert(name.to_string());
        Ok(())
    }

    async fn environment_exists(&self, name: &str) -> ProviderResult<bool> {
        let state = self.record(ProviderCall::EnvironmentExists(name.to_string()))?;
        Ok(state.environments.contains(name))
    }

    async fn create_environment(&self, name: &str) -> ProviderResult<()> {
        let mut state = self.record(ProviderCall::CreateEnvironment(name.to_string()))?;
        state.environments.insert(name.to_string());
        Ok(())
    }

    async fn variables_exist(&self, environment: &str) -> ProviderResult<bool> {
        let state = self.record(ProviderCall::VariablesExist(environment.to_string()))?;
        Ok(state.variables.contains_key(environment))
    }

    async fn create_variables(
        &self,
        environment: &str,
        products: &[String],
    ) -> ProviderResult<()> {
        let mut state = self.record(ProviderCall::CreateVariables {
            environment: environment.to_string(),
            products: products.to_vec(),
        })?;
        if state.variables.contains_key(environment) {
            return Err(ProviderError::Status {
                status: 400,
                body: format!("PRODUCTS already exists for {environment}"),
            });
        }
        state
            .variables
            .insert(environment.to_string(), products.to_vec());
        Ok(())
    }

    async fn update_variables(
        &self,
        environment: &str,
        products: &[String],
    ) -> ProviderResult<()> {
        let mut state = self.record(ProviderCall::UpdateVariables {
            environment: environment.to_string(),
            products: products.to_vec(),
        })?;
        match state.variables.get_mut(environment) {
            Some(current) => {
                *current = products.to_vec();
                Ok(())
            }
            None => Err(ProviderError::Status {
                status: 404,
                body: "404 Variable Not Found".to_string(),
            }),
        }
    }

    async fn run_pipeline(&self, branch: &str) -> ProviderResult<i64> {
        let mut state = self.record(ProviderCall::RunPipeline(branch.to_string()))?;
        let id = state.next_pipeline_id;
        state.next_pipeline_id += 1;
        Ok(id)
    }

    async fn jobs_for_pipeline(&self, pipeline_id: i64) -> ProviderResult<Vec<ProviderJob>> {
        let state = self.record(ProviderCall::JobsForPipeline(pipeline_id))?;
        Ok(state.pipeline_jobs.clone())
    }

    async fn run_job(&self, job_id: i64) -> ProviderResult<()> {
        let state = self.record(ProviderCall::RunJob(job_id))?;
        let listed = state.pipeline_jobs.iter().find(|job| job.id == job_id);
        if listed.is_some_and(|job| job.status != JobStatus::Manual) {
            return Err(ProviderError::Status {
                status: 400,
                body: "400 Bad request - Unplayable Job".to_string(),
            });
        }
        Ok(())
    }

    async fn job_status(&self, job_id: i64) -> ProviderResult<JobStatus> {
        let mut state = self.record(ProviderCall::JobStatus(job_id))?;
        if state.failing_jobs.contains(&job_id) {
            return Err(ProviderError::Status {
                status: 502,
                body: "bad gateway".to_string(),
            });
        }
        let status = match state.scripts.get_mut(&job_id) {
            Some(script) if script.len() > 1 => script.pop_front(),
            Some(script) => script.front().copied(),
            None => None,
        };
        Ok(status.unwrap_or(JobStatus::Success))
    }
}
