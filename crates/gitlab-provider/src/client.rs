//! GitLab REST implementation of [`CiProvider`]
//!
//! All endpoints are project-scoped (`{api_url}/projects/{project_id}/...`).
//! Every request carries the `PRIVATE-TOKEN` header and is bounded by the
//! client timeout. Existence checks read a 404 as "absent"; any other non-2xx
//! response is an error.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use stand_state::JobStatus;
use tracing::{debug, instrument};

use crate::config::GitlabConfig;
use crate::error::ProviderError;
use crate::provider::{CiProvider, ProviderJob, ProviderResult};

/// Name of the project variable holding a stand's product list.
pub const PRODUCTS_VARIABLE: &str = "PRODUCTS";

/// Upper bound GitLab accepts for `per_page`.
const JOBS_PER_PAGE: &str = "100";

#[derive(Debug, Deserialize)]
struct EnvironmentDto {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PipelineDto {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct JobDto {
    id: i64,
    name: String,
    stage: String,
    #[serde(default)]
    status: Option<String>,
}

impl JobDto {
    /// Jobs listed without a state are treated as waiting to be played.
    fn into_provider_job(self) -> ProviderResult<ProviderJob> {
        let status = match self.status.as_deref() {
            Some(raw) => map_job_status(raw)?,
            None => JobStatus::Manual,
        };
        Ok(ProviderJob::new(self.id, self.name, self.stage).with_status(status))
    }
}

/// Map a GitLab job state onto the stand job vocabulary.
pub fn map_job_status(raw: &str) -> ProviderResult<JobStatus> {
    match raw {
        "manual" => Ok(JobStatus::Manual),
        "created" | "waiting_for_resource" | "preparing" | "scheduled" | "pending" => {
            Ok(JobStatus::Pending)
        }
        "running" | "canceling" => Ok(JobStatus::Running),
        "success" => Ok(JobStatus::Success),
        "failed" => Ok(JobStatus::Failed),
        "canceled" | "skipped" => Ok(JobStatus::Canceled),
        other => Err(ProviderError::UnexpectedStatus(other.to_string())),
    }
}

fn join_products(products: &[String]) -> String {
    products.join(",")
}

/// GitLab API client bound to one project
#[derive(Debug, Clone)]
pub struct GitlabClient {
    http: reqwest::Client,
    project_url: Url,
    trigger_token: String,
}

impl GitlabClient {
    pub fn new(config: &GitlabConfig) -> ProviderResult<Self> {
        config.validate()?;

        let mut token = HeaderValue::from_str(&config.token)
            .map_err(|e| ProviderError::Client(format!("invalid token header: {e}")))?;
        token.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert("PRIVATE-TOKEN", token);

        let http = reqwest::Client::builder()
            .user_agent(concat!("standd/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        let project_url = project_url(&config.api_url, &config.project_id)?;
        Ok(Self {
            http,
            project_url,
            trigger_token: config.trigger_token.clone(),
        })
    }

    /// Project-scoped endpoint; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> ProviderResult<Url> {
        let mut url = self.project_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::InvalidUrl(self.project_url.to_string()))?
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> ProviderResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn exists(&self, request: RequestBuilder) -> ProviderResult<bool> {
        match self.send(request).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn decode<T: DeserializeOwned>(&self, request: RequestBuilder) -> ProviderResult<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

fn project_url(api_url: &str, project_id: &str) -> ProviderResult<Url> {
    let mut url =
        Url::parse(api_url).map_err(|e| ProviderError::InvalidUrl(format!("{api_url}: {e}")))?;
    url.path_segments_mut()
        .map_err(|_| ProviderError::InvalidUrl(api_url.to_string()))?
        .pop_if_empty()
        .extend(["projects", project_id]);
    Ok(url)
}

#[async_trait]
impl CiProvider for GitlabClient {
    #[instrument(skip(self))]
    async fn branch_exists(&self, name: &str) -> ProviderResult<bool> {
        let url = self.endpoint(&["repository", "branches", name])?;
        self.exists(self.http.get(url)).await
    }

    #[instrument(skip(self))]
    async fn clone_branch(&self, name: &str, git_ref: &str) -> ProviderResult<()> {
        let url = self.endpoint(&["repository", "branches"])?;
        let body = json!({ "branch": name, "ref": git_ref });
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn environment_exists(&self, name: &str) -> ProviderResult<bool> {
        let mut url = self.endpoint(&["environments"])?;
        url.query_pairs_mut().append_pair("search", name);
        let found: Vec<EnvironmentDto> = self.decode(self.http.get(url)).await?;
        Ok(found.iter().any(|env| env.name == name))
    }

    #[instrument(skip(self))]
    async fn create_environment(&self, name: &str) -> ProviderResult<()> {
        let url = self.endpoint(&["environments"])?;
        self.send(self.http.post(url).json(&json!({ "name": name })))
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn variables_exist(&self, environment: &str) -> ProviderResult<bool> {
        let mut url = self.endpoint(&["variables", PRODUCTS_VARIABLE])?;
        url.query_pairs_mut()
            .append_pair("filter[environment_scope]", environment);
        self.exists(self.http.get(url)).await
    }

    #[instrument(skip(self))]
    async fn create_variables(
        &self,
        environment: &str,
        products: &[String],
    ) -> ProviderResult<()> {
        let url = self.endpoint(&["variables"])?;
        let body = json!({
            "key": PRODUCTS_VARIABLE,
            "value": join_products(products),
            "environment_scope": environment,
        });
        self.send(self.http.post(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_variables(
        &self,
        environment: &str,
        products: &[String],
    ) -> ProviderResult<()> {
        let mut url = self.endpoint(&["variables", PRODUCTS_VARIABLE])?;
        url.query_pairs_mut()
            .append_pair("filter[environment_scope]", environment);
        let body = json!({ "value": join_products(products) });
        self.send(self.http.put(url).json(&body)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn run_pipeline(&self, branch: &str) -> ProviderResult<i64> {
        let url = self.endpoint(&["trigger", "pipeline"])?;
        let body = json!({ "token": self.trigger_token, "ref": branch });
        let pipeline: PipelineDto = self.decode(self.http.post(url).json(&body)).await?;
        debug!(pipeline = pipeline.id, "pipeline triggered");
        Ok(pipeline.id)
    }

    #[instrument(skip(self))]
    async fn jobs_for_pipeline(&self, pipeline_id: i64) -> ProviderResult<Vec<ProviderJob>> {
        let id = pipeline_id.to_string();
        let mut url = self.endpoint(&["pipelines", &id, "jobs"])?;
        url.query_pairs_mut().append_pair("per_page", JOBS_PER_PAGE);
        let jobs: Vec<JobDto> = self.decode(self.http.get(url)).await?;
        debug!(count = jobs.len(), "pipeline jobs listed");
        jobs.into_iter().map(JobDto::into_provider_job).collect()
    }

    #[instrument(skip(self))]
    async fn run_job(&self, job_id: i64) -> ProviderResult<()> {
        let id = job_id.to_string();
        let url = self.endpoint(&["jobs", &id, "play"])?;
        self.send(self.http.post(url)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn job_status(&self, job_id: i64) -> ProviderResult<JobStatus> {
        let id = job_id.to_string();
        let url = self.endpoint(&["jobs", &id])?;
        let job: JobDto = self.decode(self.http.get(url)).await?;
        let raw = job
            .status
            .ok_or_else(|| ProviderError::Decode(format!("job {job_id} has no status")))?;
        map_job_status(&raw)
    }
}
