//! GitLab client configuration

use std::fmt;
use std::time::Duration;

use reqwest::Url;

use crate::error::ProviderError;

/// Per-request timeout applied by the HTTP client.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Project scope and credentials for the GitLab REST API
#[derive(Clone)]
pub struct GitlabConfig {
    /// API root, e.g. "https://gitlab.example.com/api/v4"
    pub api_url: String,
    /// Personal/project access token sent as `PRIVATE-TOKEN`
    pub token: String,
    /// Numeric id or URL-encoded path of the project
    pub project_id: String,
    /// Pipeline trigger token
    pub trigger_token: String,
    pub timeout: Duration,
}

impl fmt::Debug for GitlabConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitlabConfig")
            .field("api_url", &self.api_url)
            .field("token", &"<redacted>")
            .field("project_id", &self.project_id)
            .field("trigger_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl GitlabConfig {
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        project_id: impl Into<String>,
        trigger_token: impl Into<String>,
    ) -> Self {
        Self {
            api_url: api_url.into(),
            token: token.into(),
            project_id: project_id.into(),
            trigger_token: trigger_token.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Reads:
    /// - GITLAB_API_URL
    /// - GITLAB_TOKEN
    /// - GITLAB_PROJECT_ID
    /// - GITLAB_TRIGGER_PIPELINE_TOKEN
    /// - GITLAB_TIMEOUT_SECS (optional, default: 10)
    ///
    /// Missing values are left empty; call [`GitlabConfig::validate`] before use.
    pub fn from_env() -> Result<Self, ProviderError> {
        let var = |key: &str| std::env::var(key).unwrap_or_default();
        let timeout = match std::env::var("GITLAB_TIMEOUT_SECS") {
            Ok(raw) => {
                let secs: u64 = raw.trim().parse().map_err(|_| {
                    ProviderError::Client(format!("GITLAB_TIMEOUT_SECS is not a number: {raw:?}"))
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => DEFAULT_TIMEOUT,
        };

        Ok(Self {
            api_url: var("GITLAB_API_URL"),
            token: var("GITLAB_TOKEN"),
            project_id: var("GITLAB_PROJECT_ID"),
            trigger_token: var("GITLAB_TRIGGER_PIPELINE_TOKEN"),
            timeout,
        })
    }

    /// Reject missing credentials, an unparsable API URL and a zero timeout.
    pub fn validate(&self) -> Result<(), ProviderError> {
        let required = [
            ("GITLAB_API_URL", &self.api_url),
            ("GITLAB_TOKEN", &self.token),
            ("GITLAB_PROJECT_ID", &self.project_id),
            ("GITLAB_TRIGGER_PIPELINE_TOKEN", &self.trigger_token),
        ];
        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(key, _)| *key)
            .collect();
        if !missing.is_empty() {
            return Err(ProviderError::Client(format!(
                "missing configuration: {}",
                missing.join(", ")
            )));
        }

        let url = Url::parse(&self.api_url)
            .map_err(|e| ProviderError::InvalidUrl(format!("{}: {e}", self.api_url)))?;
        if url.cannot_be_a_base() {
            return Err(ProviderError::InvalidUrl(self.api_url.clone()));
        }
        if self.timeout.is_zero() {
            return Err(ProviderError::Client("timeout must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GitlabConfig {
        GitlabConfig::new("https://gitlab.example.com/api/v4", "tok", "42", "trig")
    }

    #[test]
    fn valid_config_passes() {
        assert!(valid().validate().is_ok());
        assert_eq!(valid().timeout, DEFAULT_TIMEOUT);
    }

    #[test]
    fn missing_values_are_listed() {
        let mut config = valid();
        config.token.clear();
        config.trigger_token = "  ".to_string();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("GITLAB_TOKEN"));
        assert!(err.contains("GITLAB_TRIGGER_PIPELINE_TOKEN"));
        assert!(!err.contains("GITLAB_PROJECT_ID"));
    }

    #[test]
    fn bad_url_and_zero_timeout_are_rejected() {
        let mut config = valid();
        config.api_url = "not a url".to_string();
        assert!(matches!(
            config.validate(),
            Err(ProviderError::InvalidUrl(_))
        ));

        let config = valid().with_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ProviderError::Client(_))));
    }

    #[test]
    fn debug_redacts_tokens() {
        let rendered = format!("{:?}", valid());
        assert!(rendered.contains("gitlab.example.com"));
        assert!(!rendered.contains("\"tok\""));
        assert!(!rendered.contains("trig\""));
    }
}
