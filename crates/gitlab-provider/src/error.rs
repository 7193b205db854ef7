//! Error types for gitlab-provider

use thiserror::Error;

/// Errors returned by a CI provider call
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Request never produced a response (DNS, TLS, timeout, reset)
    #[error("Provider transport failed: {0}")]
    Transport(String),

    /// Provider answered with a non-2xx status
    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body did not match the expected shape
    #[error("Failed to decode provider response: {0}")]
    Decode(String),

    /// Job status outside the known vocabulary
    #[error("Unexpected job status from provider: {0:?}")]
    UnexpectedStatus(String),

    /// Endpoint URL could not be built
    #[error("Invalid provider URL: {0}")]
    InvalidUrl(String),

    /// Client is misconfigured or could not be constructed
    #[error("Provider client error: {0}")]
    Client(String),
}

impl ProviderError {
    /// The referenced provider resource does not exist (HTTP 404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::Status { status: 404, .. })
    }

    /// The provider refused the request itself (HTTP 400, 403 or 422), so
    /// repeating it unchanged cannot succeed.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            ProviderError::Status {
                status: 400 | 403 | 422,
                ..
            }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else if err.is_builder() {
            ProviderError::Client(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_404_is_not_found() {
        let missing = ProviderError::Status {
            status: 404,
            body: "404 Branch Not Found".to_string(),
        };
        let denied = ProviderError::Status {
            status: 403,
            body: String::new(),
        };
        assert!(missing.is_not_found());
        assert!(!denied.is_not_found());
        assert!(!ProviderError::Transport("reset".to_string()).is_not_found());
    }

    #[test]
    fn refused_requests_are_rejected() {
        let unplayable = ProviderError::Status {
            status: 400,
            body: "400 Bad request - Unplayable Job".to_string(),
        };
        let outage = ProviderError::Status {
            status: 502,
            body: String::new(),
        };
        assert!(unplayable.is_rejected());
        assert!(!outage.is_rejected());
        assert!(!ProviderError::Transport("reset".to_string()).is_rejected());
    }
}
