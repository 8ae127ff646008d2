//! Error types for the model gateway.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider returned 429.
    #[error("rate limited by provider, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Permanent: the request itself is wrong.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("provider returned {status}: {message}")]
    Provider {
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("timeout after {0:?}")]
    Timeout(Duration),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                retry_after: Duration::from_secs(5),
            },
            400 | 401 | 403 | 404 | 422 => Self::InvalidRequest(format!("{status}: {message}")),
            _ => Self::Provider {
                status,
                message,
                retryable: status >= 500 || status == 408 || status == 529,
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) => true,
            Self::Provider { retryable, .. } => *retryable,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::InvalidRequest(_) | Self::MalformedResponse(_) | Self::Config(_) => false,
        }
    }
}
