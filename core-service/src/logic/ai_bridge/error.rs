//! Remote analyzer errors

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("server error: {0}")]
    Server(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unauthorized: {0}")]
    Unauthorized(u16),

    #[error("request rejected: {0}")]
    Rejected(u16),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("all credentials are cooling down or none are configured")]
    CredentialsExhausted,

    #[error("retries exhausted: {0}")]
    RetriesExhausted(String),

    #[error("remote analyzer not configured")]
    NotConfigured,
}

impl RemoteError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }

    /// Transient failures worth another attempt with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Server(_) | RemoteError::Network(_) | RemoteError::Timeout
        )
    }
}
