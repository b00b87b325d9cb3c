//! Core Error Types
//!
//! Một enum lỗi chung cho toàn bộ core. Chỉ lỗi validate lúc `start()` được
//! trả về cho người dùng; các lỗi còn lại được log và nuốt ở background.

use thiserror::Error;

use super::ai_bridge::RemoteError;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// Bad jail path, unreadable or invalid configuration document
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network isolation requested but the isolation utility is missing
    #[error("isolation unavailable: {0}")]
    IsolationUnavailable(String),

    /// The OS refused to launch the sandboxed command
    #[error("failed to spawn process: {0}")]
    Spawn(String),

    /// Sample file not present yet, handle vanished mid-scan
    #[error("transient io error: {0}")]
    TransientIo(#[from] std::io::Error),

    /// Rate limit, server or network failure after retries
    #[error("remote service error: {0}")]
    RemoteService(String),

    /// Remote service answered with something that is not an analysis
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("persistence error: {0}")]
    Persistence(String),
}

impl CoreError {
    /// Startup validation failures are the only user-visible errors
    pub fn is_start_failure(&self) -> bool {
        matches!(
            self,
            CoreError::Configuration(_) | CoreError::IsolationUnavailable(_) | CoreError::Spawn(_)
        )
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Persistence(err.to_string())
    }
}

impl From<toml::de::Error> for CoreError {
    fn from(err: toml::de::Error) -> Self {
        CoreError::Configuration(err.to_string())
    }
}

impl From<RemoteError> for CoreError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Malformed(msg) => CoreError::MalformedResponse(msg),
            other => CoreError::RemoteService(other.to_string()),
        }
    }
}
