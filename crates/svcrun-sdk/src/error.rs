//! Error types for svcrun services

use thiserror::Error;

/// Errors a service body can return
///
/// The runtime only sees the rendered message; it lands in the service's
/// `error` field and the run ends as FAILED.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Failed(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<String> for ServiceError {
    fn from(message: String) -> Self {
        ServiceError::Failed(message)
    }
}

impl From<&str> for ServiceError {
    fn from(message: &str) -> Self {
        ServiceError::Failed(message.to_string())
    }
}
