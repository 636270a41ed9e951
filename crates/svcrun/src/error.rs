//! Error types for the runtime engine

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors surfaced by the runtime engine
///
/// Launch failures (manifest, artifact, loader, entry point) are returned to
/// the caller synchronously. `ExecutionFailure` and `StopTimeout` are only
/// ever logged and recorded: by the time they happen the caller has already
/// regained control.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Invalid service name: {0:?}")]
    InvalidServiceName(String),

    #[error("Manifest not found for service '{service}': {path:?}")]
    ManifestNotFound { service: String, path: PathBuf },

    #[error("Invalid manifest for service '{service}': {message}")]
    ManifestInvalid { service: String, message: String },

    #[error("Service artifact not found: {path:?}\nPlease build the service first: svcrun build {service}")]
    ArtifactNotFound { service: String, path: PathBuf },

    #[error("Failed to load artifact {path:?} for service '{service}': {message}")]
    LoaderFailed {
        service: String,
        path: PathBuf,
        message: String,
    },

    #[error("Entry point '{symbol}' not found in service '{service}': {reason}")]
    EntryPointMissing {
        service: String,
        symbol: String,
        reason: String,
    },

    #[error("Entry point '{symbol}' must be public in service '{service}'")]
    EntryPointNotPublic { service: String, symbol: String },

    #[error("Entry point '{symbol}' must be callable without an instance in service '{service}'")]
    EntryPointNotStatic { service: String, symbol: String },

    #[error("Entry point '{symbol}' must not return a value in service '{service}'")]
    EntryPointWrongReturnType { service: String, symbol: String },

    #[error("Service '{service}' failed: {message}")]
    ExecutionFailure { service: String, message: String },

    #[error("Cannot launch service '{service}' outside a Tokio runtime: {message}")]
    NoAsyncRuntime { service: String, message: String },

    #[error("Service '{service}' did not stop within {grace:?}")]
    StopTimeout { service: String, grace: Duration },

    #[error("Registry I/O error at {path:?}: {source}")]
    RegistryIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Registry format error at {path:?}: {source}")]
    RegistryFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Could not determine the user's home directory")]
    NoHomeDir,
}

impl RuntimeError {
    /// Service the error relates to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            RuntimeError::InvalidServiceName(service)
            | RuntimeError::ManifestNotFound { service, .. }
            | RuntimeError::ManifestInvalid { service, .. }
            | RuntimeError::ArtifactNotFound { service, .. }
            | RuntimeError::LoaderFailed { service, .. }
            | RuntimeError::EntryPointMissing { service, .. }
            | RuntimeError::EntryPointNotPublic { service, .. }
            | RuntimeError::EntryPointNotStatic { service, .. }
            | RuntimeError::EntryPointWrongReturnType { service, .. }
            | RuntimeError::ExecutionFailure { service, .. }
            | RuntimeError::NoAsyncRuntime { service, .. }
            | RuntimeError::StopTimeout { service, .. } => Some(service),
            RuntimeError::RegistryIo { .. }
            | RuntimeError::RegistryFormat { .. }
            | RuntimeError::NoHomeDir => None,
        }
    }
}
