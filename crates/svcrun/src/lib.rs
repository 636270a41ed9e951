//! svcrun - Runs built service artifacts as isolated, managed workers
//!
//! The engine lives in [`runtime`]; [`RuntimeManager`] is its entry point.

pub mod config;
pub mod error;
pub mod manifest;
pub mod runtime;

pub use config::RuntimeConfig;
pub use error::{Result, RuntimeError};
pub use manifest::{ManifestDir, ManifestSource, ServiceManifest, StaticManifests};
pub use runtime::{RuntimeManager, ServiceSnapshot, ServiceStatus, StopOutcome};
