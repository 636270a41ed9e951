//! Execution context for one launch
//!
//! The context gathers everything a launch needs before any code is loaded:
//! - the service's primary artifact
//! - the artifacts of its dependencies, in manifest order
//! - configuration key/value pairs handed to the entry point
//!
//! It is immutable once built, apart from two fields bound during resolution:
//! the entry symbol and the loaded symbol scope.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::loader::SymbolScope;
use crate::error::{Result, RuntimeError};

/// Platform file extension of built artifacts
pub fn artifact_extension() -> &'static str {
    std::env::consts::DLL_EXTENSION
}

/// Conventional artifact location: `<build_dir>/<name>/<name>.<ext>`
pub fn artifact_path(build_dir: &Path, name: &str) -> PathBuf {
    build_dir
        .join(name)
        .join(format!("{}.{}", name, artifact_extension()))
}

/// Resolved inputs of one launch request
pub struct ExecutionContext {
    service_name: String,
    artifact: PathBuf,
    dependencies: Vec<String>,
    dependency_artifacts: Vec<PathBuf>,
    skipped_dependencies: Vec<String>,
    config: BTreeMap<String, String>,
    entry_symbol: Option<String>,
    loader: Option<Arc<dyn SymbolScope>>,
}

impl ExecutionContext {
    /// Start building a context for `service` under `build_dir`
    pub fn builder(service: &str, build_dir: impl Into<PathBuf>) -> ExecutionContextBuilder {
        ExecutionContextBuilder::new(service, build_dir)
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Path of the service's own artifact
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Declared dependency names, including ones whose artifact was missing
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    /// Artifacts of dependencies that were found, in declaration order
    pub fn dependency_artifacts(&self) -> &[PathBuf] {
        &self.dependency_artifacts
    }

    /// Dependencies skipped because no artifact was built for them
    pub fn skipped_dependencies(&self) -> &[String] {
        &self.skipped_dependencies
    }

    /// Primary artifact followed by dependency artifacts
    pub fn artifact_set(&self) -> Vec<PathBuf> {
        std::iter::once(self.artifact.clone())
            .chain(self.dependency_artifacts.iter().cloned())
            .collect()
    }

    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    pub fn config_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).map(String::as_str)
    }

    /// Arguments handed to the entry point: `key=value` in key order
    pub fn args(&self) -> Vec<String> {
        self.config
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }

    /// Entry symbol, either overridden at build time or bound by the resolver
    pub fn entry_symbol(&self) -> Option<&str> {
        self.entry_symbol.as_deref()
    }

    pub fn loader(&self) -> Option<&Arc<dyn SymbolScope>> {
        self.loader.as_ref()
    }

    pub(crate) fn bind_entry_symbol(&mut self, symbol: String) {
        self.entry_symbol = Some(symbol);
    }

    pub(crate) fn attach_loader(&mut self, loader: Arc<dyn SymbolScope>) {
        self.loader = Some(loader);
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("service_name", &self.service_name)
            .field("artifact", &self.artifact)
            .field("dependency_artifacts", &self.dependency_artifacts.len())
            .field("entry_symbol", &self.entry_symbol)
            .field("loader", &self.loader.is_some())
            .finish()
    }
}

/// Builder for creating ExecutionContext instances
pub struct ExecutionContextBuilder {
    service: String,
    build_dir: PathBuf,
    dependencies: Vec<String>,
    config: BTreeMap<String, String>,
    entry_symbol: Option<String>,
}

impl ExecutionContextBuilder {
    /// Create a new builder for the given service
    pub fn new(service: &str, build_dir: impl Into<PathBuf>) -> Self {
        Self {
            service: service.to_string(),
            build_dir: build_dir.into(),
            dependencies: Vec::new(),
            config: BTreeMap::new(),
            entry_symbol: None,
        }
    }

    /// Add a dependency by name
    pub fn dependency(mut self, name: impl Into<String>) -> Self {
        self.dependencies.push(name.into());
        self
    }

    /// Add dependencies in order
    pub fn dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(names.into_iter().map(Into::into));
        self
    }

    /// Set one configuration value
    pub fn config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    /// Merge a configuration map
    pub fn configs(mut self, config: BTreeMap<String, String>) -> Self {
        self.config.extend(config);
        self
    }

    /// Override the conventional entry symbol
    pub fn entry_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.entry_symbol = Some(symbol.into());
        self
    }

    /// Build the context
    ///
    /// Fails if the service's own artifact is missing. Missing dependency
    /// artifacts are skipped with a warning: some dependencies only matter
    /// at compile time.
    pub fn build(self) -> Result<ExecutionContext> {
        let artifact = artifact_path(&self.build_dir, &self.service);

        if !artifact.is_file() {
            return Err(RuntimeError::ArtifactNotFound {
                service: self.service,
                path: artifact,
            });
        }

        let mut dependency_artifacts = Vec::with_capacity(self.dependencies.len());
        let mut skipped_dependencies = Vec::new();

        for dep in &self.dependencies {
            let path = artifact_path(&self.build_dir, dep);
            if path.is_file() {
                tracing::debug!(service = %self.service, dependency = %dep, "Found dependency artifact");
                dependency_artifacts.push(path);
            } else {
                tracing::warn!(
                    service = %self.service,
                    dependency = %dep,
                    path = ?path,
                    "Dependency artifact not found, skipping"
                );
                skipped_dependencies.push(dep.clone());
            }
        }

        Ok(ExecutionContext {
            service_name: self.service,
            artifact,
            dependencies: self.dependencies,
            dependency_artifacts,
            skipped_dependencies,
            config: self.config,
            entry_symbol: self.entry_symbol,
            loader: None,
        })
    }
}
