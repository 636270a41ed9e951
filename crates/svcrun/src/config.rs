//! Runtime configuration

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default grace period granted to a service after a stop request
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Workspace the services live in
    pub workspace_root: PathBuf,

    /// Directory holding one `<service>.yaml` manifest per service
    pub manifest_dir: PathBuf,

    /// Build output root (`<build_dir>/<name>/<name>.<ext>`)
    pub build_dir: PathBuf,

    /// Persisted registry file; `None` means `<home>/.svcrun/registry.json`
    pub registry_path: Option<PathBuf>,

    /// How long `stop` waits for a worker to finish
    pub stop_grace: Duration,

    /// Suffix stripped from service names when deriving the entry symbol
    pub service_suffix: String,

    /// Optional prefix prepended to every derived entry symbol
    pub entry_namespace: Option<String>,
}

impl RuntimeConfig {
    /// Defaults for a workspace, without consulting the environment
    pub fn for_workspace(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            manifest_dir: root.join("manifests"),
            build_dir: root.join("build"),
            workspace_root: root,
            registry_path: None,
            stop_grace: DEFAULT_STOP_GRACE,
            service_suffix: "-service".to_string(),
            entry_namespace: None,
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let root = env::var("SVCRUN_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let mut config = Self::for_workspace(&root);

        if let Ok(dir) = env::var("SVCRUN_MANIFEST_DIR") {
            config.manifest_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = env::var("SVCRUN_BUILD_DIR") {
            config.build_dir = PathBuf::from(dir);
        }

        config.registry_path = env::var("SVCRUN_REGISTRY_PATH").ok().map(PathBuf::from);

        config.stop_grace = env::var("SVCRUN_STOP_GRACE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STOP_GRACE);

        if let Ok(suffix) = env::var("SVCRUN_SERVICE_SUFFIX") {
            config.service_suffix = suffix;
        }

        config.entry_namespace = env::var("SVCRUN_ENTRY_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty());

        config
    }

    /// Builder pattern: override the stop grace period
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Builder pattern: override the persisted registry location
    pub fn with_registry_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.registry_path = Some(path.into());
        self
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
