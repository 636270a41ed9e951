//! Runtime orchestration
//!
//! [`RuntimeManager`] is the surface the command layer talks to. A launch
//! runs these steps synchronously and returns once the worker is scheduled:
//!
//! 1. look up the service's dependencies in its manifest
//! 2. build the execution context (artifact paths)
//! 3. load an isolated scope over `[primary] + dependencies`
//! 4. resolve and validate the entry point
//! 5. register a STARTING unit and schedule its worker
//!
//! Anything after step 5 is only visible through the registry.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;

use super::context::ExecutionContext;
use super::entry::{EntryPointConvention, EntryPointResolver};
use super::executor::{ExecutionUnit, ExecutionUnitManager, ServiceSnapshot, StopOutcome};
use super::loader::{CodeLoader, DylibLoader, SymbolScope};
use super::persistent::PersistentRegistry;
use super::registry::RuntimeRegistry;
use crate::config::RuntimeConfig;
use crate::error::{Result, RuntimeError};
use crate::manifest::{ManifestDir, ManifestSource};

pub struct RuntimeManager {
    config: RuntimeConfig,
    manifests: Arc<dyn ManifestSource>,
    loader: Arc<dyn CodeLoader>,
    resolver: EntryPointResolver,
    executor: ExecutionUnitManager,
    registry: RuntimeRegistry,
    /// Owning references to every loaded scope, by service name
    scopes: DashMap<String, Arc<dyn SymbolScope>>,
    persistent: Option<PersistentRegistry>,
}

impl std::fmt::Debug for RuntimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeManager")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .field("executor", &self.executor)
            .field("registry", &self.registry)
            .field("persistent", &self.persistent)
            .finish_non_exhaustive()
    }
}

impl RuntimeManager {
    /// Manager reading manifests from disk and loading dynamic libraries
    pub fn new(config: RuntimeConfig) -> Self {
        let persistent = match &config.registry_path {
            Some(path) => Some(PersistentRegistry::at(path)),
            None => match PersistentRegistry::open_default() {
                Ok(registry) => Some(registry),
                Err(e) => {
                    tracing::warn!(error = %e, "Persistent registry unavailable");
                    None
                }
            },
        };

        let convention = EntryPointConvention::new(&config.service_suffix, config.entry_namespace.clone());

        Self {
            manifests: Arc::new(ManifestDir::new(&config.manifest_dir)),
            loader: Arc::new(DylibLoader),
            resolver: EntryPointResolver::new(convention),
            executor: ExecutionUnitManager::new(config.stop_grace),
            registry: RuntimeRegistry::new(),
            scopes: DashMap::new(),
            persistent,
            config,
        }
    }

    /// Builder pattern: replace the manifest source
    pub fn with_manifests(mut self, manifests: Arc<dyn ManifestSource>) -> Self {
        self.manifests = manifests;
        self
    }

    /// Builder pattern: replace the code loader
    pub fn with_loader(mut self, loader: Arc<dyn CodeLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Builder pattern: replace the persistent registry
    pub fn with_persistent_registry(mut self, persistent: PersistentRegistry) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Builder pattern: do not persist launches
    pub fn without_persistent_registry(mut self) -> Self {
        self.persistent = None;
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    pub fn persistent_registry(&self) -> Option<&PersistentRegistry> {
        self.persistent.as_ref()
    }

    /// Launch a service with no configuration
    pub fn run_service(&self, name: &str) -> Result<Arc<ExecutionUnit>> {
        self.run_service_with_config(name, BTreeMap::new())
    }

    /// Launch a service, passing `config` to its entry point as `key=value` args
    ///
    /// Returns once the worker is scheduled; the unit may still be STARTING.
    /// Must be called within a Tokio runtime.
    pub fn run_service_with_config(
        &self,
        name: &str,
        config: BTreeMap<String, String>,
    ) -> Result<Arc<ExecutionUnit>> {
        validate_service_name(name)?;
        tracing::info!(service = %name, "Launching service");

        let dependencies = self.manifests.dependencies(name)?;

        let mut ctx = ExecutionContext::builder(name, &self.config.build_dir)
            .dependencies(dependencies)
            .configs(config)
            .build()?;

        tracing::debug!(
            service = %name,
            artifact = ?ctx.artifact(),
            dependencies = ctx.dependency_artifacts().len(),
            skipped = ctx.skipped_dependencies().len(),
            "Built execution context"
        );

        let scope = self.loader.load(name, &ctx.artifact_set())?;
        ctx.attach_loader(Arc::clone(&scope));

        let entry = self.resolver.resolve(&mut ctx)?;

        let unit = self.executor.launch(&ctx, entry, &self.registry)?;

        if self.scopes.insert(name.to_string(), scope).is_some() {
            tracing::debug!(service = %name, "Replaced previous scope");
        }

        if let Some(persistent) = &self.persistent {
            if let Err(e) = persistent.register(name, std::process::id()) {
                tracing::warn!(service = %name, error = %e, "Failed to persist service");
            }
        }

        tracing::info!(service = %name, "Service scheduled");
        Ok(unit)
    }

    /// Cooperatively stop a service; never fails
    pub async fn stop_service(&self, name: &str) -> StopOutcome {
        let outcome = self.executor.stop(name, &self.registry).await;
        tracing::debug!(service = %name, ?outcome, "Stop requested");
        outcome
    }

    /// Snapshots of every unit, sorted by name
    pub fn get_registry(&self) -> Vec<ServiceSnapshot> {
        self.registry.snapshot()
    }

    /// Forget a service: registry entry, owned scope and persisted record
    ///
    /// The scope is released once the service's worker has finished too.
    pub fn unregister_service(&self, name: &str) -> bool {
        let unit_removed = self.registry.unregister(name);
        let scope_removed = self.scopes.remove(name).is_some();
        let record_removed = self.forget_persisted(name);

        unit_removed || scope_removed || record_removed
    }

    /// Stop every registered service concurrently
    pub async fn shutdown(&self) {
        let names = self.registry.names();
        if names.is_empty() {
            return;
        }
        tracing::info!(count = names.len(), "Shutting down services");

        let outcomes = join_all(names.iter().map(|name| self.executor.stop(name, &self.registry))).await;

        for (name, outcome) in names.iter().zip(outcomes) {
            match outcome {
                StopOutcome::Stopped | StopOutcome::NotRunning => {
                    self.forget_persisted(name);
                }
                StopOutcome::TimedOut => {
                    tracing::warn!(service = %name, "Service still running at shutdown");
                }
                StopOutcome::NotFound => {}
            }
        }
    }

    fn forget_persisted(&self, name: &str) -> bool {
        let Some(persistent) = &self.persistent else {
            return false;
        };
        match persistent.unregister(name) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(service = %name, error = %e, "Failed to remove persisted service");
                false
            }
        }
    }
}

/// Names become path components of the artifact layout
fn validate_service_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);

    if invalid {
        return Err(RuntimeError::InvalidServiceName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::StaticManifests;
    use crate::runtime::context::artifact_path;
    use crate::runtime::executor::ServiceStatus;
    use crate::runtime::loader::StaticLoader;
    use std::time::Duration;
    use svcrun_sdk::{EntryPoint, ServiceContext};

    extern "C-unwind" fn echo_config(ctx: &ServiceContext<'_>) {
        if ctx.arg("mode") != Some("live") {
            ctx.fail("mode must be live");
        }
    }

    extern "C-unwind" fn serve(ctx: &ServiceContext<'_>) {
        ctx.set_port(8080);
        ctx.park_until_cancelled(Duration::from_millis(5));
    }

    static ECHO: EntryPoint = EntryPoint::new(echo_config);
    static SERVE: EntryPoint = EntryPoint::new(serve);

    fn touch(build_dir: &std::path::Path, name: &str) {
        let path = artifact_path(build_dir, name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"").unwrap();
    }

    fn manager(root: &std::path::Path) -> RuntimeManager {
        let config = RuntimeConfig::for_workspace(root)
            .with_registry_path(root.join("registry.json"))
            .with_stop_grace(Duration::from_secs(2));

        let loader = StaticLoader::new()
            .with("echo.EchoApp", &ECHO)
            .with("web.WebApp", &SERVE);
        let manifests = StaticManifests::new()
            .with("echo-service", Vec::<String>::new())
            .with("web-service", ["auth-lib", "missing-lib"]);

        touch(&config.build_dir, "echo-service");
        touch(&config.build_dir, "web-service");
        touch(&config.build_dir, "auth-lib");

        RuntimeManager::new(config)
            .with_loader(Arc::new(loader))
            .with_manifests(Arc::new(manifests))
    }

    async fn wait_for(unit: &ExecutionUnit, status: ServiceStatus) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while unit.status() != status {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[test]
    fn test_service_name_validation() {
        assert!(validate_service_name("payment-service").is_ok());
        for bad in ["", ".", "..", "a/b", "a\\b", "a\nb"] {
            assert!(matches!(
                validate_service_name(bad),
                Err(RuntimeError::InvalidServiceName(_))
            ));
        }
    }

    #[test]
    fn test_run_outside_runtime_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let err = manager.run_service("echo-service").unwrap_err();
        assert!(matches!(err, RuntimeError::NoAsyncRuntime { ref service, .. } if service == "echo-service"));
        assert_eq!(manager.registry().service_count(), 0);
        assert!(manager.scopes.is_empty());
        assert!(manager
            .persistent_registry()
            .unwrap()
            .get_all_services()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_config_reaches_entry_point() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let ok = manager
            .run_service_with_config("echo-service", BTreeMap::from([("mode".to_string(), "live".to_string())]))
            .unwrap();
        ok.finished().await;
        assert_eq!(ok.status(), ServiceStatus::Stopped);

        let failed = manager.run_service("echo-service").unwrap();
        failed.finished().await;
        assert_eq!(failed.status(), ServiceStatus::Failed);
        assert_eq!(failed.error().as_deref(), Some("mode must be live"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_run_and_stop_with_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let unit = manager.run_service("web-service").unwrap();
        assert_eq!(unit.dependencies(), ["auth-lib", "missing-lib"]);
        wait_for(&unit, ServiceStatus::Running).await;

        let persisted = manager.persistent_registry().unwrap().get_all_services().unwrap();
        assert_eq!(persisted["web-service"].process_id, std::process::id());

        assert_eq!(manager.stop_service("web-service").await, StopOutcome::Stopped);
        assert_eq!(unit.status(), ServiceStatus::Stopped);
        assert_eq!(unit.port(), Some(8080));

        // A second stop is a no-op
        assert_eq!(manager.stop_service("web-service").await, StopOutcome::NotRunning);
    }

    #[tokio::test]
    async fn test_launch_failures_register_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        assert!(matches!(
            manager.run_service("ghost-service"),
            Err(RuntimeError::ManifestNotFound { .. })
        ));
        assert!(matches!(
            manager.run_service("../echo-service"),
            Err(RuntimeError::InvalidServiceName(_))
        ));
        assert_eq!(manager.registry().service_count(), 0);
        assert!(manager.get_registry().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_stops_everything() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let web = manager.run_service("web-service").unwrap();
        let echo = manager
            .run_service_with_config("echo-service", BTreeMap::from([("mode".to_string(), "live".to_string())]))
            .unwrap();
        wait_for(&web, ServiceStatus::Running).await;
        echo.finished().await;

        manager.shutdown().await;

        assert_eq!(manager.registry().running_count(), 0);
        assert_eq!(web.status(), ServiceStatus::Stopped);
        assert!(manager
            .persistent_registry()
            .unwrap()
            .get_all_services()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unregister_service() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager(dir.path());

        let unit = manager
            .run_service_with_config("echo-service", BTreeMap::from([("mode".to_string(), "live".to_string())]))
            .unwrap();
        unit.finished().await;

        assert!(manager.unregister_service("echo-service"));
        assert!(!manager.registry().is_registered("echo-service"));
        assert!(unit.scope().upgrade().is_none());
        assert!(!manager.unregister_service("echo-service"));
    }
}
