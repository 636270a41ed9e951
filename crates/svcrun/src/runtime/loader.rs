//! Isolated code loading
//!
//! Each launch gets its own symbol scope over the service's artifact set.
//! Lookups search, in order:
//! 1. the service's primary artifact
//! 2. each dependency artifact, in manifest order
//! 3. the host process's own base scope
//!
//! Artifacts are native dynamic libraries. The dynamic linker hands back the
//! same image when one path is opened twice, so every [`IsolatedLoader`]
//! stages private copies of its artifacts and opens those instead. Two loaders
//! over the same artifact set therefore never share static state.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use libloading::{Library, Symbol};
use tempfile::TempDir;
use uuid::Uuid;

use svcrun_sdk::EntryPoint;

use crate::error::{Result, RuntimeError};

/// A loaded, queryable symbol scope for one service
///
/// Entry point references returned by `lookup` stay valid for as long as the
/// scope itself is alive.
pub trait SymbolScope: Send + Sync + fmt::Debug {
    /// Service this scope was built for
    fn service_name(&self) -> &str;

    /// Find an entry point descriptor by symbol name, in scope order
    fn lookup(&self, symbol: &str) -> Option<&EntryPoint>;
}

/// Builds symbol scopes over artifact sets
pub trait CodeLoader: Send + Sync {
    fn load(&self, service: &str, artifacts: &[PathBuf]) -> Result<Arc<dyn SymbolScope>>;
}

/// One artifact opened from its staged copy
struct LoadedImage {
    library: Library,
    source: PathBuf,
}

/// Private code-loading scope over one service's artifacts
pub struct IsolatedLoader {
    id: Uuid,
    service: String,
    // Field order matters: libraries are unloaded before the staging
    // directory holding their files is removed.
    images: Vec<LoadedImage>,
    base: Option<Library>,
    _staging: TempDir,
}

impl IsolatedLoader {
    /// Open a scope over `artifacts` (primary first)
    pub fn open(service: &str, artifacts: &[PathBuf]) -> Result<Self> {
        let id = Uuid::new_v4();
        let first = artifacts.first().cloned().unwrap_or_default();

        let staging = tempfile::Builder::new()
            .prefix(&format!("svcrun-{}-", service))
            .tempdir()
            .map_err(|e| RuntimeError::LoaderFailed {
                service: service.to_string(),
                path: first.clone(),
                message: format!("failed to create staging directory: {}", e),
            })?;

        let mut images = Vec::with_capacity(artifacts.len());

        for (index, source) in artifacts.iter().enumerate() {
            let staged = stage_artifact(staging.path(), index, source).map_err(|e| {
                RuntimeError::LoaderFailed {
                    service: service.to_string(),
                    path: source.clone(),
                    message: format!("failed to stage artifact: {}", e),
                }
            })?;

            // Safety: loading runs the library's initializers. Artifacts are
            // produced by the workspace build and trusted like the host.
            let library = unsafe { Library::new(&staged) }.map_err(|e| RuntimeError::LoaderFailed {
                service: service.to_string(),
                path: source.clone(),
                message: e.to_string(),
            })?;

            tracing::debug!(
                service = %service,
                loader = %id,
                artifact = ?source,
                "Loaded artifact into isolated scope"
            );

            images.push(LoadedImage {
                library,
                source: source.clone(),
            });
        }

        tracing::info!(
            service = %service,
            loader = %id,
            artifacts = images.len(),
            "Created isolated loader"
        );

        Ok(Self {
            id,
            service: service.to_string(),
            images,
            base: host_scope(),
            _staging: staging,
        })
    }

    /// Unique identifier of this scope
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Directory holding this scope's private artifact copies
    pub fn staging_dir(&self) -> &Path {
        self._staging.path()
    }

    /// Original (unstaged) artifact paths, in lookup order
    pub fn artifacts(&self) -> Vec<&Path> {
        self.images.iter().map(|image| image.source.as_path()).collect()
    }
}

impl SymbolScope for IsolatedLoader {
    fn service_name(&self) -> &str {
        &self.service
    }

    fn lookup(&self, symbol: &str) -> Option<&EntryPoint> {
        self.images
            .iter()
            .map(|image| &image.library)
            .chain(self.base.iter())
            .find_map(|library| unsafe { read_entry(library, symbol) })
    }
}

impl fmt::Debug for IsolatedLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolatedLoader")
            .field("id", &self.id)
            .field("service", &self.service)
            .field("artifacts", &self.artifacts())
            .finish()
    }
}

impl Drop for IsolatedLoader {
    fn drop(&mut self) {
        tracing::debug!(service = %self.service, loader = %self.id, "Releasing isolated loader");
    }
}

/// Read an exported `EntryPoint` static out of `library`
///
/// # Safety
/// The symbol, if present, must really be an `EntryPoint`. The returned
/// reference is bounded by the library borrow.
unsafe fn read_entry<'l>(library: &'l Library, symbol: &str) -> Option<&'l EntryPoint> {
    let sym: Symbol<'l, *const EntryPoint> = library.get(symbol.as_bytes()).ok()?;
    let ptr: *const EntryPoint = *sym;
    ptr.as_ref()
}

fn stage_artifact(staging: &Path, index: usize, source: &Path) -> std::io::Result<PathBuf> {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| format!("artifact.{}", std::env::consts::DLL_EXTENSION));
    let staged = staging.join(format!("{index}-{file_name}"));
    std::fs::copy(source, &staged)?;
    Ok(staged)
}

/// Handle onto the host's own symbols, consulted after the artifacts
#[cfg(unix)]
fn host_scope() -> Option<Library> {
    Some(libloading::os::unix::Library::this().into())
}

#[cfg(windows)]
fn host_scope() -> Option<Library> {
    libloading::os::windows::Library::this().ok().map(Into::into)
}

#[cfg(not(any(unix, windows)))]
fn host_scope() -> Option<Library> {
    None
}

/// Loader producing [`IsolatedLoader`] scopes from dynamic libraries
#[derive(Debug, Clone, Copy, Default)]
pub struct DylibLoader;

impl CodeLoader for DylibLoader {
    fn load(&self, service: &str, artifacts: &[PathBuf]) -> Result<Arc<dyn SymbolScope>> {
        Ok(Arc::new(IsolatedLoader::open(service, artifacts)?))
    }
}

/// Fallback loader serving entry points compiled into the host
///
/// Used when dynamic loading is not available and for testing. The artifact
/// files still have to exist (the context builder checks them), but their
/// contents are never read.
#[derive(Default)]
pub struct StaticLoader {
    entries: DashMap<String, &'static EntryPoint>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point under a symbol name
    pub fn register(&self, symbol: impl Into<String>, entry: &'static EntryPoint) {
        self.entries.insert(symbol.into(), entry);
    }

    /// Builder pattern: register an entry point
    pub fn with(self, symbol: impl Into<String>, entry: &'static EntryPoint) -> Self {
        self.register(symbol, entry);
        self
    }
}

impl CodeLoader for StaticLoader {
    fn load(&self, service: &str, _artifacts: &[PathBuf]) -> Result<Arc<dyn SymbolScope>> {
        let entries = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        Ok(Arc::new(StaticScope {
            service: service.to_string(),
            entries,
        }))
    }
}

/// Snapshot of a [`StaticLoader`]'s table taken at load time
#[derive(Debug)]
pub struct StaticScope {
    service: String,
    entries: HashMap<String, &'static EntryPoint>,
}

impl SymbolScope for StaticScope {
    fn service_name(&self) -> &str {
        &self.service
    }

    fn lookup(&self, symbol: &str) -> Option<&EntryPoint> {
        self.entries.get(symbol).copied()
    }
}
