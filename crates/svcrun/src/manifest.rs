//! Manifest lookup
//!
//! The runtime only needs one thing from a service manifest: the ordered list
//! of dependency names. Parsing the full manifest format belongs to the build
//! pipeline; this module reads just enough of `<manifest_dir>/<name>.yaml`.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::{Result, RuntimeError};

/// Source of dependency lists for services
pub trait ManifestSource: Send + Sync {
    /// Ordered dependency names of `service`, or `ManifestNotFound`
    fn dependencies(&self, service: &str) -> Result<Vec<String>>;
}

/// The subset of a service manifest the runtime reads
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceManifest {
    /// Service name (defaults to the file stem)
    #[serde(default)]
    pub name: Option<String>,

    /// Declared dependencies, in declaration order
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

/// A dependency entry: either a bare name or a map with a `name` key
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DependencySpec {
    Name(String),
    Detailed {
        name: String,
        #[serde(default)]
        version: Option<String>,
    },
}

impl DependencySpec {
    pub fn name(&self) -> &str {
        match self {
            DependencySpec::Name(name) => name,
            DependencySpec::Detailed { name, .. } => name,
        }
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            DependencySpec::Name(_) => None,
            DependencySpec::Detailed { version, .. } => version.as_deref(),
        }
    }
}

impl ServiceManifest {
    /// Parse a manifest from YAML content
    pub fn parse(yaml: &str) -> std::result::Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Dependency names in declaration order
    pub fn dependency_names(&self) -> Vec<String> {
        self.dependencies.iter().map(|d| d.name().to_string()).collect()
    }
}

/// Manifests stored as `<dir>/<service>.yaml`
#[derive(Debug, Clone)]
pub struct ManifestDir {
    dir: PathBuf,
}

impl ManifestDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path of the manifest for `service`
    pub fn manifest_path(&self, service: &str) -> PathBuf {
        self.dir.join(format!("{service}.yaml"))
    }
}

impl ManifestSource for ManifestDir {
    fn dependencies(&self, service: &str) -> Result<Vec<String>> {
        let path = self.manifest_path(service);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RuntimeError::ManifestNotFound {
                    service: service.to_string(),
                    path,
                });
            }
            Err(e) => {
                return Err(RuntimeError::ManifestInvalid {
                    service: service.to_string(),
                    message: format!("failed to read {:?}: {}", path, e),
                });
            }
        };

        let manifest = ServiceManifest::parse(&content).map_err(|e| RuntimeError::ManifestInvalid {
            service: service.to_string(),
            message: e.to_string(),
        })?;

        Ok(manifest.dependency_names())
    }
}

/// In-memory manifests, keyed by service name
#[derive(Debug, Clone, Default)]
pub struct StaticManifests {
    services: HashMap<String, Vec<String>>,
}

impl StaticManifests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder pattern: declare a service and its dependencies
    pub fn with<I, S>(mut self, service: &str, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services.insert(
            service.to_string(),
            dependencies.into_iter().map(Into::into).collect(),
        );
        self
    }
}

impl ManifestSource for StaticManifests {
    fn dependencies(&self, service: &str) -> Result<Vec<String>> {
        self.services
            .get(service)
            .cloned()
            .ok_or_else(|| RuntimeError::ManifestNotFound {
                service: service.to_string(),
                path: PathBuf::from(format!("{service}.yaml")),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mixed_dependencies() {
        let yaml = r#"
name: payment-service
dependencies:
  - auth-lib
  - name: logging-lib
    version: "1.2"
"#;
        let manifest = ServiceManifest::parse(yaml).unwrap();
        assert_eq!(manifest.name.as_deref(), Some("payment-service"));
        assert_eq!(manifest.dependency_names(), vec!["auth-lib", "logging-lib"]);
        assert_eq!(manifest.dependencies[1].version(), Some("1.2"));
    }

    #[test]
    fn test_manifest_dir_lookup() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("payment-service.yaml"),
            "dependencies:\n  - auth-lib\n",
        )
        .unwrap();

        let manifests = ManifestDir::new(dir.path());
        assert_eq!(manifests.dependencies("payment-service").unwrap(), vec!["auth-lib"]);

        let err = manifests.dependencies("user-service").unwrap_err();
        assert!(matches!(err, RuntimeError::ManifestNotFound { .. }));
    }

    #[test]
    fn test_manifest_without_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("auth-lib.yaml"), "name: auth-lib\n").unwrap();

        let deps = ManifestDir::new(dir.path()).dependencies("auth-lib").unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.yaml"), "dependencies: {oops").unwrap();

        let err = ManifestDir::new(dir.path()).dependencies("bad").unwrap_err();
        assert!(matches!(err, RuntimeError::ManifestInvalid { .. }));
    }

    #[test]
    fn test_static_manifests() {
        let manifests = StaticManifests::new().with("user-service", ["auth-lib", "db-lib"]);
        assert_eq!(manifests.dependencies("user-service").unwrap(), vec!["auth-lib", "db-lib"]);
        assert!(manifests.dependencies("ghost-service").is_err());
    }
}
