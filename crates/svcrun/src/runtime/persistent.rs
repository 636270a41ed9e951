//! File-backed registry of launched services
//!
//! Lets a later invocation of the host see what an earlier one started.
//! Every read probes the recorded process ids and prunes dead entries.
//!
//! The file is rewritten whole on every change (read, merge, write). Writers
//! sharing one [`PersistentRegistry`] are serialized, but nothing coordinates
//! separate processes: two hosts registering at the same time can lose one
//! of the updates.

use std::collections::BTreeMap;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

/// Status written for every newly registered service
pub const STATUS_RUNNING: &str = "RUNNING";

/// One persisted launch record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub service_name: String,
    pub process_id: u32,
    pub start_time: DateTime<Utc>,
    pub status: String,
}

/// Decides whether a recorded process id still denotes a live process
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: u32) -> bool;
}

/// Probes with `kill -0 <pid>`; any failure counts as dead
#[derive(Debug, Clone, Copy, Default)]
pub struct KillProbe;

impl LivenessProbe for KillProbe {
    fn is_alive(&self, pid: u32) -> bool {
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }
}

pub struct PersistentRegistry {
    path: PathBuf,
    probe: Arc<dyn LivenessProbe>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for PersistentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentRegistry")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl PersistentRegistry {
    /// `<home>/.svcrun/registry.json`
    pub fn default_path() -> Result<PathBuf> {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".svcrun").join("registry.json"))
            .ok_or(RuntimeError::NoHomeDir)
    }

    pub fn open_default() -> Result<Self> {
        Ok(Self::at(Self::default_path()?))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            probe: Arc::new(KillProbe),
            write_lock: Mutex::new(()),
        }
    }

    /// Builder pattern: replace the liveness probe
    pub fn with_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a launch, replacing any earlier record of the same name
    pub fn register(&self, name: &str, pid: u32) -> Result<RegistryEntry> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = self.load()?;
        let entry = RegistryEntry {
            service_name: name.to_string(),
            process_id: pid,
            start_time: Utc::now(),
            status: STATUS_RUNNING.to_string(),
        };
        entries.insert(name.to_string(), entry.clone());
        self.save(&entries)?;

        tracing::debug!(service = %name, pid, path = ?self.path, "Persisted service");
        Ok(entry)
    }

    /// All entries whose process is still alive
    ///
    /// Dead entries are dropped and the pruned set is written back.
    pub fn get_all_services(&self) -> Result<BTreeMap<String, RegistryEntry>> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|name, entry| {
            let alive = self.probe.is_alive(entry.process_id);
            if !alive {
                tracing::debug!(service = %name, pid = entry.process_id, "Pruning dead service");
            }
            alive
        });

        if entries.len() != before {
            self.save(&entries)?;
        }
        Ok(entries)
    }

    /// Remove a record; returns whether one existed
    pub fn unregister(&self, name: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = self.load()?;
        let removed = entries.remove(name).is_some();
        if removed {
            self.save(&entries)?;
        }
        Ok(removed)
    }

    fn load(&self) -> Result<BTreeMap<String, RegistryEntry>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(source) => {
                return Err(RuntimeError::RegistryIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }

        serde_json::from_str(&content).map_err(|source| RuntimeError::RegistryFormat {
            path: self.path.clone(),
            source,
        })
    }

    fn save(&self, entries: &BTreeMap<String, RegistryEntry>) -> Result<()> {
        let io_err = |source| RuntimeError::RegistryIo {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(entries).map_err(|source| RuntimeError::RegistryFormat {
            path: self.path.clone(),
            source,
        })?;
        std::fs::write(&self.path, json).map_err(io_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProbe(Vec<u32>);

    impl LivenessProbe for FixedProbe {
        fn is_alive(&self, pid: u32) -> bool {
            self.0.contains(&pid)
        }
    }

    fn dead_pid() -> u32 {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_round_trip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("registry.json");
        let pid = std::process::id();

        PersistentRegistry::at(&path).register("x", pid).unwrap();

        let services = PersistentRegistry::at(&path).get_all_services().unwrap();
        let entry = &services["x"];
        assert_eq!(entry.service_name, "x");
        assert_eq!(entry.process_id, pid);
        assert_eq!(entry.status, "RUNNING");
    }

    #[test]
    fn test_dead_process_is_pruned() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let registry = PersistentRegistry::at(&path);

        registry.register("alive", std::process::id()).unwrap();
        registry.register("gone", dead_pid()).unwrap();

        let services = PersistentRegistry::at(&path).get_all_services().unwrap();
        assert!(services.contains_key("alive"));
        assert!(!services.contains_key("gone"));

        // Pruning is written back
        let raw: BTreeMap<String, RegistryEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.keys().collect::<Vec<_>>(), vec!["alive"]);
    }

    #[test]
    fn test_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        PersistentRegistry::at(&path)
            .register("payment-service", 4242)
            .unwrap();

        let value: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        let entry = &value["payment-service"];
        assert_eq!(entry["serviceName"], "payment-service");
        assert_eq!(entry["processId"], 4242);
        assert_eq!(entry["status"], "RUNNING");
        assert!(entry["startTime"].as_str().unwrap().parse::<DateTime<Utc>>().is_ok());
    }

    #[test]
    fn test_probe_substitution() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PersistentRegistry::at(dir.path().join("registry.json"))
            .with_probe(Arc::new(FixedProbe(vec![7])));

        registry.register("a", 7).unwrap();
        registry.register("b", 8).unwrap();

        let services = registry.get_all_services().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(services["a"].process_id, 7);
    }

    #[test]
    fn test_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PersistentRegistry::at(dir.path().join("registry.json"));

        registry.register("x", std::process::id()).unwrap();
        assert!(registry.unregister("x").unwrap());
        assert!(!registry.unregister("x").unwrap());
        assert!(registry.get_all_services().unwrap().is_empty());
    }

    #[test]
    fn test_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PersistentRegistry::at(dir.path().join("nope").join("registry.json"));
        assert!(registry.get_all_services().unwrap().is_empty());
        assert!(!registry.path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = PersistentRegistry::at(&path).get_all_services().unwrap_err();
        assert!(matches!(err, RuntimeError::RegistryFormat { .. }));
    }

    /// Two writers that interleave their read-modify-write cycles lose an
    /// update. Separate instances stand in for separate host processes.
    #[test]
    fn test_interleaved_writers_lose_an_update() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.json");
        let first = PersistentRegistry::at(&path);
        let second = PersistentRegistry::at(&path);

        let mut seen_by_first = first.load().unwrap();
        let mut seen_by_second = second.load().unwrap();

        let pid = std::process::id();
        let entry = |name: &str| RegistryEntry {
            service_name: name.to_string(),
            process_id: pid,
            start_time: Utc::now(),
            status: STATUS_RUNNING.to_string(),
        };

        seen_by_first.insert("a".to_string(), entry("a"));
        first.save(&seen_by_first).unwrap();
        seen_by_second.insert("b".to_string(), entry("b"));
        second.save(&seen_by_second).unwrap();

        let services = first.get_all_services().unwrap();
        assert!(services.contains_key("b"));
        assert!(!services.contains_key("a"), "last writer wins");
    }
}
