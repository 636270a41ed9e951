//! In-memory registry of execution units
//!
//! One registry lives for the whole host process and is shared by the
//! manager and every worker. All operations are internally synchronized;
//! callers never lock anything themselves.

use std::fmt::Write as _;
use std::sync::Arc;

use dashmap::DashMap;

use super::executor::{ExecutionUnit, ServiceSnapshot, ServiceStatus};

/// Concurrent map of service name to execution unit
#[derive(Debug, Default)]
pub struct RuntimeRegistry {
    services: DashMap<String, Arc<ExecutionUnit>>,
}

impl RuntimeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a unit, replacing any previous unit of the same name
    pub fn register(&self, name: &str, unit: Arc<ExecutionUnit>) -> Option<Arc<ExecutionUnit>> {
        let previous = self.services.insert(name.to_string(), unit);
        tracing::debug!(service = %name, replaced = previous.is_some(), "Registered service");
        previous
    }

    /// Remove a unit; returns whether anything was removed
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self.services.remove(name).is_some();
        if removed {
            tracing::debug!(service = %name, "Unregistered service");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<ExecutionUnit>> {
        self.services.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// All registered units, sorted by name
    pub fn list_all(&self) -> Vec<Arc<ExecutionUnit>> {
        let mut units: Vec<_> = self
            .services
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        units.sort_by(|a, b| a.name().cmp(b.name()));
        units
    }

    /// Units that are RUNNING with a live worker
    pub fn list_running(&self) -> Vec<Arc<ExecutionUnit>> {
        self.list_all()
            .into_iter()
            .filter(|unit| unit.is_running())
            .collect()
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    pub fn running_count(&self) -> usize {
        self.list_running().len()
    }

    /// Names of all registered units, sorted
    pub fn names(&self) -> Vec<String> {
        self.list_all().iter().map(|unit| unit.name().to_string()).collect()
    }

    /// Point-in-time copies of every unit, sorted by name
    pub fn snapshot(&self) -> Vec<ServiceSnapshot> {
        self.list_all().iter().map(|unit| unit.snapshot()).collect()
    }

    /// Human-readable overview
    pub fn summary(&self) -> String {
        let snapshots = self.snapshot();
        let running = snapshots
            .iter()
            .filter(|s| s.status == ServiceStatus::Running && s.worker_alive)
            .count();

        let mut out = String::new();
        let _ = writeln!(out, "=== RUNTIME REGISTRY ===");
        let _ = writeln!(out, "Total services: {}", snapshots.len());
        let _ = writeln!(out, "Running services: {}", running);
        for s in &snapshots {
            let _ = write!(out, "  {} - {}", s.name, s.status);
            if let Some(port) = s.port {
                let _ = write!(out, " (port {})", port);
            }
            if let Some(error) = &s.error {
                let _ = write!(out, " error: {}", error);
            }
            out.push('\n');
        }
        out
    }
}
