//! Execution units and their workers
//!
//! Every launch becomes an [`ExecutionUnit`] driven by one blocking worker.
//! The unit owns the lifecycle state machine:
//!
//! ```text
//! STARTING ──> RUNNING ──> STOPPED
//!                     └──> FAILED
//! ```
//!
//! STARTING is set when the unit is created, RUNNING right before the entry
//! point is invoked, and STOPPED or FAILED once it returns. Stopping is
//! cooperative: the worker's cancellation token is signalled and the manager
//! waits a bounded grace period. A worker that ignores the signal keeps
//! running; there is no forced termination.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use svcrun_sdk::entry::panic_message;
use svcrun_sdk::{Host, RawArg, ServiceContext};

use super::context::ExecutionContext;
use super::entry::ResolvedEntryPoint;
use super::loader::SymbolScope;
use super::registry::RuntimeRegistry;
use crate::config::DEFAULT_STOP_GRACE;
use crate::error::{Result, RuntimeError};

/// Lifecycle stage of an execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl ServiceStatus {
    /// Whether moving from `self` to `next` is a legal forward step
    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        matches!(
            (self, next),
            (ServiceStatus::Starting, ServiceStatus::Running)
                | (ServiceStatus::Running, ServiceStatus::Stopped)
                | (ServiceStatus::Running, ServiceStatus::Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Starting => "STARTING",
            ServiceStatus::Running => "RUNNING",
            ServiceStatus::Stopped => "STOPPED",
            ServiceStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One accepted status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub status: ServiceStatus,
    pub at: DateTime<Utc>,
}

/// Result of a transition request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    Applied,
    /// Already in the requested terminal state; nothing recorded
    Unchanged,
    Rejected { from: ServiceStatus },
}

/// Query-friendly copy of a unit's state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceSnapshot {
    pub name: String,
    pub status: ServiceStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub dependencies: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub worker_alive: bool,
}

#[derive(Debug)]
struct UnitState {
    status: ServiceStatus,
    port: Option<u16>,
    error: Option<String>,
    history: Vec<Transition>,
}

/// Handles onto a unit's worker
#[derive(Debug)]
struct WorkerHandle {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// Runtime record and managed worker of one launch attempt
pub struct ExecutionUnit {
    name: String,
    start_time: DateTime<Utc>,
    dependencies: Vec<String>,
    state: RwLock<UnitState>,
    worker: WorkerHandle,
    scope: Weak<dyn SymbolScope>,
}

impl ExecutionUnit {
    fn new(
        name: &str,
        dependencies: Vec<String>,
        scope: Weak<dyn SymbolScope>,
        worker: WorkerHandle,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            start_time: now,
            dependencies,
            state: RwLock::new(UnitState {
                status: ServiceStatus::Starting,
                port: None,
                error: None,
                history: vec![Transition {
                    status: ServiceStatus::Starting,
                    at: now,
                }],
            }),
            worker,
            scope,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn status(&self) -> ServiceStatus {
        self.read(|s| s.status)
    }

    pub fn port(&self) -> Option<u16> {
        self.read(|s| s.port)
    }

    pub fn error(&self) -> Option<String> {
        self.read(|s| s.error.clone())
    }

    /// Every accepted status, oldest first
    pub fn history(&self) -> Vec<Transition> {
        self.read(|s| s.history.clone())
    }

    /// Whether the worker has not finished yet
    pub fn is_worker_alive(&self) -> bool {
        !*self.worker.done.borrow()
    }

    /// RUNNING and backed by a live worker
    ///
    /// Status alone is not enough: the worker may have exited between a
    /// status read and this call.
    pub fn is_running(&self) -> bool {
        self.status() == ServiceStatus::Running && self.is_worker_alive()
    }

    /// Whether a stop has been requested
    pub fn is_cancelled(&self) -> bool {
        self.worker.cancel.is_cancelled()
    }

    /// Non-owning reference to the unit's symbol scope
    pub fn scope(&self) -> Weak<dyn SymbolScope> {
        self.scope.clone()
    }

    /// Wait until the worker has finished
    pub async fn finished(&self) {
        let mut done = self.worker.done.clone();
        // An error means the sender is gone, which only happens after the
        // worker is done.
        let _ = done.wait_for(|finished| *finished).await;
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let (status, port, error) = self.read(|s| (s.status, s.port, s.error.clone()));
        ServiceSnapshot {
            name: self.name.clone(),
            status,
            start_time: self.start_time,
            port,
            dependencies: self.dependencies.clone(),
            error,
            worker_alive: self.is_worker_alive(),
        }
    }

    /// Move to `next` if the state machine allows it
    pub(crate) fn transition(&self, next: ServiceStatus) -> TransitionResult {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let from = state.status;

        if from == next && next.is_terminal() {
            return TransitionResult::Unchanged;
        }

        if !from.can_transition_to(next) {
            return TransitionResult::Rejected { from };
        }

        state.status = next;
        state.history.push(Transition {
            status: next,
            at: Utc::now(),
        });
        TransitionResult::Applied
    }

    fn record_error(&self, message: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.error = Some(message.to_string());
    }

    fn set_port(&self, port: u16) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.port = Some(port);
    }

    fn read<T>(&self, f: impl FnOnce(&UnitState) -> T) -> T {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }
}

impl fmt::Debug for ExecutionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionUnit")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("start_time", &self.start_time)
            .field("dependencies", &self.dependencies)
            .field("worker_alive", &self.is_worker_alive())
            .finish()
    }
}

/// Host callbacks a running entry point talks to
struct WorkerHost {
    unit: Arc<ExecutionUnit>,
    cancel: CancellationToken,
}

impl Host for WorkerHost {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn report_error(&self, message: &str) {
        self.unit.record_error(message);
    }

    fn report_port(&self, port: u16) {
        tracing::info!(service = %self.unit.name, port, "Service reported port");
        self.unit.set_port(port);
    }
}

/// Outcome of a stop request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No unit registered under that name
    NotFound,
    /// The worker had already finished
    NotRunning,
    /// The worker finished within the grace period
    Stopped,
    /// The worker is still running after the grace period
    TimedOut,
}

/// Spawns workers and drives their lifecycle
#[derive(Debug, Clone)]
pub struct ExecutionUnitManager {
    stop_grace: Duration,
}

impl Default for ExecutionUnitManager {
    fn default() -> Self {
        Self::new(DEFAULT_STOP_GRACE)
    }
}

impl ExecutionUnitManager {
    pub fn new(stop_grace: Duration) -> Self {
        Self { stop_grace }
    }

    pub fn stop_grace(&self) -> Duration {
        self.stop_grace
    }

    /// Register a STARTING unit and schedule its worker
    ///
    /// Returns as soon as the worker is scheduled; the unit may still be
    /// STARTING when this returns. Fails without registering anything when
    /// called outside a Tokio runtime.
    pub fn launch(
        &self,
        ctx: &ExecutionContext,
        entry: ResolvedEntryPoint,
        registry: &RuntimeRegistry,
    ) -> Result<Arc<ExecutionUnit>> {
        let name = ctx.service_name().to_string();
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| RuntimeError::NoAsyncRuntime {
            service: name.clone(),
            message: e.to_string(),
        })?;
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = watch::channel(false);

        let unit = Arc::new(ExecutionUnit::new(
            &name,
            ctx.dependencies().to_vec(),
            entry.scope(),
            WorkerHandle {
                cancel: cancel.clone(),
                done: done_rx,
            },
        ));

        registry.register(&name, Arc::clone(&unit));
        tracing::info!(service = %name, symbol = %entry.symbol(), "Starting service");

        let args = ctx.args();
        let worker_unit = Arc::clone(&unit);

        runtime.spawn_blocking(move || {
            let _span = tracing::info_span!("service", service = %name).entered();
            run_worker(worker_unit, entry, args, cancel);
            done_tx.send_replace(true);
        });

        Ok(unit)
    }

    /// Cooperatively stop the unit registered under `name`
    pub async fn stop(&self, name: &str, registry: &RuntimeRegistry) -> StopOutcome {
        let Some(unit) = registry.get(name) else {
            tracing::info!(service = %name, "Service not found");
            return StopOutcome::NotFound;
        };

        if !unit.is_worker_alive() {
            tracing::info!(service = %name, status = %unit.status(), "Service not running");
            return StopOutcome::NotRunning;
        }

        tracing::info!(service = %name, "Stopping service");
        unit.worker.cancel.cancel();

        match tokio::time::timeout(self.stop_grace, unit.finished()).await {
            Ok(()) => {
                match unit.transition(ServiceStatus::Stopped) {
                    TransitionResult::Rejected { from } => {
                        tracing::info!(service = %name, status = %from, "Service stopped, keeping final status");
                    }
                    _ => tracing::info!(service = %name, "Service stopped"),
                }
                StopOutcome::Stopped
            }
            Err(_) => {
                let err = RuntimeError::StopTimeout {
                    service: name.to_string(),
                    grace: self.stop_grace,
                };
                tracing::warn!(service = %name, error = %err, "Service did not stop gracefully");
                StopOutcome::TimedOut
            }
        }
    }
}

/// Body of a worker thread
fn run_worker(unit: Arc<ExecutionUnit>, entry: ResolvedEntryPoint, args: Vec<String>, cancel: CancellationToken) {
    let name = unit.name().to_string();

    if let TransitionResult::Rejected { from } = unit.transition(ServiceStatus::Running) {
        tracing::error!(service = %name, status = %from, "Refusing to run service from unexpected state");
        return;
    }
    tracing::info!(service = %name, "Service RUNNING");

    let host = WorkerHost {
        unit: Arc::clone(&unit),
        cancel,
    };
    let raw_args: Vec<RawArg<'_>> = args.iter().map(|a| RawArg::new(a)).collect();
    let ctx = ServiceContext::new(&raw_args, &host);

    // A panic unwinding out of the entry point ends this unit only.
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| entry.invoke(&ctx))) {
        unit.record_error(&panic_message(payload.as_ref()));
    }

    // The entry point has returned; release this worker's hold on its code.
    drop(entry);

    match unit.error() {
        None => {
            unit.transition(ServiceStatus::Stopped);
            tracing::info!(service = %name, "Service completed");
        }
        Some(message) => {
            unit.transition(ServiceStatus::Failed);
            let err = RuntimeError::ExecutionFailure {
                service: name.clone(),
                message,
            };
            tracing::error!(service = %name, error = %err, "Service FAILED");
        }
    }
}
