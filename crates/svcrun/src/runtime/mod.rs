//! Runtime execution engine
//!
//! Takes a built service artifact, loads it in isolation, resolves its
//! entry point and runs it as a managed worker:
//!
//! - [`context`]: artifact paths and launch configuration
//! - [`loader`]: isolated symbol scopes over a service's artifacts
//! - [`entry`]: entry point naming convention and validation
//! - [`executor`]: execution units, their workers and lifecycle
//! - [`registry`]: in-memory registry shared by all workers
//! - [`persistent`]: file-backed registry visible across invocations
//! - [`manager`]: orchestration used by the command layer

pub mod context;
pub mod entry;
pub mod executor;
pub mod loader;
pub mod manager;
pub mod persistent;
pub mod registry;

pub use context::{artifact_extension, artifact_path, ExecutionContext, ExecutionContextBuilder};
pub use entry::{EntryPointConvention, EntryPointResolver, ResolvedEntryPoint};
pub use executor::{
    ExecutionUnit, ExecutionUnitManager, ServiceSnapshot, ServiceStatus, StopOutcome, Transition,
    TransitionResult,
};
pub use loader::{CodeLoader, DylibLoader, IsolatedLoader, StaticLoader, StaticScope, SymbolScope};
pub use manager::RuntimeManager;
pub use persistent::{KillProbe, LivenessProbe, PersistentRegistry, RegistryEntry};
pub use registry::RuntimeRegistry;
