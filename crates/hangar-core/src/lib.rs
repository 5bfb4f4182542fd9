//! Workspace environment orchestration engine.
//!
//! This crate owns the in-memory registry of running environments
//! (`EnvironmentEngine`), guarded by per-workspace striped locks. It drives
//! ordered, crash-safe machine startup and shutdown through injected
//! `InstanceProvider`s, computes start order from declared dependencies
//! (`order`), supervises command execution inside machines
//! (`MachineProcessManager`), captures and removes snapshots, and reacts to
//! instance crash signals (`MachineCleaner`).

pub mod cleaner;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod events;
pub mod instance;
pub mod logs;
pub mod order;
pub mod process;
pub mod snapshot;
pub mod striped;

pub use cleaner::MachineCleaner;
pub use concurrency::{install_signal_handler, shutdown_requested, ShutdownFlag};
pub use config::EngineConfig;
pub use engine::{EnvStatus, EnvironmentEngine, StartOptions};
pub use events::{EventBus, EventService, EventSubscriber};
pub use instance::Instance;
pub use logs::LogLayout;
pub use order::{machine_start_order, resolve_start_order, OrderError, ServiceNode};
pub use process::MachineProcessManager;
pub use striped::StripedLocks;

use hangar_runtime::RuntimeError;
use hangar_schema::{MachineId, SchemaError, WorkspaceId};
use hangar_store::StoreError;
use thiserror::Error;

/// Coarse classification of every engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    InvalidArgument,
    Server,
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("start order error: {0}")]
    Order(#[from] OrderError),
    #[error("environment of workspace '{0}' is not running")]
    EnvironmentNotRunning(WorkspaceId),
    #[error("environment of workspace '{0}' is already running")]
    EnvironmentAlreadyRunning(WorkspaceId),
    #[error("machine '{machine}' not found in environment of workspace '{workspace}'")]
    MachineNotFound {
        workspace: WorkspaceId,
        machine: String,
    },
    #[error("machine with name '{name}' already exists in environment of workspace '{workspace}'")]
    DuplicateMachineName { workspace: WorkspaceId, name: String },
    #[error("stop of dev machine '{0}' is not allowed, stop the whole environment instead")]
    DevMachineStop(MachineId),
    #[error("process {pid} in machine '{machine}' finished already")]
    ProcessFinished { machine: MachineId, pid: u64 },
    #[error("log not found: {0}")]
    LogNotFound(String),
    #[error("invalid command: {0}")]
    InvalidCommand(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("start of environment of workspace '{0}' interrupted, it was stopped before all its machines started")]
    StartInterrupted(WorkspaceId),
    #[error("failed to remove snapshot: {0}")]
    SnapshotRemoval(String),
    #[error("system is shutting down")]
    ShuttingDown,
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::EnvironmentNotRunning(_)
            | CoreError::MachineNotFound { .. }
            | CoreError::LogNotFound(_)
            | CoreError::Runtime(
                RuntimeError::ProcessNotFound { .. } | RuntimeError::ProviderNotFound(_),
            )
            | CoreError::Store(StoreError::SnapshotNotFound(_)) => ErrorKind::NotFound,
            CoreError::EnvironmentAlreadyRunning(_)
            | CoreError::DuplicateMachineName { .. }
            | CoreError::DevMachineStop(_)
            | CoreError::ProcessFinished { .. }
            | CoreError::Runtime(RuntimeError::NotReady(_)) => ErrorKind::Conflict,
            CoreError::Schema(_)
            | CoreError::Order(_)
            | CoreError::InvalidCommand(_)
            | CoreError::Config(_)
            | CoreError::Store(StoreError::InvalidSnapshotId(_)) => ErrorKind::InvalidArgument,
            _ => ErrorKind::Server,
        }
    }
}
