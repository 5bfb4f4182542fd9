//! Instance providers and machine runtime interfaces for Hangar.
//!
//! This crate defines the seam between the orchestration engine and whatever
//! actually runs machines: the `InstanceProvider` trait realizes a machine
//! descriptor into a `MachineInstance`, which in turn spawns `InstanceProcess`es.
//! Log output flows through `LineConsumer` sinks. Two providers ship with the
//! crate: an in-memory `mock` provider used by tests and benchmarks, and a
//! `local` provider that runs machines as host directories and `sh` processes.

pub mod local;
pub mod logger;
pub mod mock;
pub mod provider;
pub mod registry;

pub use logger::{
    ChannelLineConsumer, CompositeLineConsumer, FileLineConsumer, LineConsumer, NullLineConsumer,
    SharedConsumer,
};
pub use provider::{InstanceProcess, InstanceProvider, MachineInstance};
pub use registry::InstanceProviders;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("no instance provider registered for machine type '{0}'")]
    ProviderNotFound(String),
    #[error("machine source not found: {0}")]
    SourceNotFound(String),
    #[error("machine '{0}' is not ready yet")]
    NotReady(String),
    #[error("process {pid} not found in machine '{machine}'")]
    ProcessNotFound { machine: String, pid: u64 },
    #[error("runtime execution failed: {0}")]
    ExecFailed(String),
    #[error("instance creation failed: {0}")]
    CreateFailed(String),
    #[error("snapshot failed: {0}")]
    SnapshotFailed(String),
    #[error("operation not supported: {0}")]
    Unsupported(String),
}
