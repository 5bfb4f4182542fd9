//! Data model for Hangar workspace environments.
//!
//! This crate defines the schema layer shared by every other crate: typed
//! identifiers, immutable machine configurations (`MachineConfig`), machine
//! descriptors and their lifecycle status, commands executed inside machines,
//! snapshot records, lifecycle events, and TOML environment descriptor loading.

pub mod command;
pub mod descriptor;
pub mod event;
pub mod machine;
pub mod snapshot;
pub mod types;

pub use command::Command;
pub use descriptor::{parse_descriptor_file, parse_descriptor_str, EnvironmentDescriptor};
pub use event::{
    Event, InstanceStateEvent, InstanceStateKind, MachineEvent, MachineEventKind, ProcessEvent,
    ProcessEventKind,
};
pub use machine::{
    validate_machine_name, Machine, MachineConfig, MachineLimits, MachineSource, MachineStatus,
    ServerConf,
};
pub use snapshot::Snapshot;
pub use types::{MachineId, SnapshotId, WorkspaceId};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("failed to read environment descriptor: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse environment descriptor: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("invalid machine name '{0}': must match [a-zA-Z0-9_-] with an optional leading '/'")]
    InvalidMachineName(String),
    #[error("invalid source of machine '{machine}': {reason}")]
    InvalidSource { machine: String, reason: String },
    #[error("machine name '{0}' is declared more than once")]
    DuplicateMachine(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_error_display_invalid_name() {
        let e = SchemaError::InvalidMachineName("bad name".to_owned());
        assert!(e.to_string().contains("bad name"));
    }

    #[test]
    fn schema_error_display_invalid_source() {
        let e = SchemaError::InvalidSource {
            machine: "db".to_owned(),
            reason: "missing location".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("db"));
        assert!(msg.contains("missing location"));
    }
}
