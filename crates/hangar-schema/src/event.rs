//! Lifecycle events published by the engine and by machine instances.

use crate::types::{MachineId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineEventKind {
    Creating,
    Running,
    Error,
    Destroying,
    Destroyed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MachineEvent {
    pub kind: MachineEventKind,
    pub workspace_id: WorkspaceId,
    pub machine_id: MachineId,
    pub machine_name: String,
    pub dev: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessEventKind {
    Started,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessEvent {
    pub kind: ProcessEventKind,
    pub machine_id: MachineId,
    pub pid: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Signals raised by a running instance itself.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStateKind {
    /// The instance was killed for exceeding its memory limit.
    Oom,
    /// The instance exited unexpectedly.
    Die,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstanceStateEvent {
    pub kind: InstanceStateKind,
    pub workspace_id: WorkspaceId,
    pub machine_id: MachineId,
    pub machine_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Machine(MachineEvent),
    Process(ProcessEvent),
    InstanceState(InstanceStateEvent),
}

impl Event {
    pub fn machine_kind(&self) -> Option<MachineEventKind> {
        match self {
            Event::Machine(e) => Some(e.kind),
            _ => None,
        }
    }

    pub fn process_kind(&self) -> Option<ProcessEventKind> {
        match self {
            Event::Process(e) => Some(e.kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_serializes_with_tag() {
        let event = Event::Process(ProcessEvent {
            kind: ProcessEventKind::Started,
            machine_id: MachineId::new("machine1"),
            pid: 3,
            error: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "process");
        assert_eq!(json["kind"], "STARTED");
        assert_eq!(event.process_kind(), Some(ProcessEventKind::Started));
        assert_eq!(event.machine_kind(), None);
    }
}
