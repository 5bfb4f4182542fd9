use crate::machine::MachineSource;
use crate::types::{SnapshotId, WorkspaceId};
use serde::{Deserialize, Serialize};

/// Point-in-time image of a machine's state.
///
/// Snapshots outlive the environment that produced them; the `source` is an
/// opaque reference understood only by the provider of `machine_type`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub workspace_id: WorkspaceId,
    pub env_name: String,
    pub machine_name: String,
    pub machine_type: String,
    pub dev: bool,
    pub namespace: String,
    #[serde(default)]
    pub description: String,
    pub source: MachineSource,
    pub created_at: String,
}
