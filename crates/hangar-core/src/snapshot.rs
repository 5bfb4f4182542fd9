//! Machine snapshots: capture through the owning provider, persistence
//! through the snapshot store, and image removal.

use crate::engine::EnvironmentEngine;
use crate::CoreError;
use hangar_schema::{MachineId, Snapshot, SnapshotId, WorkspaceId};
use tracing::{info, warn};

impl EnvironmentEngine {
    /// Capture the state of a machine of a running environment.
    ///
    /// The returned record is not persisted; see [`Self::snapshot_machine`].
    pub fn save_snapshot(
        &self,
        namespace: &str,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
    ) -> Result<Snapshot, CoreError> {
        let (env_name, instance) = self.running_machine(workspace_id, machine_id)?;
        let live = instance.live()?;
        let machine = live.machine();

        let source = match live.save_to_snapshot() {
            Ok(source) => source,
            Err(e) => {
                let line = format!("Snapshot storing failed. {e}");
                if let Err(log_err) = live.logger().write_line(&line) {
                    warn!("cannot write to log of machine {machine_id}: {log_err}");
                }
                return Err(e.into());
            }
        };

        let id = uuid::Uuid::new_v4().simple().to_string();
        info!("saved snapshot of machine '{}' of workspace {workspace_id}", machine.name());
        Ok(Snapshot {
            id: SnapshotId::new(format!("snapshot{id}")),
            workspace_id: workspace_id.clone(),
            env_name: env_name.clone(),
            machine_name: machine.name().to_owned(),
            machine_type: machine.config.machine_type.clone(),
            dev: machine.is_dev(),
            namespace: namespace.to_owned(),
            description: env_name,
            source,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
    }

    /// Capture a snapshot and persist it, dropping the images of the
    /// snapshots it replaces.
    pub fn snapshot_machine(
        &self,
        namespace: &str,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
    ) -> Result<Snapshot, CoreError> {
        let snapshot = self.save_snapshot(namespace, workspace_id, machine_id)?;
        let replaced = self.snapshot_store().save_snapshot(&snapshot)?;
        for old in replaced {
            if let Err(e) = self.remove_snapshot(&old) {
                warn!("failed to remove image of replaced snapshot {}: {e}", old.id);
            }
        }
        Ok(snapshot)
    }

    /// Remove the image behind `snapshot` through its machine type's provider.
    pub fn remove_snapshot(&self, snapshot: &Snapshot) -> Result<(), CoreError> {
        let provider = self.providers().get(&snapshot.machine_type)?;
        provider
            .remove_instance_snapshot(&snapshot.source)
            .map_err(|e| CoreError::SnapshotRemoval(format!("{}: {e}", snapshot.id)))
    }

    /// Remove both the image and the stored record of a snapshot.
    pub fn delete_snapshot(&self, id: &SnapshotId) -> Result<(), CoreError> {
        let snapshot = self.snapshot_store().get_snapshot_by_id(id)?;
        self.remove_snapshot(&snapshot)?;
        self.snapshot_store().remove_snapshot(id)?;
        Ok(())
    }
}
