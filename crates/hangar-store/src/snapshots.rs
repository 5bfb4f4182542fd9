use crate::layout::StoreLayout;
use crate::lock::StoreLock;
use crate::{fsync_dir, StoreError};
use hangar_schema::{Snapshot, SnapshotId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Persistence of snapshot metadata. Images themselves belong to providers.
pub trait SnapshotStore: Send + Sync {
    /// The snapshot of one machine of one environment.
    fn get_snapshot(
        &self,
        workspace_id: &WorkspaceId,
        env_name: &str,
        machine_name: &str,
    ) -> Result<Snapshot, StoreError>;

    fn get_snapshot_by_id(&self, id: &SnapshotId) -> Result<Snapshot, StoreError>;

    /// Persist `snapshot`, replacing any snapshot of the same machine.
    /// Returns the replaced records so their images can be removed.
    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<Snapshot>, StoreError>;

    fn remove_snapshot(&self, id: &SnapshotId) -> Result<(), StoreError>;

    fn list_snapshots(&self, workspace_id: &WorkspaceId) -> Result<Vec<Snapshot>, StoreError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRecord {
    snapshot: Snapshot,
    /// blake3 over the pretty-printed snapshot.
    checksum: String,
}

impl SnapshotRecord {
    fn seal(snapshot: &Snapshot) -> Result<Self, StoreError> {
        Ok(Self {
            checksum: checksum(snapshot)?,
            snapshot: snapshot.clone(),
        })
    }

    fn verify(self, id: &str) -> Result<Snapshot, StoreError> {
        let actual = checksum(&self.snapshot)?;
        if actual != self.checksum {
            return Err(StoreError::IntegrityFailure {
                id: id.to_owned(),
                expected: self.checksum,
                actual,
            });
        }
        Ok(self.snapshot)
    }
}

fn checksum(snapshot: &Snapshot) -> Result<String, StoreError> {
    let json = serde_json::to_string_pretty(snapshot)?;
    Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
}

/// One JSON record per snapshot under `<root>/snapshots/`.
pub struct FileSnapshotStore {
    layout: StoreLayout,
}

impl FileSnapshotStore {
    pub fn new(layout: StoreLayout) -> Result<Self, StoreError> {
        layout.initialize()?;
        Ok(Self { layout })
    }

    fn write(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let record = SnapshotRecord::seal(snapshot)?;
        let content = serde_json::to_string_pretty(&record)?;

        let dir = self.layout.snapshots_dir();
        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.layout.snapshot_path(&snapshot.id)?)
            .map_err(|e| StoreError::Io(e.error))?;
        fsync_dir(&dir)?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<Snapshot>, StoreError> {
        let dir = self.layout.snapshots_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if !entry.file_type()?.is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.get_snapshot_by_id(&SnapshotId::new(id)) {
                Ok(snapshot) => results.push(snapshot),
                Err(e) => warn!("skipping unreadable snapshot record '{id}': {e}"),
            }
        }
        results.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(results)
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn get_snapshot(
        &self,
        workspace_id: &WorkspaceId,
        env_name: &str,
        machine_name: &str,
    ) -> Result<Snapshot, StoreError> {
        self.read_all()?
            .into_iter()
            .rev()
            .find(|s| {
                s.workspace_id == *workspace_id
                    && s.env_name == env_name
                    && s.machine_name == machine_name
            })
            .ok_or_else(|| {
                StoreError::SnapshotNotFound(format!("{workspace_id}/{env_name}/{machine_name}"))
            })
    }

    fn get_snapshot_by_id(&self, id: &SnapshotId) -> Result<Snapshot, StoreError> {
        let path = self.layout.snapshot_path(id)?;
        if !path.exists() {
            return Err(StoreError::SnapshotNotFound(id.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        let record: SnapshotRecord = serde_json::from_str(&content)?;
        record.verify(id)
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> Result<Vec<Snapshot>, StoreError> {
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        let replaced: Vec<Snapshot> = self
            .read_all()?
            .into_iter()
            .filter(|s| {
                s.id != snapshot.id
                    && s.workspace_id == snapshot.workspace_id
                    && s.env_name == snapshot.env_name
                    && s.machine_name == snapshot.machine_name
            })
            .collect();

        self.write(snapshot)?;
        for old in &replaced {
            fs::remove_file(self.layout.snapshot_path(&old.id)?)?;
            debug!("snapshot {} replaced by {}", old.id, snapshot.id);
        }
        Ok(replaced)
    }

    fn remove_snapshot(&self, id: &SnapshotId) -> Result<(), StoreError> {
        let _lock = StoreLock::acquire(&self.layout.lock_file())?;
        let path = self.layout.snapshot_path(id)?;
        if !path.exists() {
            return Err(StoreError::SnapshotNotFound(id.to_string()));
        }
        fs::remove_file(path)?;
        Ok(())
    }

    fn list_snapshots(&self, workspace_id: &WorkspaceId) -> Result<Vec<Snapshot>, StoreError> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|s| s.workspace_id == *workspace_id)
            .collect())
    }
}
