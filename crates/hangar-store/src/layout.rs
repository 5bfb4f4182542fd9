use crate::StoreError;
use std::fs;
use std::path::{Path, PathBuf};

/// Directory layout of a snapshot store root.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    /// Record path of a snapshot. Ids are restricted to `[A-Za-z0-9_-]`.
    pub fn snapshot_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        if id.is_empty()
            || !id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
        {
            return Err(StoreError::InvalidSnapshotId(id.to_owned()));
        }
        Ok(self.snapshots_dir().join(format!("{id}.json")))
    }

    #[inline]
    pub fn lock_file(&self) -> PathBuf {
        self.root.join("store.lock")
    }

    pub fn initialize(&self) -> Result<(), StoreError> {
        fs::create_dir_all(self.snapshots_dir())?;
        Ok(())
    }
}
