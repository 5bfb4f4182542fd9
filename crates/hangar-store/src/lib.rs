//! Snapshot persistence for Hangar.
//!
//! The engine consumes snapshots through the `SnapshotStore` trait. This crate
//! provides that trait and `FileSnapshotStore`, a directory-backed
//! implementation writing one checksummed JSON record per snapshot with
//! atomic rename, serialized across processes by `StoreLock`.

pub mod layout;
pub mod lock;
pub mod snapshots;

pub use layout::StoreLayout;
pub use lock::StoreLock;
pub use snapshots::{FileSnapshotStore, SnapshotStore};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("snapshot not found: {0}")]
    SnapshotNotFound(String),
    #[error("invalid snapshot id '{0}'")]
    InvalidSnapshotId(String),
    #[error("integrity check failed for snapshot '{id}': expected {expected}, got {actual}")]
    IntegrityFailure {
        id: String,
        expected: String,
        actual: String,
    },
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
}
