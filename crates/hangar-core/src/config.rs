use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_MEMORY_MB: u64 = 1024;
pub const DEFAULT_LOCK_STRIPES: usize = 16;

/// Engine settings, loadable from TOML.
///
/// ```toml
/// logs_dir = "/var/lib/hangar/logs"
/// default_memory_mb = 2048
/// lock_stripes = 32
/// process_workers = 8
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    pub logs_dir: PathBuf,
    /// RAM assigned to machines whose config declares zero.
    #[serde(default = "default_memory_mb")]
    pub default_memory_mb: u64,
    #[serde(default = "default_lock_stripes")]
    pub lock_stripes: usize,
    /// Threads executing machine processes. Zero picks twice the available parallelism.
    #[serde(default)]
    pub process_workers: usize,
}

fn default_memory_mb() -> u64 {
    DEFAULT_MEMORY_MB
}

fn default_lock_stripes() -> usize {
    DEFAULT_LOCK_STRIPES
}

impl EngineConfig {
    pub fn new(logs_dir: impl Into<PathBuf>) -> Self {
        Self {
            logs_dir: logs_dir.into(),
            default_memory_mb: DEFAULT_MEMORY_MB,
            lock_stripes: DEFAULT_LOCK_STRIPES,
            process_workers: 0,
        }
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.lock_stripes == 0 {
            return Err(CoreError::Config("lock_stripes must be positive".to_owned()));
        }
        if self.default_memory_mb == 0 {
            return Err(CoreError::Config(
                "default_memory_mb must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn worker_threads(&self) -> usize {
        if self.process_workers > 0 {
            return self.process_workers;
        }
        std::thread::available_parallelism().map_or(2, |n| n.get() * 2)
    }
}
