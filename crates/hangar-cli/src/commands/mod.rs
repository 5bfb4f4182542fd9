pub mod order;
pub mod snapshots;
pub mod up;

use hangar_core::{EngineConfig, EnvironmentEngine, EventService};
use hangar_runtime::local::LocalProvider;
use hangar_runtime::mock::MockProvider;
use hangar_runtime::{InstanceProvider, InstanceProviders};
use hangar_schema::{parse_descriptor_file, EnvironmentDescriptor};
use hangar_store::{FileSnapshotStore, StoreLayout};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_DESCRIPTOR_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;

/// Global flags every command may need.
pub struct Context {
    pub store_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub logs_dir: Option<PathBuf>,
    pub json: bool,
}

impl Context {
    /// Engine settings: the config file if given, `--logs-dir` on top.
    pub fn engine_config(&self) -> Result<EngineConfig, String> {
        let mut config = match &self.config_path {
            Some(path) => EngineConfig::load(path).map_err(|e| e.to_string())?,
            None => EngineConfig::new(self.store_path.join("logs")),
        };
        if let Some(dir) = &self.logs_dir {
            config.logs_dir.clone_from(dir);
        }
        Ok(config)
    }

    pub fn snapshot_store(&self) -> Result<FileSnapshotStore, String> {
        FileSnapshotStore::new(StoreLayout::new(&self.store_path))
            .map_err(|e| format!("store error: {e}"))
    }

    /// Local machines live under `<store>/local`; `mock` machines are kept in memory.
    pub fn providers(&self) -> InstanceProviders {
        InstanceProviders::new([
            Arc::new(LocalProvider::new(self.store_path.join("local"))) as Arc<dyn InstanceProvider>,
            Arc::new(MockProvider::new()),
        ])
    }

    pub fn engine(&self, events: Arc<dyn EventService>) -> Result<Arc<EnvironmentEngine>, String> {
        let engine = EnvironmentEngine::new(
            self.engine_config()?,
            self.providers(),
            Arc::new(self.snapshot_store()?),
            events,
        )
        .map_err(|e| e.to_string())?;
        Ok(Arc::new(engine))
    }
}

pub fn load_descriptor(path: &Path) -> Result<EnvironmentDescriptor, String> {
    parse_descriptor_file(path).map_err(|e| format!("descriptor error: {e}"))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn colorize_state(state: &str) -> String {
    use console::Style;
    match state {
        "RUNNING" | "STARTED" => Style::new().green().apply_to(state).to_string(),
        "CREATING" => Style::new().yellow().apply_to(state).to_string(),
        "DESTROYING" | "DESTROYED" | "STOPPED" => Style::new().dim().apply_to(state).to_string(),
        "ERROR" => Style::new().red().bold().apply_to(state).to_string(),
        other => other.to_owned(),
    }
}
