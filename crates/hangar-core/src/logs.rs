use hangar_runtime::{
    CompositeLineConsumer, FileLineConsumer, LineConsumer, RuntimeError, SharedConsumer,
};
use hangar_schema::MachineId;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

pub const MACHINE_LOG_FILE: &str = "machine.log";

/// Per-machine log files: `<root>/<machine_id>/machine.log` for the machine
/// and `<root>/<machine_id>/<pid>` for each process.
#[derive(Debug, Clone)]
pub struct LogLayout {
    root: PathBuf,
}

impl LogLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[inline]
    pub fn machine_dir(&self, machine_id: &MachineId) -> PathBuf {
        self.root.join(machine_id)
    }

    #[inline]
    pub fn machine_log(&self, machine_id: &MachineId) -> PathBuf {
        self.machine_dir(machine_id).join(MACHINE_LOG_FILE)
    }

    #[inline]
    pub fn process_log(&self, machine_id: &MachineId, pid: u64) -> PathBuf {
        self.machine_dir(machine_id).join(pid.to_string())
    }

    /// Machine log file fanned out together with the environment output.
    pub fn machine_logger(
        &self,
        machine_id: &MachineId,
        env_output: SharedConsumer,
    ) -> Result<SharedConsumer, RuntimeError> {
        let file = FileLineConsumer::open(self.machine_log(machine_id))?;
        Ok(Arc::new(CompositeLineConsumer::new(vec![
            Arc::new(file) as SharedConsumer,
            env_output,
        ])))
    }

    /// Append one line to a machine's log file, creating it when absent.
    pub fn append_machine_line(&self, machine_id: &MachineId, line: &str) {
        let result = FileLineConsumer::open(self.machine_log(machine_id)).and_then(|log| {
            let written = log.write_line(line);
            log.close();
            written
        });
        if let Err(e) = result {
            warn!("failed to write to log of machine {machine_id}: {e}");
        }
    }

    /// Delete every machine log directory. Returns how many entries were removed.
    pub fn remove_all(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return 0;
        };
        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("failed to remove log {}: {e}", path.display()),
            }
        }
        removed
    }
}
