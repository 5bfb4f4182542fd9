use crate::logger::{LineConsumer, SharedConsumer};
use crate::RuntimeError;
use hangar_schema::{Command, Machine, MachineSource};
use std::sync::Arc;

/// A process created inside a machine instance.
pub trait InstanceProcess: Send + Sync {
    fn pid(&self) -> u64;

    fn command(&self) -> &Command;

    /// `true` until the process has finished or was killed.
    fn is_alive(&self) -> bool;

    /// Run the command to completion, streaming output lines into `output`.
    /// Blocks the calling thread.
    fn start(&self, output: &dyn LineConsumer) -> Result<(), RuntimeError>;

    fn kill(&self) -> Result<(), RuntimeError>;
}

/// A realized machine, owned by the provider that created it.
pub trait MachineInstance: Send + Sync {
    /// Descriptor of the realized machine, status `RUNNING`.
    fn machine(&self) -> &Machine;

    fn logger(&self) -> SharedConsumer;

    /// Create a process descriptor without starting it. The pid is known immediately.
    fn create_process(&self, command: &Command) -> Result<Arc<dyn InstanceProcess>, RuntimeError>;

    fn get_processes(&self) -> Result<Vec<Arc<dyn InstanceProcess>>, RuntimeError>;

    fn get_process(&self, pid: u64) -> Result<Arc<dyn InstanceProcess>, RuntimeError> {
        self.get_processes()?
            .into_iter()
            .find(|p| p.pid() == pid)
            .ok_or_else(|| RuntimeError::ProcessNotFound {
                machine: self.machine().id.to_string(),
                pid,
            })
    }

    /// Materialize the current state into a source reference the owning
    /// provider can later create a machine from.
    fn save_to_snapshot(&self) -> Result<MachineSource, RuntimeError>;

    fn destroy(&self) -> Result<(), RuntimeError>;
}

/// Pluggable backend realizing machines of one type.
pub trait InstanceProvider: Send + Sync {
    fn machine_type(&self) -> &str;

    /// Source types this provider can build machines from.
    fn recipe_types(&self) -> Vec<String>;

    /// Realize `machine`. Slow; callers must not hold locks across this call.
    /// Fails with [`RuntimeError::SourceNotFound`] when the source image is gone.
    fn create_instance(
        &self,
        machine: &Machine,
        logger: SharedConsumer,
    ) -> Result<Arc<dyn MachineInstance>, RuntimeError>;

    fn destroy_instance(&self, instance: &dyn MachineInstance) -> Result<(), RuntimeError> {
        instance.destroy()
    }

    fn remove_instance_snapshot(&self, source: &MachineSource) -> Result<(), RuntimeError>;
}
