use hangar_runtime::{InstanceProcess, MachineInstance, RuntimeError};
use hangar_schema::{Command, Machine, MachineId, MachineSource, MachineStatus};
use std::fmt;
use std::sync::Arc;

/// A registry slot: a placeholder while the provider realizes the machine,
/// then the live instance. Replacement swaps the variant in place.
#[derive(Clone)]
pub enum Instance {
    Placeholder(Arc<Machine>),
    Live(Arc<dyn MachineInstance>),
}

impl Instance {
    pub fn placeholder(machine: Machine) -> Self {
        Instance::Placeholder(Arc::new(machine.with_status(MachineStatus::Creating)))
    }

    pub fn machine(&self) -> &Machine {
        match self {
            Instance::Placeholder(machine) => machine,
            Instance::Live(instance) => instance.machine(),
        }
    }

    pub fn id(&self) -> &MachineId {
        &self.machine().id
    }

    pub fn name(&self) -> &str {
        self.machine().name()
    }

    pub fn is_dev(&self) -> bool {
        self.machine().is_dev()
    }

    pub fn status(&self) -> MachineStatus {
        self.machine().status
    }

    pub fn is_placeholder(&self) -> bool {
        matches!(self, Instance::Placeholder(_))
    }

    /// The live instance, or [`RuntimeError::NotReady`] for a placeholder.
    pub fn live(&self) -> Result<&Arc<dyn MachineInstance>, RuntimeError> {
        match self {
            Instance::Live(instance) => Ok(instance),
            Instance::Placeholder(machine) => Err(RuntimeError::NotReady(machine.id.to_string())),
        }
    }

    pub fn create_process(&self, command: &Command) -> Result<Arc<dyn InstanceProcess>, RuntimeError> {
        self.live()?.create_process(command)
    }

    pub fn get_processes(&self) -> Result<Vec<Arc<dyn InstanceProcess>>, RuntimeError> {
        self.live()?.get_processes()
    }

    pub fn get_process(&self, pid: u64) -> Result<Arc<dyn InstanceProcess>, RuntimeError> {
        self.live()?.get_process(pid)
    }

    pub fn save_to_snapshot(&self) -> Result<MachineSource, RuntimeError> {
        self.live()?.save_to_snapshot()
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let variant = if self.is_placeholder() {
            "Placeholder"
        } else {
            "Live"
        };
        f.debug_struct(variant)
            .field("id", self.id())
            .field("name", &self.name())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hangar_runtime::mock::MockProvider;
    use hangar_runtime::{InstanceProvider, NullLineConsumer};
    use hangar_schema::{MachineConfig, WorkspaceId};

    fn machine() -> Machine {
        Machine::new(
            MachineId::new("machine1"),
            WorkspaceId::new("ws1"),
            "default",
            "tester",
            MachineConfig::new("dev", "mock", MachineSource::with_location("image", "alpine"))
                .dev(true),
        )
    }

    #[test]
    fn placeholder_rejects_mutations() {
        let instance = Instance::placeholder(machine());
        assert!(instance.is_placeholder());
        assert_eq!(instance.status(), MachineStatus::Creating);
        assert!(instance.is_dev());
        assert!(matches!(
            instance.create_process(&Command::new("a", "b", "c")),
            Err(RuntimeError::NotReady(_))
        ));
        assert!(matches!(
            instance.save_to_snapshot(),
            Err(RuntimeError::NotReady(_))
        ));
        assert!(instance.get_processes().is_err());
    }

    #[test]
    fn live_instance_delegates() {
        let provider = MockProvider::new();
        let live = provider
            .create_instance(&machine(), Arc::new(NullLineConsumer))
            .unwrap();
        let instance = Instance::Live(live);
        assert!(!instance.is_placeholder());
        assert_eq!(instance.status(), MachineStatus::Running);
        assert_eq!(instance.id(), &MachineId::new("machine1"));

        let process = instance
            .create_process(&Command::new("a", "echo", "custom"))
            .unwrap();
        assert_eq!(instance.get_process(process.pid()).unwrap().pid(), process.pid());
        assert!(format!("{instance:?}").starts_with("Live"));
    }
}
