//! In-memory instance provider for tests and benchmarks.
//!
//! Mock processes interpret their command line: a line starting with `wait`
//! blocks until the process is killed, a line starting with `fail` returns an
//! execution error, anything else echoes `mock-exec: <line>` and finishes.

use crate::logger::{LineConsumer, SharedConsumer};
use crate::provider::{InstanceProcess, InstanceProvider, MachineInstance};
use crate::RuntimeError;
use hangar_schema::{Command, Machine, MachineId, MachineSource, MachineStatus};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

pub const MOCK_SNAPSHOT_TYPE: &str = "mock-snapshot";

type CreateHook = Arc<dyn Fn(&Machine) + Send + Sync>;

#[derive(Default)]
struct MockState {
    created: Vec<MachineId>,
    destroyed: Vec<MachineId>,
    sources_used: Vec<(String, MachineSource)>,
    removed_snapshots: Vec<MachineSource>,
    fail_create: HashSet<String>,
    missing_sources: HashSet<String>,
    fail_snapshot: bool,
    fail_remove_snapshot: bool,
    snapshot_counter: u64,
}

fn lock_state(state: &Mutex<MockState>) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
    state
        .lock()
        .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))
}

pub struct MockProvider {
    machine_type: String,
    state: Arc<Mutex<MockState>>,
    create_hook: Mutex<Option<CreateHook>>,
    next_pid: Arc<AtomicU64>,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::with_type("mock")
    }
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(machine_type: impl Into<String>) -> Self {
        Self {
            machine_type: machine_type.into(),
            state: Arc::new(Mutex::new(MockState::default())),
            create_hook: Mutex::new(None),
            next_pid: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Make creation of the machine called `name` fail.
    pub fn fail_create_of(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_create.insert(name.to_owned());
        }
    }

    /// Report sources with this location as missing on creation.
    pub fn missing_source(&self, location: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.missing_sources.insert(location.to_owned());
        }
    }

    pub fn fail_snapshots(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_snapshot = fail;
        }
    }

    pub fn fail_snapshot_removal(&self, fail: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_remove_snapshot = fail;
        }
    }

    /// Run `hook` at the start of every `create_instance` call, outside the provider's own locks.
    pub fn on_create(&self, hook: impl Fn(&Machine) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.create_hook.lock() {
            *slot = Some(Arc::new(hook));
        }
    }

    pub fn created(&self) -> Vec<MachineId> {
        self.state.lock().map(|s| s.created.clone()).unwrap_or_default()
    }

    pub fn destroyed(&self) -> Vec<MachineId> {
        self.state.lock().map(|s| s.destroyed.clone()).unwrap_or_default()
    }

    /// Instances created and not yet destroyed.
    pub fn live(&self) -> Vec<MachineId> {
        self.state
            .lock()
            .map(|s| {
                s.created
                    .iter()
                    .filter(|id| !s.destroyed.contains(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Machine names paired with the source each creation attempt used.
    pub fn sources_used(&self) -> Vec<(String, MachineSource)> {
        self.state.lock().map(|s| s.sources_used.clone()).unwrap_or_default()
    }

    pub fn removed_snapshots(&self) -> Vec<MachineSource> {
        self.state
            .lock()
            .map(|s| s.removed_snapshots.clone())
            .unwrap_or_default()
    }
}

impl InstanceProvider for MockProvider {
    fn machine_type(&self) -> &str {
        &self.machine_type
    }

    fn recipe_types(&self) -> Vec<String> {
        vec![
            "image".to_owned(),
            "dockerfile".to_owned(),
            MOCK_SNAPSHOT_TYPE.to_owned(),
        ]
    }

    fn create_instance(
        &self,
        machine: &Machine,
        logger: SharedConsumer,
    ) -> Result<Arc<dyn MachineInstance>, RuntimeError> {
        let hook = self
            .create_hook
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .clone();
        if let Some(hook) = hook {
            hook(machine);
        }

        {
            let mut state = lock_state(&self.state)?;
            let source = machine.config.source.clone();
            state
                .sources_used
                .push((machine.config.name.clone(), source.clone()));
            if state.fail_create.contains(&machine.config.name) {
                return Err(RuntimeError::CreateFailed(format!(
                    "mock failure creating '{}'",
                    machine.config.name
                )));
            }
            if let Some(location) = &source.location {
                if state.missing_sources.contains(location) {
                    return Err(RuntimeError::SourceNotFound(source.to_string()));
                }
            }
            state.created.push(machine.id.clone());
        }

        let _ = logger.write_line(&format!("[mock] machine {} created", machine.config.name));
        Ok(Arc::new(MockInstance {
            machine: machine.clone().with_status(MachineStatus::Running),
            logger,
            processes: Mutex::new(BTreeMap::new()),
            state: Arc::clone(&self.state),
            next_pid: Arc::clone(&self.next_pid),
        }))
    }

    fn remove_instance_snapshot(&self, source: &MachineSource) -> Result<(), RuntimeError> {
        let mut state = lock_state(&self.state)?;
        if state.fail_remove_snapshot {
            return Err(RuntimeError::SnapshotFailed(format!(
                "mock failure removing {source}"
            )));
        }
        state.removed_snapshots.push(source.clone());
        Ok(())
    }
}

pub struct MockInstance {
    machine: Machine,
    logger: SharedConsumer,
    processes: Mutex<BTreeMap<u64, Arc<MockProcess>>>,
    state: Arc<Mutex<MockState>>,
    next_pid: Arc<AtomicU64>,
}

impl MachineInstance for MockInstance {
    fn machine(&self) -> &Machine {
        &self.machine
    }

    fn logger(&self) -> SharedConsumer {
        Arc::clone(&self.logger)
    }

    fn create_process(&self, command: &Command) -> Result<Arc<dyn InstanceProcess>, RuntimeError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let process = Arc::new(MockProcess::new(pid, command.clone()));
        self.processes
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .insert(pid, Arc::clone(&process));
        Ok(process)
    }

    fn get_processes(&self) -> Result<Vec<Arc<dyn InstanceProcess>>, RuntimeError> {
        let processes = self
            .processes
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        Ok(processes
            .values()
            .map(|p| Arc::clone(p) as Arc<dyn InstanceProcess>)
            .collect())
    }

    fn save_to_snapshot(&self) -> Result<MachineSource, RuntimeError> {
        let mut state = lock_state(&self.state)?;
        if state.fail_snapshot {
            return Err(RuntimeError::SnapshotFailed(format!(
                "mock failure saving '{}'",
                self.machine.config.name
            )));
        }
        state.snapshot_counter += 1;
        Ok(MachineSource::with_location(
            MOCK_SNAPSHOT_TYPE,
            format!("mock/{}/{}", self.machine.id, state.snapshot_counter),
        ))
    }

    fn destroy(&self) -> Result<(), RuntimeError> {
        let processes: Vec<Arc<MockProcess>> = self
            .processes
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .values()
            .cloned()
            .collect();
        for process in processes {
            process.kill()?;
        }
        let mut state = lock_state(&self.state)?;
        if !state.destroyed.contains(&self.machine.id) {
            state.destroyed.push(self.machine.id.clone());
        }
        Ok(())
    }
}

pub struct MockProcess {
    pid: u64,
    command: Command,
    alive: AtomicBool,
    killed: Mutex<bool>,
    wake: Condvar,
}

impl MockProcess {
    fn new(pid: u64, command: Command) -> Self {
        Self {
            pid,
            command,
            alive: AtomicBool::new(true),
            killed: Mutex::new(false),
            wake: Condvar::new(),
        }
    }
}

impl InstanceProcess for MockProcess {
    fn pid(&self) -> u64 {
        self.pid
    }

    fn command(&self) -> &Command {
        &self.command
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn start(&self, output: &dyn LineConsumer) -> Result<(), RuntimeError> {
        let line = self.command.command_line.as_str();
        let result = if line.starts_with("fail") {
            Err(RuntimeError::ExecFailed(format!("command '{line}' failed")))
        } else if line.starts_with("wait") {
            output.write_line("waiting")?;
            let mut killed = self
                .killed
                .lock()
                .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
            while !*killed {
                killed = self
                    .wake
                    .wait(killed)
                    .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
            }
            Ok(())
        } else {
            output.write_line(&format!("mock-exec: {line}"))
        };
        self.alive.store(false, Ordering::SeqCst);
        result
    }

    fn kill(&self) -> Result<(), RuntimeError> {
        let mut killed = self
            .killed
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        *killed = true;
        self.alive.store(false, Ordering::SeqCst);
        self.wake.notify_all();
        Ok(())
    }
}
