use crate::concurrency::ShutdownFlag;
use crate::engine::EnvironmentEngine;
use crate::events::EventService;
use crate::logs::LogLayout;
use crate::CoreError;
use hangar_runtime::{CompositeLineConsumer, FileLineConsumer, InstanceProcess, SharedConsumer};
use hangar_schema::{Command, Event, MachineId, ProcessEvent, ProcessEventKind, WorkspaceId};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::fs::File;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs commands inside machines of running environments.
///
/// `exec` returns as soon as the process is created; the process itself runs
/// on a worker pool with its output written to `<logs>/<machine>/<pid>`.
pub struct MachineProcessManager {
    engine: Arc<EnvironmentEngine>,
    events: Arc<dyn EventService>,
    logs: LogLayout,
    pool: ThreadPool,
    shutdown: ShutdownFlag,
}

impl MachineProcessManager {
    pub fn new(
        engine: Arc<EnvironmentEngine>,
        events: Arc<dyn EventService>,
    ) -> Result<Self, CoreError> {
        let threads = engine.config().worker_threads();
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("hangar-process-{i}"))
            .build()
            .map_err(|e| CoreError::Config(format!("cannot build process pool: {e}")))?;
        debug!("process pool started with {threads} workers");
        Ok(Self {
            logs: engine.logs().clone(),
            engine,
            events,
            pool,
            shutdown: ShutdownFlag::new(),
        })
    }

    /// Start `command` in a machine. Output goes to the process log and, when
    /// given, to `output` as well.
    pub fn exec(
        &self,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
        command: &Command,
        output: Option<SharedConsumer>,
    ) -> Result<Arc<dyn InstanceProcess>, CoreError> {
        validate_command(command)?;
        self.shutdown.ensure_not_set()?;
        self.engine.shutdown_flag().ensure_not_set()?;

        let instance = self.engine.get_machine(workspace_id, machine_id)?;
        let process = instance.create_process(command)?;
        let pid = process.pid();

        let file: SharedConsumer =
            Arc::new(FileLineConsumer::open(self.logs.process_log(machine_id, pid))?);
        let logger: SharedConsumer = match output {
            Some(listener) => Arc::new(CompositeLineConsumer::new(vec![file, listener])),
            None => file,
        };

        info!(
            "exec '{}' as process {pid} in machine {machine_id}",
            command.command_line
        );
        let task = ProcessTask {
            process: Arc::clone(&process),
            machine_id: machine_id.clone(),
            logger,
            events: Arc::clone(&self.events),
        };
        self.pool.spawn(move || task.run());
        Ok(process)
    }

    /// Processes of a machine; empty while the machine is still being created.
    pub fn get_processes(
        &self,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
    ) -> Result<Vec<Arc<dyn InstanceProcess>>, CoreError> {
        let instance = self.engine.get_machine(workspace_id, machine_id)?;
        if instance.is_placeholder() {
            return Ok(Vec::new());
        }
        Ok(instance.get_processes()?)
    }

    pub fn get_process(
        &self,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
        pid: u64,
    ) -> Result<Arc<dyn InstanceProcess>, CoreError> {
        let instance = self.engine.get_machine(workspace_id, machine_id)?;
        Ok(instance.get_process(pid)?)
    }

    pub fn stop_process(
        &self,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
        pid: u64,
    ) -> Result<(), CoreError> {
        let process = self.get_process(workspace_id, machine_id, pid)?;
        if !process.is_alive() {
            return Err(CoreError::ProcessFinished {
                machine: machine_id.clone(),
                pid,
            });
        }
        process.kill()?;
        info!("stopped process {pid} in machine {machine_id}");
        self.events.publish(Event::Process(ProcessEvent {
            kind: ProcessEventKind::Stopped,
            machine_id: machine_id.clone(),
            pid,
            error: None,
        }));
        Ok(())
    }

    pub fn get_process_log_reader(
        &self,
        machine_id: &MachineId,
        pid: u64,
    ) -> Result<File, CoreError> {
        let path = self.logs.process_log(machine_id, pid);
        File::open(&path).map_err(|_| {
            CoreError::LogNotFound(format!("process {pid} of machine {machine_id}"))
        })
    }

    pub fn get_machine_log_reader(&self, machine_id: &MachineId) -> Result<File, CoreError> {
        let path = self.logs.machine_log(machine_id);
        File::open(&path).map_err(|_| CoreError::LogNotFound(format!("machine {machine_id}")))
    }

    /// Refuse further executions. Running processes are left alone.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
        debug!("process manager no longer accepts commands");
    }
}

fn validate_command(command: &Command) -> Result<(), CoreError> {
    if command.name.trim().is_empty() {
        return Err(CoreError::InvalidCommand("command name is required".to_owned()));
    }
    if command.command_line.trim().is_empty() {
        return Err(CoreError::InvalidCommand("command line is required".to_owned()));
    }
    if command.command_type.trim().is_empty() {
        return Err(CoreError::InvalidCommand("command type is required".to_owned()));
    }
    Ok(())
}

struct ProcessTask {
    process: Arc<dyn InstanceProcess>,
    machine_id: MachineId,
    logger: SharedConsumer,
    events: Arc<dyn EventService>,
}

impl ProcessTask {
    fn run(self) {
        let pid = self.process.pid();
        self.publish(ProcessEventKind::Started, None);
        match self.process.start(self.logger.as_ref()) {
            Ok(()) => self.publish(ProcessEventKind::Stopped, None),
            Err(e) => {
                warn!("process {pid} in machine {} failed: {e}", self.machine_id);
                if let Err(log_err) = self.logger.write_line(&format!("[ERROR] {e}")) {
                    debug!("cannot record failure of process {pid}: {log_err}");
                }
                self.publish(ProcessEventKind::Error, Some(e.to_string()));
            }
        }
        self.logger.close();
    }

    fn publish(&self, kind: ProcessEventKind, error: Option<String>) {
        self.events.publish(Event::Process(ProcessEvent {
            kind,
            machine_id: self.machine_id.clone(),
            pid: self.process.pid(),
            error,
        }));
    }
}
