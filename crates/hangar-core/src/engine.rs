use crate::concurrency::ShutdownFlag;
use crate::config::EngineConfig;
use crate::events::EventService;
use crate::instance::Instance;
use crate::logs::LogLayout;
use crate::order::machine_start_order;
use crate::striped::StripedLocks;
use crate::CoreError;
use hangar_runtime::{
    InstanceProviders, LineConsumer, MachineInstance, NullLineConsumer, RuntimeError,
    SharedConsumer,
};
use hangar_schema::{
    validate_machine_name, EnvironmentDescriptor, Event, Machine, MachineConfig, MachineEvent,
    MachineEventKind, MachineId, WorkspaceId,
};
use hangar_store::SnapshotStore;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvStatus {
    Starting,
    Running,
}

impl std::fmt::Display for EnvStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvStatus::Starting => write!(f, "starting"),
            EnvStatus::Running => write!(f, "running"),
        }
    }
}

/// Per-call settings of [`EnvironmentEngine::start`].
#[derive(Clone)]
pub struct StartOptions {
    /// Substitute each machine's last snapshot for its source.
    pub recover: bool,
    /// Identity recorded as the owner of every machine.
    pub owner: String,
    /// Environment output; every machine log is mirrored here.
    pub output: SharedConsumer,
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            recover: false,
            owner: "hangar".to_owned(),
            output: Arc::new(NullLineConsumer),
        }
    }
}

/// Mutable state of one workspace's environment. Its presence in the
/// registry means the environment is starting or running.
struct EnvironmentHolder {
    /// Distinguishes this start from later starts of the same workspace.
    generation: u64,
    env_name: String,
    owner: String,
    status: EnvStatus,
    start_queue: VecDeque<MachineConfig>,
    machines: Vec<Instance>,
    logger: SharedConsumer,
}

/// Registry of running environments and driver of their lifecycle.
///
/// Registry bookkeeping happens under the workspace's stripe lock; every
/// provider call (create, destroy, snapshot) runs with no lock held.
pub struct EnvironmentEngine {
    config: EngineConfig,
    logs: LogLayout,
    environments: StripedLocks<WorkspaceId, EnvironmentHolder>,
    providers: InstanceProviders,
    snapshots: Arc<dyn SnapshotStore>,
    events: Arc<dyn EventService>,
    shutdown: ShutdownFlag,
    next_generation: AtomicU64,
}

pub(crate) fn generate_machine_id() -> MachineId {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    MachineId::new(format!("machine{}", &uuid[..16]))
}

impl EnvironmentEngine {
    pub fn new(
        config: EngineConfig,
        providers: InstanceProviders,
        snapshots: Arc<dyn SnapshotStore>,
        events: Arc<dyn EventService>,
    ) -> Result<Self, CoreError> {
        config.validate()?;
        std::fs::create_dir_all(&config.logs_dir)?;
        Ok(Self {
            logs: LogLayout::new(&config.logs_dir),
            environments: StripedLocks::new(config.lock_stripes),
            providers,
            snapshots,
            events,
            shutdown: ShutdownFlag::new(),
            next_generation: AtomicU64::new(1),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn logs(&self) -> &LogLayout {
        &self.logs
    }

    pub fn providers(&self) -> &InstanceProviders {
        &self.providers
    }

    pub fn snapshot_store(&self) -> &Arc<dyn SnapshotStore> {
        &self.snapshots
    }

    pub fn shutdown_flag(&self) -> &ShutdownFlag {
        &self.shutdown
    }

    /// Start every machine of `descriptor` one at a time in start order.
    ///
    /// All-or-nothing: on failure the registry entry is removed and every
    /// machine started so far is destroyed before the error is returned.
    pub fn start(
        &self,
        workspace_id: &WorkspaceId,
        descriptor: &EnvironmentDescriptor,
        options: &StartOptions,
    ) -> Result<Vec<Instance>, CoreError> {
        self.shutdown.ensure_not_set()?;
        for machine in &descriptor.machines {
            validate_machine_name(&machine.name)?;
        }
        let start_queue = self.build_start_queue(&descriptor.machines)?;
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);

        {
            let mut environments = self.environments.write(workspace_id)?;
            self.shutdown.ensure_not_set()?;
            if environments.contains_key(workspace_id) {
                return Err(CoreError::EnvironmentAlreadyRunning(workspace_id.clone()));
            }
            environments.insert(
                workspace_id.clone(),
                EnvironmentHolder {
                    generation,
                    env_name: descriptor.name.clone(),
                    owner: options.owner.clone(),
                    status: EnvStatus::Starting,
                    start_queue,
                    machines: Vec::new(),
                    logger: Arc::clone(&options.output),
                },
            );
        }
        info!(
            "starting environment '{}' of workspace {workspace_id} ({} machines)",
            descriptor.name,
            descriptor.machines.len()
        );

        let result = self
            .drain_start_queue(workspace_id, generation, options.recover)
            .and_then(|()| self.mark_running(workspace_id, generation));
        match result {
            Ok(machines) => {
                info!("environment of workspace {workspace_id} is running");
                Ok(machines)
            }
            Err(e) => {
                error!("start of environment of workspace {workspace_id} failed: {e}");
                self.rollback_start(workspace_id, generation);
                Err(e)
            }
        }
    }

    /// Queue in start order, with zero RAM limits set to the configured default.
    fn build_start_queue(
        &self,
        machines: &[MachineConfig],
    ) -> Result<VecDeque<MachineConfig>, CoreError> {
        let normalized: Vec<MachineConfig> = machines
            .iter()
            .cloned()
            .map(|mut config| {
                if config.limits.ram_mb == 0 {
                    config.limits.ram_mb = self.config.default_memory_mb;
                }
                config
            })
            .collect();
        Ok(machine_start_order(&normalized)?.into())
    }

    fn drain_start_queue(
        &self,
        workspace_id: &WorkspaceId,
        generation: u64,
        recover: bool,
    ) -> Result<(), CoreError> {
        while let Some((config, env_name, owner, env_logger)) =
            self.queue_peek(workspace_id, generation)?
        {
            let machine = Machine::new(
                generate_machine_id(),
                workspace_id.clone(),
                env_name,
                owner,
                config,
            );
            self.register_placeholder(&machine, generation, |_| Ok(()))
                .map_err(|e| match e {
                    CoreError::EnvironmentNotRunning(ws) => CoreError::StartInterrupted(ws),
                    other => other,
                })?;
            self.emit(MachineEventKind::Creating, &machine, None);

            let instance = match self.realize(&machine, recover, env_logger.clone()) {
                Ok(instance) => instance,
                Err(e) => {
                    self.remove_slot(workspace_id, &machine.id);
                    self.report_machine_error(&machine, env_logger.as_ref(), &e);
                    return Err(e);
                }
            };

            let committed = {
                let mut environments = self.environments.write(workspace_id)?;
                self.shutdown.ensure_not_set().map(|()| {
                    environments
                        .get_mut(workspace_id)
                        .filter(|h| h.generation == generation)
                        .is_some_and(|holder| {
                            holder.start_queue.pop_front().is_some()
                                && replace_slot(&mut holder.machines, &instance)
                        })
                })
            };
            match committed {
                Ok(true) => self.emit(MachineEventKind::Running, &machine, None),
                Ok(false) => {
                    warn!(
                        "environment of workspace {workspace_id} stopped while machine '{}' was starting",
                        machine.name()
                    );
                    self.discard_instance(instance.as_ref());
                    return Err(CoreError::StartInterrupted(workspace_id.clone()));
                }
                Err(e) => {
                    self.discard_instance(instance.as_ref());
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn queue_peek(
        &self,
        workspace_id: &WorkspaceId,
        generation: u64,
    ) -> Result<Option<(MachineConfig, String, String, SharedConsumer)>, CoreError> {
        let environments = self.environments.read(workspace_id)?;
        self.shutdown.ensure_not_set()?;
        let holder = environments
            .get(workspace_id)
            .filter(|h| h.generation == generation)
            .ok_or_else(|| CoreError::StartInterrupted(workspace_id.clone()))?;
        Ok(holder.start_queue.front().map(|config| {
            (
                config.clone(),
                holder.env_name.clone(),
                holder.owner.clone(),
                Arc::clone(&holder.logger),
            )
        }))
    }

    fn mark_running(
        &self,
        workspace_id: &WorkspaceId,
        generation: u64,
    ) -> Result<Vec<Instance>, CoreError> {
        let mut environments = self.environments.write(workspace_id)?;
        self.shutdown.ensure_not_set()?;
        let holder = environments
            .get_mut(workspace_id)
            .filter(|h| h.generation == generation)
            .ok_or_else(|| CoreError::StartInterrupted(workspace_id.clone()))?;
        holder.status = EnvStatus::Running;
        Ok(holder.machines.clone())
    }

    /// Remove the holder of a failed start, if it is still ours, and destroy
    /// what it had started.
    fn rollback_start(&self, workspace_id: &WorkspaceId, generation: u64) {
        let removed = match self.environments.write(workspace_id) {
            Ok(mut environments) => {
                if environments
                    .get(workspace_id)
                    .is_some_and(|h| h.generation == generation)
                {
                    environments.remove(workspace_id)
                } else {
                    None
                }
            }
            Err(e) => {
                error!("cannot roll back start of workspace {workspace_id}: {e}");
                None
            }
        };
        if let Some(holder) = removed {
            self.destroy_all(workspace_id, holder.machines);
        }
    }

    /// Register `machine` as a placeholder in the holder of `generation`.
    /// `check` runs under the write lock before insertion.
    fn register_placeholder(
        &self,
        machine: &Machine,
        generation: u64,
        check: impl FnOnce(&EnvironmentHolder) -> Result<(), CoreError>,
    ) -> Result<(), CoreError> {
        let workspace_id = &machine.workspace_id;
        let mut environments = self.environments.write(workspace_id)?;
        self.shutdown.ensure_not_set()?;
        let holder = environments
            .get_mut(workspace_id)
            .filter(|h| h.generation == generation)
            .ok_or_else(|| CoreError::EnvironmentNotRunning(workspace_id.clone()))?;
        check(holder)?;
        holder.machines.push(Instance::placeholder(machine.clone()));
        Ok(())
    }

    /// Create the real instance. Runs without any registry lock.
    fn realize(
        &self,
        machine: &Machine,
        recover: bool,
        env_logger: SharedConsumer,
    ) -> Result<Arc<dyn MachineInstance>, CoreError> {
        let provider = self.providers.get(&machine.config.machine_type)?;
        let logger = self.logs.machine_logger(&machine.id, env_logger)?;

        if !recover {
            return Ok(provider.create_instance(machine, logger)?);
        }

        let snapshot = self.snapshots.get_snapshot(
            &machine.workspace_id,
            &machine.env_name,
            machine.name(),
        )?;
        let mut from_snapshot = machine.clone();
        from_snapshot.config.source = snapshot.source;
        match provider.create_instance(&from_snapshot, Arc::clone(&logger)) {
            Err(RuntimeError::SourceNotFound(source)) => {
                warn!(
                    "snapshot image {source} of machine '{}' is missing, starting from the original source",
                    machine.name()
                );
                let _ = logger.write_line(&format!(
                    "[WARN] Snapshot image {source} is missing. Machine will be started from the origin source."
                ));
                Ok(provider.create_instance(machine, logger)?)
            }
            other => Ok(other?),
        }
    }

    /// Start one machine inside a running environment.
    ///
    /// A failure stays scoped to this machine: its slot is removed, the
    /// instance (if any) destroyed, and ERROR emitted.
    pub fn start_machine(
        &self,
        workspace_id: &WorkspaceId,
        config: MachineConfig,
    ) -> Result<Instance, CoreError> {
        validate_machine_name(&config.name)?;
        let (generation, env_name, owner, env_logger) = {
            let environments = self.environments.read(workspace_id)?;
            let holder = environments
                .get(workspace_id)
                .filter(|h| h.status == EnvStatus::Running)
                .ok_or_else(|| CoreError::EnvironmentNotRunning(workspace_id.clone()))?;
            if holder.machines.iter().any(|m| m.name() == config.name) {
                return Err(CoreError::DuplicateMachineName {
                    workspace: workspace_id.clone(),
                    name: config.name,
                });
            }
            (
                holder.generation,
                holder.env_name.clone(),
                holder.owner.clone(),
                Arc::clone(&holder.logger),
            )
        };
        self.providers.get(&config.machine_type)?;

        let mut config = config;
        if config.limits.ram_mb == 0 {
            config.limits.ram_mb = self.config.default_memory_mb;
        }
        let machine = Machine::new(
            generate_machine_id(),
            workspace_id.clone(),
            env_name,
            owner,
            config,
        );
        self.register_placeholder(&machine, generation, |holder| {
            if holder.status != EnvStatus::Running {
                return Err(CoreError::EnvironmentNotRunning(workspace_id.clone()));
            }
            if holder.machines.iter().any(|m| m.name() == machine.name()) {
                return Err(CoreError::DuplicateMachineName {
                    workspace: workspace_id.clone(),
                    name: machine.name().to_owned(),
                });
            }
            Ok(())
        })?;
        self.emit(MachineEventKind::Creating, &machine, None);
        info!("starting machine '{}' in workspace {workspace_id}", machine.name());

        let instance = match self.realize(&machine, false, Arc::clone(&env_logger)) {
            Ok(instance) => instance,
            Err(e) => {
                self.remove_slot(workspace_id, &machine.id);
                self.report_machine_error(&machine, env_logger.as_ref(), &e);
                return Err(e);
            }
        };

        let committed = {
            let mut environments = self.environments.write(workspace_id)?;
            environments
                .get_mut(workspace_id)
                .filter(|h| h.generation == generation)
                .is_some_and(|holder| replace_slot(&mut holder.machines, &instance))
        };
        if !committed {
            warn!(
                "environment of workspace {workspace_id} stopped while machine '{}' was starting",
                machine.name()
            );
            self.discard_instance(instance.as_ref());
            let e = CoreError::EnvironmentNotRunning(workspace_id.clone());
            self.report_machine_error(&machine, env_logger.as_ref(), &e);
            return Err(e);
        }

        self.emit(MachineEventKind::Running, &machine, None);
        Ok(Instance::Live(instance))
    }

    /// Stop a starting or running environment and destroy all of its machines.
    ///
    /// Stopping a starting environment interrupts its start: the start call
    /// destroys the machine it is creating and fails.
    pub fn stop(&self, workspace_id: &WorkspaceId) -> Result<(), CoreError> {
        let holder = self
            .environments
            .write(workspace_id)?
            .remove(workspace_id)
            .ok_or_else(|| CoreError::EnvironmentNotRunning(workspace_id.clone()))?;
        info!(
            "stopping environment '{}' of workspace {workspace_id} ({})",
            holder.env_name, holder.status
        );
        self.destroy_all(workspace_id, holder.machines);
        Ok(())
    }

    /// Stop one non-dev machine of a running environment.
    ///
    /// A machine that is still being created is not ready and cannot be
    /// stopped yet.
    pub fn stop_machine(
        &self,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
    ) -> Result<(), CoreError> {
        let instance = {
            let mut environments = self.environments.write(workspace_id)?;
            let holder = environments
                .get_mut(workspace_id)
                .filter(|h| h.status == EnvStatus::Running)
                .ok_or_else(|| CoreError::EnvironmentNotRunning(workspace_id.clone()))?;
            let index = holder
                .machines
                .iter()
                .position(|m| m.id() == machine_id)
                .ok_or_else(|| CoreError::MachineNotFound {
                    workspace: workspace_id.clone(),
                    machine: machine_id.to_string(),
                })?;
            let target = &holder.machines[index];
            if target.is_dev() {
                return Err(CoreError::DevMachineStop(machine_id.clone()));
            }
            target.live()?;
            holder.machines.remove(index)
        };
        info!("stopping machine '{}' of workspace {workspace_id}", instance.name());
        self.destroy_machine(&instance)
    }

    pub fn get_machines(&self, workspace_id: &WorkspaceId) -> Result<Vec<Instance>, CoreError> {
        let environments = self.environments.read(workspace_id)?;
        environments
            .get(workspace_id)
            .map(|h| h.machines.clone())
            .ok_or_else(|| CoreError::EnvironmentNotRunning(workspace_id.clone()))
    }

    pub fn get_machine(
        &self,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
    ) -> Result<Instance, CoreError> {
        let environments = self.environments.read(workspace_id)?;
        let holder = environments
            .get(workspace_id)
            .ok_or_else(|| CoreError::EnvironmentNotRunning(workspace_id.clone()))?;
        holder
            .machines
            .iter()
            .find(|m| m.id() == machine_id)
            .cloned()
            .ok_or_else(|| CoreError::MachineNotFound {
                workspace: workspace_id.clone(),
                machine: machine_id.to_string(),
            })
    }

    /// Environment name and machine of a running environment.
    pub(crate) fn running_machine(
        &self,
        workspace_id: &WorkspaceId,
        machine_id: &MachineId,
    ) -> Result<(String, Instance), CoreError> {
        let environments = self.environments.read(workspace_id)?;
        let holder = environments
            .get(workspace_id)
            .filter(|h| h.status == EnvStatus::Running)
            .ok_or_else(|| CoreError::EnvironmentNotRunning(workspace_id.clone()))?;
        let instance = holder
            .machines
            .iter()
            .find(|m| m.id() == machine_id)
            .cloned()
            .ok_or_else(|| CoreError::MachineNotFound {
                workspace: workspace_id.clone(),
                machine: machine_id.to_string(),
            })?;
        Ok((holder.env_name.clone(), instance))
    }

    pub fn get_environment_status(&self, workspace_id: &WorkspaceId) -> Result<EnvStatus, CoreError> {
        self.environments
            .read(workspace_id)?
            .get(workspace_id)
            .map(|h| h.status)
            .ok_or_else(|| CoreError::EnvironmentNotRunning(workspace_id.clone()))
    }

    pub fn list_workspaces(&self) -> Result<Vec<WorkspaceId>, CoreError> {
        let mut workspaces = self.environments.keys()?;
        workspaces.sort();
        Ok(workspaces)
    }

    /// Refuse further registry mutations and delete accumulated machine logs.
    /// Running instances are left to their providers.
    pub fn cleanup(&self) {
        self.shutdown.trigger();
        let removed = self.logs.remove_all();
        info!("engine cleanup removed {removed} machine log directories");
    }

    fn remove_slot(&self, workspace_id: &WorkspaceId, machine_id: &MachineId) {
        match self.environments.write(workspace_id) {
            Ok(mut environments) => {
                if let Some(holder) = environments.get_mut(workspace_id) {
                    holder.machines.retain(|m| m.id() != machine_id);
                }
            }
            Err(e) => error!("cannot remove machine {machine_id} from registry: {e}"),
        }
    }

    fn report_machine_error(&self, machine: &Machine, env_logger: &dyn LineConsumer, e: &CoreError) {
        let line = format!("[ERROR] {e}");
        self.logs.append_machine_line(&machine.id, &line);
        if let Err(log_err) = env_logger.write_line(&line) {
            debug!("environment output rejected error line: {log_err}");
        }
        self.emit(MachineEventKind::Error, machine, Some(e.to_string()));
    }

    fn destroy_machine(&self, instance: &Instance) -> Result<(), CoreError> {
        let machine = instance.machine();
        self.emit(MachineEventKind::Destroying, machine, None);
        if let Instance::Live(live) = instance {
            self.providers.destroy(live.as_ref())?;
        }
        self.emit(MachineEventKind::Destroyed, machine, None);
        Ok(())
    }

    /// Destroy an instance the registry never adopted.
    fn discard_instance(&self, instance: &dyn MachineInstance) {
        let machine = instance.machine();
        self.emit(MachineEventKind::Destroying, machine, None);
        match self.providers.destroy(instance) {
            Ok(()) => self.emit(MachineEventKind::Destroyed, machine, None),
            Err(e) => error!("failed to destroy machine {}: {e}", machine.id),
        }
    }

    fn destroy_all(&self, workspace_id: &WorkspaceId, machines: Vec<Instance>) {
        for instance in machines {
            if instance.is_placeholder() {
                debug!(
                    "machine {} of workspace {workspace_id} is still being created, its starter will destroy it",
                    instance.id()
                );
                continue;
            }
            if let Err(e) = self.destroy_machine(&instance) {
                error!(
                    "could not destroy machine '{}' of workspace {workspace_id}: {e}",
                    instance.id()
                );
            }
        }
    }

    pub(crate) fn emit(&self, kind: MachineEventKind, machine: &Machine, error: Option<String>) {
        self.events.publish(Event::Machine(MachineEvent {
            kind,
            workspace_id: machine.workspace_id.clone(),
            machine_id: machine.id.clone(),
            machine_name: machine.name().to_owned(),
            dev: machine.is_dev(),
            error,
        }));
    }
}

/// Swap the placeholder with the same id for the live instance.
fn replace_slot(machines: &mut [Instance], instance: &Arc<dyn MachineInstance>) -> bool {
    let id = &instance.machine().id;
    match machines.iter_mut().find(|m| m.id() == id) {
        Some(slot) => {
            *slot = Instance::Live(Arc::clone(instance));
            true
        }
        None => false,
    }
}
