//! Host-local instance provider.
//!
//! A local machine is a private working directory under the provider root.
//! Its source is either a `dir` to copy from or a `script` (inline content or
//! a file location) run with `sh` inside the new directory. Processes run as
//! `sh -c` children of the current process with stderr merged into stdout.

use crate::logger::{LineConsumer, SharedConsumer};
use crate::provider::{InstanceProcess, InstanceProvider, MachineInstance};
use crate::RuntimeError;
use hangar_schema::{Command, Machine, MachineSource, MachineStatus};
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const LOCAL_MACHINE_TYPE: &str = "local";
const DIR_SOURCE: &str = "dir";
const SCRIPT_SOURCE: &str = "script";

pub struct LocalProvider {
    root: PathBuf,
    next_pid: Arc<AtomicU64>,
}

impl LocalProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            next_pid: Arc::new(AtomicU64::new(1)),
        }
    }

    fn machines_dir(&self) -> PathBuf {
        self.root.join("machines")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.root.join("snapshots")
    }

    fn populate(
        &self,
        machine: &Machine,
        dir: &Path,
        logger: &dyn LineConsumer,
    ) -> Result<(), RuntimeError> {
        let source = &machine.config.source;
        match source.source_type.as_str() {
            DIR_SOURCE => {
                let location = source.location.as_deref().ok_or_else(|| {
                    RuntimeError::Unsupported("dir sources need a location".to_owned())
                })?;
                let from = Path::new(location);
                if !from.is_dir() {
                    return Err(RuntimeError::SourceNotFound(source.to_string()));
                }
                copy_dir(from, dir)?;
                Ok(())
            }
            SCRIPT_SOURCE => {
                let script = match (&source.content, &source.location) {
                    (Some(content), _) => content.clone(),
                    (None, Some(location)) => fs::read_to_string(location).map_err(|_| {
                        RuntimeError::SourceNotFound(source.to_string())
                    })?,
                    (None, None) => String::new(),
                };
                let mut child = spawn_shell(&script, dir, &machine.config.env)?;
                let status = stream_output(&mut child, logger)?;
                if !status.success() {
                    return Err(RuntimeError::CreateFailed(format!(
                        "setup script of machine '{}' exited with {status}",
                        machine.config.name
                    )));
                }
                Ok(())
            }
            other => Err(RuntimeError::Unsupported(format!(
                "source type '{other}' is not supported by the local provider"
            ))),
        }
    }
}

impl InstanceProvider for LocalProvider {
    fn machine_type(&self) -> &str {
        LOCAL_MACHINE_TYPE
    }

    fn recipe_types(&self) -> Vec<String> {
        vec![DIR_SOURCE.to_owned(), SCRIPT_SOURCE.to_owned()]
    }

    fn create_instance(
        &self,
        machine: &Machine,
        logger: SharedConsumer,
    ) -> Result<Arc<dyn MachineInstance>, RuntimeError> {
        let dir = self.machines_dir().join(&machine.id);
        fs::create_dir_all(&dir)?;
        info!("creating local machine {} in {}", machine.id, dir.display());

        if let Err(e) = self.populate(machine, &dir, logger.as_ref()) {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                warn!("failed to remove {} after creation failure: {cleanup}", dir.display());
            }
            return Err(e);
        }

        Ok(Arc::new(LocalInstance {
            machine: machine.clone().with_status(MachineStatus::Running),
            logger,
            dir,
            snapshots_dir: self.snapshots_dir(),
            processes: Mutex::new(BTreeMap::new()),
            next_pid: Arc::clone(&self.next_pid),
        }))
    }

    fn remove_instance_snapshot(&self, source: &MachineSource) -> Result<(), RuntimeError> {
        let location = source
            .location
            .as_deref()
            .filter(|_| source.source_type == DIR_SOURCE)
            .ok_or_else(|| RuntimeError::Unsupported(format!("not a local snapshot: {source}")))?;
        let path = Path::new(location);
        if !path.starts_with(self.snapshots_dir()) {
            return Err(RuntimeError::Unsupported(format!(
                "snapshot {location} is outside {}",
                self.snapshots_dir().display()
            )));
        }
        if !path.exists() {
            return Err(RuntimeError::SourceNotFound(source.to_string()));
        }
        fs::remove_dir_all(path)?;
        debug!("removed local snapshot {location}");
        Ok(())
    }
}

pub struct LocalInstance {
    machine: Machine,
    logger: SharedConsumer,
    dir: PathBuf,
    snapshots_dir: PathBuf,
    processes: Mutex<BTreeMap<u64, Arc<LocalProcess>>>,
    next_pid: Arc<AtomicU64>,
}

impl LocalInstance {
    fn process_list(&self) -> Result<Vec<Arc<LocalProcess>>, RuntimeError> {
        Ok(self
            .processes
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .values()
            .cloned()
            .collect())
    }
}

impl MachineInstance for LocalInstance {
    fn machine(&self) -> &Machine {
        &self.machine
    }

    fn logger(&self) -> SharedConsumer {
        Arc::clone(&self.logger)
    }

    fn create_process(&self, command: &Command) -> Result<Arc<dyn InstanceProcess>, RuntimeError> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let process = Arc::new(LocalProcess {
            pid,
            command: command.clone(),
            workdir: self.dir.clone(),
            env: self.machine.config.env.clone(),
            alive: AtomicBool::new(true),
            killed: AtomicBool::new(false),
            child: Mutex::new(None),
        });
        self.processes
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .insert(pid, Arc::clone(&process));
        Ok(process)
    }

    fn get_processes(&self) -> Result<Vec<Arc<dyn InstanceProcess>>, RuntimeError> {
        Ok(self
            .process_list()?
            .into_iter()
            .map(|p| p as Arc<dyn InstanceProcess>)
            .collect())
    }

    fn save_to_snapshot(&self) -> Result<MachineSource, RuntimeError> {
        let dest = self.snapshots_dir.join(uuid::Uuid::new_v4().to_string());
        copy_dir(&self.dir, &dest).map_err(|e| {
            RuntimeError::SnapshotFailed(format!("copying {}: {e}", self.dir.display()))
        })?;
        Ok(MachineSource::with_location(
            DIR_SOURCE,
            dest.to_string_lossy().into_owned(),
        ))
    }

    fn destroy(&self) -> Result<(), RuntimeError> {
        for process in self.process_list()? {
            if process.is_alive() {
                process.kill()?;
            }
        }
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        info!("destroyed local machine {}", self.machine.id);
        Ok(())
    }
}

pub struct LocalProcess {
    pid: u64,
    command: Command,
    workdir: PathBuf,
    env: BTreeMap<String, String>,
    alive: AtomicBool,
    killed: AtomicBool,
    child: Mutex<Option<Child>>,
}

impl InstanceProcess for LocalProcess {
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
        let result = self.run(output);
        self.alive.store(false, Ordering::SeqCst);
        if let Ok(mut slot) = self.child.lock() {
            if let Some(mut child) = slot.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }
        result
    }

    fn kill(&self) -> Result<(), RuntimeError> {
        self.killed.store(true, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
        let mut slot = self
            .child
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
        if let Some(child) = slot.as_mut() {
            match child.kill() {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl LocalProcess {
    fn run(&self, output: &dyn LineConsumer) -> Result<(), RuntimeError> {
        if self.killed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut child = spawn_shell(&self.command.command_line, &self.workdir, &self.env)?;
        let stdout = child.stdout.take();
        {
            let mut slot = self
                .child
                .lock()
                .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
            if self.killed.load(Ordering::SeqCst) {
                let _ = child.kill();
            }
            *slot = Some(child);
        }
        let streamed = stdout.map_or(Ok(()), |stdout| pump_lines(stdout, output));

        let status = {
            let mut slot = self
                .child
                .lock()
                .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?;
            match slot.take() {
                Some(mut child) => child.wait()?,
                None => return streamed,
            }
        };
        streamed?;
        if status.success() || self.killed.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RuntimeError::ExecFailed(format!(
                "command '{}' exited with {status}",
                self.command.name
            )))
        }
    }
}

fn spawn_shell(
    script: &str,
    workdir: &Path,
    env: &BTreeMap<String, String>,
) -> Result<Child, RuntimeError> {
    Ok(std::process::Command::new("sh")
        .arg("-c")
        .arg(format!("exec 2>&1\n{script}"))
        .current_dir(workdir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .spawn()?)
}

fn stream_output(child: &mut Child, output: &dyn LineConsumer) -> Result<ExitStatus, RuntimeError> {
    let streamed = child
        .stdout
        .take()
        .map_or(Ok(()), |stdout| pump_lines(stdout, output));
    if streamed.is_err() {
        let _ = child.kill();
    }
    let status = child.wait()?;
    streamed.map(|()| status)
}

/// Forwards output line by line. Bytes that are not UTF-8 are replaced.
fn pump_lines(stream: impl Read, output: &dyn LineConsumer) -> Result<(), RuntimeError> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        output.write_line(&String::from_utf8_lossy(&buf))?;
    }
}

fn copy_dir(from: &Path, to: &Path) -> Result<(), std::io::Error> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), target)?;
        }
    }
    Ok(())
}
