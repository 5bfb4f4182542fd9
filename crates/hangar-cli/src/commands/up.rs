use super::{colorize_state, json_pretty, load_descriptor, Context, EXIT_FAILURE, EXIT_SUCCESS};
use hangar_core::{
    shutdown_requested, EnvironmentEngine, EventBus, EventService, EventSubscriber, Instance,
    MachineCleaner, MachineProcessManager, StartOptions,
};
use hangar_runtime::{
    ChannelLineConsumer, LineConsumer, NullLineConsumer, RuntimeError, SharedConsumer,
};
use hangar_schema::{Command, Event, WorkspaceId};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct UpOptions {
    pub workspace: String,
    pub recover: bool,
    pub exec: Option<String>,
    pub snapshot: bool,
    pub hold: bool,
}

/// Prints machine lifecycle transitions to stderr.
struct EventPrinter;

impl EventSubscriber for EventPrinter {
    fn on_event(&self, event: &Event) {
        match event {
            Event::Machine(m) => {
                let state = format!("{:?}", m.kind).to_uppercase();
                let detail = m.error.as_deref().map(|e| format!(": {e}")).unwrap_or_default();
                eprintln!("  {} {}{detail}", m.machine_name, colorize_state(&state));
            }
            Event::InstanceState(s) => {
                eprintln!("  {} went down ({:?})", s.machine_name, s.kind);
            }
            Event::Process(_) => {}
        }
    }
}

/// Environment output mirrored to stderr.
struct ConsoleLineConsumer;

impl LineConsumer for ConsoleLineConsumer {
    fn write_line(&self, line: &str) -> Result<(), RuntimeError> {
        eprintln!("  | {line}");
        Ok(())
    }
}

#[derive(Default)]
struct SessionReport {
    exec_pid: Option<u64>,
    exec_output: Vec<String>,
    exec_failed: bool,
    snapshot_id: Option<String>,
}

pub fn run(ctx: &Context, descriptor_path: &Path, opts: &UpOptions) -> Result<u8, String> {
    let descriptor = load_descriptor(descriptor_path)?;

    let bus = Arc::new(EventBus::new());
    if !ctx.json {
        bus.subscribe(Arc::new(EventPrinter));
    }
    let engine = ctx.engine(Arc::clone(&bus) as Arc<dyn EventService>)?;
    MachineCleaner::install(&bus, &engine);

    let owner = std::env::var("USER").unwrap_or_else(|_| "hangar".to_owned());
    let output: SharedConsumer = if ctx.json {
        Arc::new(NullLineConsumer)
    } else {
        Arc::new(ConsoleLineConsumer)
    };
    let start_options = StartOptions {
        recover: opts.recover,
        owner: owner.clone(),
        output,
    };

    let ws = WorkspaceId::new(opts.workspace.as_str());
    if !ctx.json {
        eprintln!("starting environment '{}' in workspace {ws}", descriptor.name);
    }
    let machines = engine
        .start(&ws, &descriptor, &start_options)
        .map_err(|e| e.to_string())?;

    let report = session(ctx, &engine, &bus, &ws, &machines, &owner, opts);
    if let Err(e) = engine.stop(&ws) {
        warn!("failed to stop environment of workspace {ws}: {e}");
    }
    let report = report?;

    if ctx.json {
        let entries: Vec<_> = machines
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id(),
                    "name": m.name(),
                    "type": m.machine().config.machine_type,
                    "dev": m.is_dev(),
                })
            })
            .collect();
        let payload = serde_json::json!({
            "workspace": ws,
            "environment": descriptor.name,
            "machines": entries,
            "exec": report.exec_pid.map(|pid| serde_json::json!({
                "pid": pid,
                "output": report.exec_output,
                "failed": report.exec_failed,
            })),
            "snapshot": report.snapshot_id,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        if let Some(id) = &report.snapshot_id {
            println!("saved snapshot {id}");
        }
        println!("stopped environment '{}'", descriptor.name);
    }

    Ok(if report.exec_failed {
        EXIT_FAILURE
    } else {
        EXIT_SUCCESS
    })
}

fn session(
    ctx: &Context,
    engine: &Arc<EnvironmentEngine>,
    bus: &Arc<EventBus>,
    ws: &WorkspaceId,
    machines: &[Instance],
    owner: &str,
    opts: &UpOptions,
) -> Result<SessionReport, String> {
    let mut report = SessionReport::default();
    let dev = machines
        .iter()
        .find(|m| m.is_dev())
        .or_else(|| machines.first())
        .ok_or_else(|| "environment has no machines".to_owned())?;

    if let Some(line) = &opts.exec {
        let manager =
            MachineProcessManager::new(Arc::clone(engine), Arc::clone(bus) as Arc<dyn EventService>)
                .map_err(|e| e.to_string())?;
        let (tx, rx) = mpsc::channel();
        let process = manager
            .exec(
                ws,
                dev.id(),
                &Command::new("exec", line.as_str(), "custom"),
                Some(Arc::new(ChannelLineConsumer::new(tx))),
            )
            .map_err(|e| e.to_string())?;
        report.exec_pid = Some(process.pid());

        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(out) => {
                    if out.starts_with("[ERROR] ") {
                        report.exec_failed = true;
                    }
                    if !ctx.json {
                        println!("{out}");
                    }
                    report.exec_output.push(out);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if shutdown_requested() && process.is_alive() {
                        if let Err(e) = process.kill() {
                            warn!("failed to kill process {}: {e}", process.pid());
                        }
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    if opts.snapshot {
        let snapshot = engine
            .snapshot_machine(owner, ws, dev.id())
            .map_err(|e| e.to_string())?;
        report.snapshot_id = Some(snapshot.id.to_string());
    }

    if opts.hold {
        if !ctx.json {
            eprintln!("environment is up, press Ctrl-C to stop");
        }
        while !shutdown_requested() {
            std::thread::sleep(POLL_INTERVAL);
        }
    }
    Ok(report)
}
