use hangar_core::{
    CoreError, EngineConfig, EnvStatus, EnvironmentEngine, ErrorKind, EventBus, EventService,
    EventSubscriber, MachineProcessManager, StartOptions,
};
use hangar_runtime::mock::MockProvider;
use hangar_runtime::{
    ChannelLineConsumer, InstanceProvider, InstanceProviders, RuntimeError, SharedConsumer,
};
use hangar_schema::{
    Command, EnvironmentDescriptor, Event, MachineConfig, MachineEventKind, MachineId,
    MachineSource, ProcessEventKind, WorkspaceId,
};
use hangar_store::{FileSnapshotStore, StoreLayout};
use std::path::Path;
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default)]
struct Recorder(Mutex<Vec<Event>>);

impl Recorder {
    fn machine_kinds(&self) -> Vec<MachineEventKind> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(Event::machine_kind)
            .collect()
    }

    fn process_kinds(&self) -> Vec<ProcessEventKind> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(Event::process_kind)
            .collect()
    }
}

impl EventSubscriber for Recorder {
    fn on_event(&self, event: &Event) {
        self.0.lock().unwrap().push(event.clone());
    }
}

struct Harness {
    engine: Arc<EnvironmentEngine>,
    provider: Arc<MockProvider>,
    bus: Arc<EventBus>,
    events: Arc<Recorder>,
}

fn harness(dir: &Path) -> Harness {
    let provider = Arc::new(MockProvider::new());
    let bus = Arc::new(EventBus::new());
    let events = Arc::new(Recorder::default());
    bus.subscribe(Arc::clone(&events) as Arc<dyn EventSubscriber>);
    let store = FileSnapshotStore::new(StoreLayout::new(dir.join("store"))).unwrap();
    let mut config = EngineConfig::new(dir.join("logs"));
    config.process_workers = 4;
    let engine = EnvironmentEngine::new(
        config,
        InstanceProviders::new([Arc::clone(&provider) as Arc<dyn InstanceProvider>]),
        Arc::new(store),
        Arc::clone(&bus) as Arc<dyn EventService>,
    )
    .unwrap();
    Harness {
        engine: Arc::new(engine),
        provider,
        bus,
        events,
    }
}

fn machine(name: &str) -> MachineConfig {
    MachineConfig::new(name, "mock", MachineSource::with_location("image", name))
}

fn descriptor(machines: Vec<MachineConfig>) -> EnvironmentDescriptor {
    EnvironmentDescriptor::new("default", machines)
}

fn dev_and_db() -> EnvironmentDescriptor {
    descriptor(vec![machine("db"), machine("dev").dev(true)])
}

fn start(h: &Harness, ws: &WorkspaceId, env: &EnvironmentDescriptor) -> Result<Vec<hangar_core::Instance>, CoreError> {
    h.engine.start(ws, env, &StartOptions::default())
}

#[test]
fn dev_machine_starts_first_without_relations() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");

    let machines = start(&h, &ws, &descriptor(vec![machine("a"), machine("b"), machine("dev").dev(true)]))
        .unwrap();
    let names: Vec<&str> = machines.iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["dev", "a", "b"]);

    let created: Vec<String> = h.provider.sources_used().into_iter().map(|(n, _)| n).collect();
    assert_eq!(created, vec!["dev", "a", "b"]);
}

#[test]
fn relations_drive_start_order() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    let env = descriptor(vec![
        machine("dev").dev(true).depends_on(["api"]),
        machine("api").depends_on(["db"]),
        machine("db"),
    ]);

    let machines = start(&h, &ws, &env).unwrap();
    let names: Vec<&str> = machines.iter().map(|m| m.name()).collect();
    assert_eq!(names, vec!["db", "api", "dev"]);
}

#[test]
fn dependency_cycle_fails_before_any_machine_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    let env = descriptor(vec![
        machine("dev").dev(true).depends_on(["db"]),
        machine("db").depends_on(["dev"]),
    ]);

    let err = start(&h, &ws, &env).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(h.provider.created().is_empty());
    assert!(h.engine.list_workspaces().unwrap().is_empty());
}

#[test]
fn invalid_machine_name_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let err = start(&h, &WorkspaceId::new("ws1"), &descriptor(vec![machine("bad name").dev(true)]))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn failed_start_rolls_back_everything() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    h.provider.fail_create_of("db");

    let err = start(&h, &ws, &dev_and_db()).unwrap_err();
    assert!(matches!(err, CoreError::Runtime(_)));
    assert_eq!(h.provider.created().len(), 1);
    assert!(h.provider.live().is_empty(), "dev machine must be destroyed");
    assert!(matches!(
        h.engine.get_environment_status(&ws),
        Err(CoreError::EnvironmentNotRunning(_))
    ));

    let kinds = h.events.machine_kinds();
    assert!(kinds.contains(&MachineEventKind::Error));
    assert!(kinds.contains(&MachineEventKind::Destroyed));

    // the workspace can be started again afterwards
    let retry = start(&h, &ws, &descriptor(vec![machine("dev").dev(true)])).unwrap();
    assert_eq!(retry.len(), 1);
}

#[test]
fn failed_machine_logs_error_line() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    h.provider.fail_create_of("dev");

    assert!(start(&h, &ws, &descriptor(vec![machine("dev").dev(true)])).is_err());
    let failed = h
        .events
        .0
        .lock()
        .unwrap()
        .iter()
        .find_map(|e| match e {
            Event::Machine(m) if m.kind == MachineEventKind::Error => Some(m.machine_id.clone()),
            _ => None,
        })
        .unwrap();
    let log = std::fs::read_to_string(h.engine.logs().machine_log(&failed)).unwrap();
    assert!(log.starts_with("[ERROR] "));
}

#[test]
fn second_start_of_running_workspace_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &dev_and_db()).unwrap();

    let err = start(&h, &ws, &dev_and_db()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.engine.get_machines(&ws).unwrap().len(), 2);
}

#[test]
fn concurrent_starts_of_one_workspace_admit_one() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&h.engine);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                engine.start(&WorkspaceId::new("shared"), &dev_and_db(), &StartOptions::default())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.into_iter().filter_map(Result::err) {
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }
    assert_eq!(h.provider.live().len(), 2);
}

#[test]
fn stop_of_unknown_workspace_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let err = h.engine.stop(&WorkspaceId::new("nope")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.events.0.lock().unwrap().is_empty());
}

#[test]
fn stop_destroys_every_machine() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &dev_and_db()).unwrap();

    h.engine.stop(&ws).unwrap();
    assert!(h.provider.live().is_empty());
    assert_eq!(h.provider.destroyed().len(), 2);
    assert!(h.engine.list_workspaces().unwrap().is_empty());
}

#[test]
fn stop_during_start_interrupts_it() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");

    let (reached_tx, reached_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let reached_tx = Mutex::new(reached_tx);
    let release_rx = Mutex::new(release_rx);
    h.provider.on_create(move |m| {
        if m.name() == "db" {
            reached_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        }
    });

    let starter = {
        let engine = Arc::clone(&h.engine);
        let ws = ws.clone();
        thread::spawn(move || engine.start(&ws, &dev_and_db(), &StartOptions::default()))
    };

    reached_rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(h.engine.get_environment_status(&ws).unwrap(), EnvStatus::Starting);
    h.engine.stop(&ws).unwrap();
    release_tx.send(()).unwrap();

    let err = starter.join().unwrap().unwrap_err();
    assert!(matches!(err, CoreError::StartInterrupted(_)));
    assert!(h.engine.list_workspaces().unwrap().is_empty());
    assert_eq!(h.provider.created().len(), 2);
    assert!(h.provider.live().is_empty(), "in-flight instance must be destroyed");
}

#[test]
fn workspaces_start_independently() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());

    let (reached_tx, reached_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let reached_tx = Mutex::new(reached_tx);
    let release_rx = Mutex::new(release_rx);
    h.provider.on_create(move |m| {
        if m.workspace_id == "slow" {
            reached_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        }
    });

    let slow = {
        let engine = Arc::clone(&h.engine);
        thread::spawn(move || {
            engine.start(
                &WorkspaceId::new("slow"),
                &descriptor(vec![machine("dev").dev(true)]),
                &StartOptions::default(),
            )
        })
    };
    reached_rx.recv_timeout(Duration::from_secs(10)).unwrap();

    // progresses while "slow" is parked inside its provider call
    for i in 0..8 {
        let ws = WorkspaceId::new(format!("fast{i}"));
        start(&h, &ws, &dev_and_db()).unwrap();
        h.engine.stop(&ws).unwrap();
    }

    release_tx.send(()).unwrap();
    slow.join().unwrap().unwrap();
    assert_eq!(
        h.engine.list_workspaces().unwrap(),
        vec![WorkspaceId::new("slow")]
    );
}

#[test]
fn dev_machine_cannot_be_stopped_alone() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    let machines = start(&h, &ws, &dev_and_db()).unwrap();
    let dev = machines.iter().find(|m| m.is_dev()).unwrap();

    let err = h.engine.stop_machine(&ws, dev.id()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.engine.get_machines(&ws).unwrap().len(), 2);
}

#[test]
fn non_dev_machine_can_be_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    let machines = start(&h, &ws, &dev_and_db()).unwrap();
    let db = machines.iter().find(|m| !m.is_dev()).unwrap();

    h.engine.stop_machine(&ws, db.id()).unwrap();
    assert_eq!(h.engine.get_machines(&ws).unwrap().len(), 1);
    assert_eq!(h.provider.destroyed(), vec![db.id().clone()]);

    let err = h.engine.stop_machine(&ws, db.id()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

/// Blocks creation of the machine named `name` until the returned sender fires.
fn park_creation_of(h: &Harness, name: &'static str) -> (mpsc::Receiver<()>, mpsc::Sender<()>) {
    let (reached_tx, reached_rx) = mpsc::channel::<()>();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let reached_tx = Mutex::new(reached_tx);
    let release_rx = Mutex::new(release_rx);
    h.provider.on_create(move |m| {
        if m.name() == name {
            reached_tx.lock().unwrap().send(()).unwrap();
            release_rx.lock().unwrap().recv().unwrap();
        }
    });
    (reached_rx, release_tx)
}

#[test]
fn stop_during_start_machine_discards_new_machine() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &descriptor(vec![machine("dev").dev(true)])).unwrap();
    let (reached, release) = park_creation_of(&h, "extra");

    let starter = {
        let engine = Arc::clone(&h.engine);
        let ws = ws.clone();
        thread::spawn(move || engine.start_machine(&ws, machine("extra")))
    };
    reached.recv_timeout(Duration::from_secs(10)).unwrap();
    h.engine.stop(&ws).unwrap();
    release.send(()).unwrap();

    let err = starter.join().unwrap().unwrap_err();
    assert!(matches!(err, CoreError::EnvironmentNotRunning(_)));
    assert!(h.provider.live().is_empty(), "late machine must be destroyed");
    assert!(h.engine.list_workspaces().unwrap().is_empty());
    assert!(h.engine.get_machines(&ws).is_err());
}

#[test]
fn stop_machine_refuses_machine_still_being_created() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &descriptor(vec![machine("dev").dev(true)])).unwrap();
    let (reached, release) = park_creation_of(&h, "extra");

    let starter = {
        let engine = Arc::clone(&h.engine);
        let ws = ws.clone();
        thread::spawn(move || engine.start_machine(&ws, machine("extra")))
    };
    reached.recv_timeout(Duration::from_secs(10)).unwrap();

    let pending = h
        .engine
        .get_machines(&ws)
        .unwrap()
        .into_iter()
        .find(|m| m.name() == "extra")
        .unwrap();
    assert!(pending.is_placeholder());
    let err = h.engine.stop_machine(&ws, pending.id()).unwrap_err();
    assert!(matches!(err, CoreError::Runtime(RuntimeError::NotReady(_))));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!h.events.machine_kinds().contains(&MachineEventKind::Destroying));

    release.send(()).unwrap();
    let extra = starter.join().unwrap().unwrap();
    assert!(!extra.is_placeholder());
    assert_eq!(h.engine.get_machines(&ws).unwrap().len(), 2);

    h.engine.stop_machine(&ws, extra.id()).unwrap();
    let kinds = h.events.machine_kinds();
    assert_eq!(kinds.iter().filter(|k| **k == MachineEventKind::Destroyed).count(), 1);
}

#[test]
fn start_machine_joins_running_environment() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &dev_and_db()).unwrap();

    let cache = h.engine.start_machine(&ws, machine("cache")).unwrap();
    assert!(!cache.is_placeholder());
    assert_eq!(cache.machine().config.limits.ram_mb, 1024);
    assert_eq!(h.engine.get_machines(&ws).unwrap().len(), 3);
    assert_eq!(h.engine.get_machine(&ws, cache.id()).unwrap().name(), "cache");
}

#[test]
fn start_machine_rejects_duplicates_and_unknown_types() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &dev_and_db()).unwrap();

    let err = h.engine.start_machine(&ws, machine("db")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let other = MachineConfig::new("vm", "qemu", MachineSource::with_location("image", "x"));
    let err = h.engine.start_machine(&ws, other).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(h.engine.get_machines(&ws).unwrap().len(), 2);
}

#[test]
fn start_machine_failure_is_scoped_to_the_machine() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &dev_and_db()).unwrap();
    h.provider.fail_create_of("cache");

    assert!(h.engine.start_machine(&ws, machine("cache")).is_err());
    assert_eq!(h.engine.get_machines(&ws).unwrap().len(), 2);
    assert_eq!(h.engine.get_environment_status(&ws).unwrap(), EnvStatus::Running);
    assert!(h.events.machine_kinds().contains(&MachineEventKind::Error));
}

#[test]
fn start_machine_requires_running_environment() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let err = h
        .engine
        .start_machine(&WorkspaceId::new("ws1"), machine("cache"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn environment_output_receives_machine_lines() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let (tx, rx) = mpsc::channel();
    let options = StartOptions {
        output: Arc::new(ChannelLineConsumer::new(tx)) as SharedConsumer,
        ..StartOptions::default()
    };

    h.engine
        .start(&WorkspaceId::new("ws1"), &descriptor(vec![machine("dev").dev(true)]), &options)
        .unwrap();
    assert_eq!(rx.try_recv().unwrap(), "[mock] machine dev created");
}

#[test]
fn recover_uses_stored_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    let env = descriptor(vec![machine("dev").dev(true)]);
    let machines = start(&h, &ws, &env).unwrap();
    let snapshot = h.engine.snapshot_machine("team", &ws, machines[0].id()).unwrap();
    h.engine.stop(&ws).unwrap();

    let options = StartOptions {
        recover: true,
        ..StartOptions::default()
    };
    h.engine.start(&ws, &env, &options).unwrap();
    let (name, source) = h.provider.sources_used().pop().unwrap();
    assert_eq!(name, "dev");
    assert_eq!(source, snapshot.source);
}

#[test]
fn recover_falls_back_to_origin_when_image_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    let env = descriptor(vec![machine("dev").dev(true)]);
    let machines = start(&h, &ws, &env).unwrap();
    let snapshot = h.engine.snapshot_machine("team", &ws, machines[0].id()).unwrap();
    h.engine.stop(&ws).unwrap();
    h.provider
        .missing_source(snapshot.source.location.as_deref().unwrap());

    let options = StartOptions {
        recover: true,
        ..StartOptions::default()
    };
    h.engine.start(&ws, &env, &options).unwrap();
    let sources: Vec<MachineSource> = h.provider.sources_used().into_iter().map(|(_, s)| s).collect();
    assert_eq!(sources.len(), 3);
    assert_eq!(sources[1], snapshot.source);
    assert_eq!(sources[2], MachineSource::with_location("image", "dev"));
}

#[test]
fn recover_without_snapshot_fails() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    let options = StartOptions {
        recover: true,
        ..StartOptions::default()
    };

    let err = h.engine.start(&ws, &dev_and_db(), &options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(h.provider.live().is_empty());
}

#[test]
fn exec_returns_while_process_runs() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let manager =
        MachineProcessManager::new(Arc::clone(&h.engine), Arc::clone(&h.bus) as Arc<dyn EventService>)
            .unwrap();
    let ws = WorkspaceId::new("ws1");
    let machines = start(&h, &ws, &dev_and_db()).unwrap();
    let dev = machines[0].id().clone();

    let process = manager
        .exec(&ws, &dev, &Command::new("server", "wait for requests", "custom"), None)
        .unwrap();
    assert!(process.is_alive());
    let listed = manager.get_processes(&ws, &dev).unwrap();
    assert!(listed.iter().any(|p| p.pid() == process.pid() && p.is_alive()));

    manager.stop_process(&ws, &dev, process.pid()).unwrap();
    assert!(!process.is_alive());
    let err = manager.stop_process(&ws, &dev, process.pid()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(h.events.process_kinds().contains(&ProcessEventKind::Stopped));
}

#[test]
fn exec_streams_output_and_writes_process_log() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let manager =
        MachineProcessManager::new(Arc::clone(&h.engine), Arc::clone(&h.bus) as Arc<dyn EventService>)
            .unwrap();
    let ws = WorkspaceId::new("ws1");
    let dev = start(&h, &ws, &dev_and_db()).unwrap()[0].id().clone();

    let (tx, rx) = mpsc::channel();
    let process = manager
        .exec(
            &ws,
            &dev,
            &Command::new("hello", "echo hi", "custom"),
            Some(Arc::new(ChannelLineConsumer::new(tx))),
        )
        .unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(10)).unwrap(), "mock-exec: echo hi");

    let mut log = String::new();
    for _ in 0..100 {
        let mut reader = manager.get_process_log_reader(&dev, process.pid()).unwrap();
        log.clear();
        std::io::Read::read_to_string(&mut reader, &mut log).unwrap();
        if !log.is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(log, "mock-exec: echo hi\n");
}

#[test]
fn failing_exec_reports_error_line() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let manager =
        MachineProcessManager::new(Arc::clone(&h.engine), Arc::clone(&h.bus) as Arc<dyn EventService>)
            .unwrap();
    let ws = WorkspaceId::new("ws1");
    let dev = start(&h, &ws, &dev_and_db()).unwrap()[0].id().clone();

    let (tx, rx) = mpsc::channel();
    manager
        .exec(
            &ws,
            &dev,
            &Command::new("broken", "fail hard", "custom"),
            Some(Arc::new(ChannelLineConsumer::new(tx))),
        )
        .unwrap();
    let line = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert!(line.starts_with("[ERROR] "));
}

#[test]
fn exec_validation_and_lookup_errors() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let manager =
        MachineProcessManager::new(Arc::clone(&h.engine), Arc::clone(&h.bus) as Arc<dyn EventService>)
            .unwrap();
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &dev_and_db()).unwrap();

    let err = manager
        .exec(&ws, &MachineId::new("machine-x"), &Command::new("", "ls", "custom"), None)
        .err().unwrap();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = manager
        .exec(&ws, &MachineId::new("machine-x"), &Command::new("ls", "ls", "custom"), None)
        .err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = manager
        .get_process_log_reader(&MachineId::new("machine-x"), 42)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    manager.shutdown();
    let dev = h.engine.get_machines(&ws).unwrap()[0].id().clone();
    let err = manager
        .exec(&ws, &dev, &Command::new("ls", "ls", "custom"), None)
        .err().unwrap();
    assert!(matches!(err, CoreError::ShuttingDown));
}

#[test]
fn cleanup_refuses_new_work_and_clears_logs() {
    let dir = tempfile::tempdir().unwrap();
    let h = harness(dir.path());
    let ws = WorkspaceId::new("ws1");
    start(&h, &ws, &dev_and_db()).unwrap();
    assert!(std::fs::read_dir(h.engine.logs().root()).unwrap().count() > 0);

    h.engine.cleanup();
    assert_eq!(std::fs::read_dir(h.engine.logs().root()).unwrap().count(), 0);

    let err = start(&h, &WorkspaceId::new("ws2"), &dev_and_db()).unwrap_err();
    assert!(matches!(err, CoreError::ShuttingDown));
    h.engine.stop(&ws).unwrap();
}
