use crate::engine::EnvironmentEngine;
use crate::events::{EventBus, EventService, EventSubscriber};
use crate::logs::LogLayout;
use hangar_schema::{Event, InstanceStateEvent, InstanceStateKind, MachineEvent, MachineEventKind};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Reacts to instances that died on their own: tells the machine log why and
/// announces the machine as destroyed. The registry is left untouched.
pub struct MachineCleaner {
    engine: Weak<EnvironmentEngine>,
    bus: Weak<EventBus>,
    logs: LogLayout,
}

impl MachineCleaner {
    /// Subscribe a cleaner for `engine` to `bus`.
    pub fn install(bus: &Arc<EventBus>, engine: &Arc<EnvironmentEngine>) -> Arc<Self> {
        let cleaner = Arc::new(Self {
            engine: Arc::downgrade(engine),
            bus: Arc::downgrade(bus),
            logs: engine.logs().clone(),
        });
        bus.subscribe(Arc::clone(&cleaner) as Arc<dyn EventSubscriber>);
        cleaner
    }

    fn handle(&self, event: &InstanceStateEvent) {
        let machine = self
            .engine
            .upgrade()
            .and_then(|engine| engine.get_machine(&event.workspace_id, &event.machine_id).ok());

        let mut message = String::from("Machine is destroyed. ");
        if event.kind == InstanceStateKind::Oom {
            let ram = machine
                .as_ref()
                .map(|m| m.machine().config.limits.ram_mb.to_string())
                .unwrap_or_else(|| "unknown".to_owned());
            message.push_str(&format!(
                "The processes in this machine need more RAM. This machine started with {ram} MB. \
                 Create a new machine configuration that allocates additional RAM or increase \
                 the workspace RAM limit in the user dashboard."
            ));
        }

        match machine.as_ref().and_then(|m| m.live().ok()) {
            Some(live) => {
                if let Err(e) = live.logger().write_line(&message) {
                    warn!("cannot write to log of machine {}: {e}", event.machine_id);
                }
            }
            None => self.logs.append_machine_line(&event.machine_id, &message),
        }

        let dev = machine.as_ref().is_some_and(|m| m.is_dev());
        match self.bus.upgrade() {
            Some(bus) => bus.publish(Event::Machine(MachineEvent {
                kind: MachineEventKind::Destroyed,
                workspace_id: event.workspace_id.clone(),
                machine_id: event.machine_id.clone(),
                machine_name: event.machine_name.clone(),
                dev,
                error: None,
            })),
            None => debug!("event bus gone, DESTROYED of {} not published", event.machine_id),
        }
    }
}

impl EventSubscriber for MachineCleaner {
    fn on_event(&self, event: &Event) {
        if let Event::InstanceState(state) = event {
            warn!(
                "machine '{}' of workspace {} went down: {:?}",
                state.machine_name, state.workspace_id, state.kind
            );
            self.handle(state);
        }
    }
}
