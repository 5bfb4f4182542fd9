use hangar_schema::Event;
use std::sync::{Arc, RwLock};
use tracing::{trace, warn};

/// Fire-and-forget publication of lifecycle events.
pub trait EventService: Send + Sync {
    fn publish(&self, event: Event);
}

pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &Event);
}

/// Synchronous in-process bus.
///
/// Subscribers are invoked on the publishing thread without any bus lock
/// held, so a subscriber may itself publish.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn EventSubscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        match self.subscribers.write() {
            Ok(mut subscribers) => subscribers.push(subscriber),
            Err(e) => warn!("event bus poisoned, subscriber dropped: {e}"),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map(|s| s.len()).unwrap_or_default()
    }
}

impl EventService for EventBus {
    fn publish(&self, event: Event) {
        let subscribers = match self.subscribers.read() {
            Ok(subscribers) => subscribers.clone(),
            Err(e) => {
                warn!("event bus poisoned, dropping event: {e}");
                return;
            }
        };
        trace!("publishing {event:?} to {} subscribers", subscribers.len());
        for subscriber in subscribers {
            subscriber.on_event(&event);
        }
    }
}
