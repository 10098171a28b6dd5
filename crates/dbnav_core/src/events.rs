use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::{Node, sync};

pub type SubscriptionId = Uuid;

#[derive(Debug, Clone)]
pub enum NavigatorEventKind {
    ChildAdded { child: Arc<Node>, index: usize },
    ChildRemoved { child: Arc<Node> },
    ChildrenReplaced { count: usize },
    Renamed { old_name: String, new_name: String },
    Reordered,
    /// A load of the node's children started.
    Locked,
    /// The load ended, whatever its outcome.
    Unlocked,
    /// Cached children were marked stale.
    Invalidated,
    Updated,
}

/// A change to `node`. Events about one node arrive in the order they happened.
#[derive(Debug, Clone)]
pub struct NavigatorEvent {
    pub node: Arc<Node>,
    pub kind: NavigatorEventKind,
}

impl NavigatorEvent {
    pub fn new(node: &Arc<Node>, kind: NavigatorEventKind) -> Self {
        Self {
            node: node.clone(),
            kind,
        }
    }
}

/// Callback interface for event consumers.
///
/// Each listener runs on its own delivery thread and receives events in
/// batches; a move delivers all of its removals and additions as one batch.
pub trait NavigatorListener: Send + Sync {
    fn on_events(&self, events: &[NavigatorEvent]);
}

struct Subscriber {
    id: SubscriptionId,
    sender: Sender<Vec<NavigatorEvent>>,
}

/// Fan-out of navigator events to subscribers.
///
/// Publishing only hands batches to unbounded channels, so a slow subscriber
/// never holds up a load or a mutation.
#[derive(Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    closed: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn NavigatorListener>) -> SubscriptionId {
        let (sender, receiver) = mpsc::channel::<Vec<NavigatorEvent>>();
        let id = self.add(sender);

        let spawned = std::thread::Builder::new()
            .name(format!("dbnav-events-{}", id.simple()))
            .spawn(move || {
                while let Ok(batch) = receiver.recv() {
                    listener.on_events(&batch);
                }
                log::debug!("Event listener {} detached", id);
            });

        if let Err(e) = spawned {
            log::error!("Failed to start event delivery thread: {}", e);
            self.unsubscribe(id);
        }

        id
    }

    pub fn subscribe_channel(&self) -> EventSubscription {
        let (sender, receiver) = mpsc::channel();
        let id = self.add(sender);
        EventSubscription { id, receiver }
    }

    fn add(&self, sender: Sender<Vec<NavigatorEvent>>) -> SubscriptionId {
        let id = SubscriptionId::new_v4();

        // A closed bus hands out subscriptions that never receive anything.
        if !self.closed.load(Ordering::SeqCst) {
            sync::lock(&self.subscribers).push(Subscriber { id, sender });
        }
        id
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = sync::lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        subscribers.len() != before
    }

    pub fn publish(&self, events: Vec<NavigatorEvent>) {
        if events.is_empty() || self.closed.load(Ordering::SeqCst) {
            return;
        }

        let mut subscribers = sync::lock(&self.subscribers);
        subscribers.retain(|subscriber| subscriber.sender.send(events.clone()).is_ok());
    }

    pub fn publish_one(&self, node: &Arc<Node>, kind: NavigatorEventKind) {
        self.publish(vec![NavigatorEvent::new(node, kind)]);
    }

    pub fn subscriber_count(&self) -> usize {
        sync::lock(&self.subscribers).len()
    }

    /// Drops every subscriber and ignores later publishes.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        sync::lock(&self.subscribers).clear();
    }
}

/// Pull-based subscription; events queue up until received.
pub struct EventSubscription {
    id: SubscriptionId,
    receiver: Receiver<Vec<NavigatorEvent>>,
}

impl EventSubscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next batch, or `None` if nothing arrived in time or the bus closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<NavigatorEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(batch) => Some(batch),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Every queued event, flattened, without waiting.
    pub fn drain(&self) -> Vec<NavigatorEvent> {
        self.receiver.try_iter().flatten().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder(Mutex<Vec<usize>>);

    impl NavigatorListener for Recorder {
        fn on_events(&self, events: &[NavigatorEvent]) {
            self.0.lock().unwrap().push(events.len());
        }
    }

    #[test]
    fn channel_subscribers_receive_batches_in_order() {
        let bus = EventBus::new();
        let root = Node::new_root();
        let subscription = bus.subscribe_channel();

        bus.publish_one(&root, NavigatorEventKind::Locked);
        bus.publish(vec![
            NavigatorEvent::new(&root, NavigatorEventKind::Unlocked),
            NavigatorEvent::new(&root, NavigatorEventKind::ChildrenReplaced { count: 2 }),
        ]);

        let events = subscription.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0].kind, NavigatorEventKind::Locked));
        assert!(matches!(
            events[2].kind,
            NavigatorEventKind::ChildrenReplaced { count: 2 }
        ));
    }

    #[test]
    fn listener_runs_on_its_own_thread() {
        let bus = EventBus::new();
        let root = Node::new_root();
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        bus.subscribe(recorder.clone());

        bus.publish(vec![
            NavigatorEvent::new(&root, NavigatorEventKind::Reordered),
            NavigatorEvent::new(&root, NavigatorEventKind::Updated),
        ]);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while recorder.0.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*recorder.0.lock().unwrap(), vec![2]);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = EventBus::new();
        let root = Node::new_root();
        let subscription = bus.subscribe_channel();
        assert_eq!(bus.subscriber_count(), 1);

        drop(subscription);
        bus.publish_one(&root, NavigatorEventKind::Updated);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn closed_bus_drops_events() {
        let bus = EventBus::new();
        let root = Node::new_root();
        let subscription = bus.subscribe_channel();

        bus.close();
        bus.publish_one(&root, NavigatorEventKind::Updated);
        assert!(subscription.drain().is_empty());
        assert!(subscription.recv_timeout(Duration::from_millis(1)).is_none());
    }
}
