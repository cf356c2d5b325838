//! Topic bookkeeping: which handlers are attached to which topic.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use uuid::Uuid;

use crate::envelope::Envelope;

/// Callback invoked with the payload of every event on its topic.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Unique token identifying one attached handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(Uuid);

impl HandlerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

struct Listener {
    id: HandlerId,
    handler: Handler,
}

/// Topic → handlers, in registration order.
///
/// The registry belongs to the channel, not to a socket, so handlers survive
/// reconnects without being attached twice.
#[derive(Default)]
pub struct TopicRegistry {
    topics: Mutex<HashMap<String, Vec<Listener>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, topic: &str, handler: Handler) -> HandlerId {
        let id = HandlerId::new();
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(Listener { id, handler });
        id
    }

    /// Remove exactly one handler. Returns false if it was already gone.
    pub fn detach(&self, topic: &str, id: HandlerId) -> bool {
        let mut topics = self.topics.lock();
        let Some(listeners) = topics.get_mut(topic) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id);
        let removed = listeners.len() != before;
        if listeners.is_empty() {
            topics.remove(topic);
        }
        removed
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics.lock().get(topic).map_or(0, Vec::len)
    }

    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Invoke every handler on the envelope's topic. Returns how many ran.
    ///
    /// Handlers are snapshotted first and called without the lock held, so a
    /// handler may subscribe or unsubscribe from inside its own callback.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        let handlers: Vec<Handler> = match self.topics.lock().get(&envelope.topic) {
            Some(listeners) => listeners
                .iter()
                .map(|listener| Arc::clone(&listener.handler))
                .collect(),
            None => return 0,
        };
        for handler in &handlers {
            handler(&envelope.payload);
        }
        handlers.len()
    }
}

/// Live attachment of one handler to one topic.
///
/// Dropping the guard, or calling [`Subscription::unsubscribe`], detaches
/// exactly this handler; siblings on the same topic stay attached.
#[must_use = "dropping a Subscription detaches its handler"]
pub struct Subscription {
    topic: String,
    id: HandlerId,
    registry: Weak<TopicRegistry>,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(topic: &str, id: HandlerId, registry: &Arc<TopicRegistry>) -> Self {
        Self {
            topic: topic.to_string(),
            id,
            registry: Arc::downgrade(registry),
            active: true,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.detach(&self.topic, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(counter: &Arc<AtomicUsize>) -> Handler {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_detach_leaves_siblings() {
        let registry = Arc::new(TopicRegistry::new());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let a = registry.attach("booking_update", counting_handler(&first));
        registry.attach("booking_update", counting_handler(&second));
        assert_eq!(registry.listener_count("booking_update"), 2);

        assert!(registry.detach("booking_update", a));
        assert!(!registry.detach("booking_update", a));
        assert_eq!(registry.listener_count("booking_update"), 1);

        let ran = registry.dispatch(&Envelope::new("booking_update", json!({"id": 1})));
        assert_eq!(ran, 1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_runs_in_registration_order() {
        let registry = TopicRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            registry.attach(
                "grade_posted",
                Arc::new(move |_: &Value| order.lock().push(label)),
            );
        }
        registry.dispatch(&Envelope::new("grade_posted", json!(null)));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_empty_topics_are_pruned() {
        let registry = TopicRegistry::new();
        let id = registry.attach("semester_changed", Arc::new(|_: &Value| {}));
        assert_eq!(registry.topics(), vec!["semester_changed".to_string()]);
        registry.detach("semester_changed", id);
        assert!(registry.topics().is_empty());
        assert_eq!(
            registry.dispatch(&Envelope::new("semester_changed", json!(null))),
            0
        );
    }

    #[test]
    fn test_guard_detaches_once_on_drop() {
        let registry = Arc::new(TopicRegistry::new());
        let id = registry.attach("booking_update", Arc::new(|_: &Value| {}));
        let keep = registry.attach("booking_update", Arc::new(|_: &Value| {}));
        {
            let guard = Subscription::new("booking_update", id, &registry);
            assert!(guard.is_active());
        }
        assert_eq!(registry.listener_count("booking_update"), 1);

        let guard = Subscription::new("booking_update", keep, &registry);
        guard.unsubscribe();
        assert_eq!(registry.listener_count("booking_update"), 0);
    }

    #[test]
    fn test_handler_may_unsubscribe_itself() {
        let registry = Arc::new(TopicRegistry::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
        let inner_slot = Arc::clone(&slot);
        let id = registry.attach(
            "booking_update",
            Arc::new(move |_: &Value| {
                inner_slot.lock().take();
            }),
        );
        *slot.lock() = Some(Subscription::new("booking_update", id, &registry));

        registry.dispatch(&Envelope::new("booking_update", json!({})));
        assert_eq!(registry.listener_count("booking_update"), 0);
    }
}
