//! Typed publish/subscribe registry for session events
//!
//! Subscribers are kept per [`Topic`] in registration order. Dispatch works on a
//! snapshot of the list, so a handler may subscribe or unsubscribe (or call back
//! into the session) without deadlocking. Each invocation is isolated: an `Err`
//! or a panic is logged and the next handler still runs.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use color_eyre::Result;
use tracing::{debug, error, warn};

use super::envelope::Envelope;

pub const CONNECTING: &str = "connecting";
pub const CONNECTED: &str = "connected";
pub const DISCONNECTED: &str = "disconnected";
pub const RECONNECT_FAILED: &str = "reconnect_failed";

/// What a subscriber listens to
///
/// Lifecycle topics are raised by the session itself; [`Topic::Message`] matches
/// inbound frames by their `type`. Keeping the two apart matters because the
/// server's welcome frame is also called `connected`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Connecting,
    Connected,
    Disconnected,
    ReconnectFailed,
    Message(String),
}

impl Topic {
    pub fn message(kind: impl Into<String>) -> Self {
        Topic::Message(kind.into())
    }

    pub(crate) fn lifecycle_name(&self) -> Option<&'static str> {
        match self {
            Topic::Connecting => Some(CONNECTING),
            Topic::Connected => Some(CONNECTED),
            Topic::Disconnected => Some(DISCONNECTED),
            Topic::ReconnectFailed => Some(RECONNECT_FAILED),
            Topic::Message(_) => None,
        }
    }
}

pub type Handler = Arc<dyn Fn(&Envelope) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<Topic, Vec<(SubscriptionId, Handler)>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Envelope) -> Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        debug!("subscribing {:?} to {:?}", id, topic);
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(topic)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Returns false when the subscription was not registered for `topic`
    pub fn off(&self, topic: &Topic, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(list) = handlers.get_mut(topic) else {
            return false;
        };
        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;
        if list.is_empty() {
            handlers.remove(topic);
        }
        removed
    }

    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
            .map_or(0, Vec::len)
    }

    /// Runs every handler of `topic`; returns how many completed without error
    pub fn emit(&self, topic: &Topic, event: &Envelope) -> usize {
        let snapshot: Vec<Handler> = match self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(topic)
        {
            Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
            None => return 0,
        };

        let mut delivered = 0;
        for handler in snapshot {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("subscriber for {:?} failed: {:#}", topic, e),
                Err(_) => error!("subscriber for {:?} panicked", topic),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use color_eyre::eyre::eyre;
    use serde_json::json;

    fn recorder() -> (Arc<Mutex<Vec<&'static str>>>, impl Fn(&'static str) -> Handler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = log.clone();
        let make = move |name: &'static str| -> Handler {
            let log = log_clone.clone();
            Arc::new(move |_: &Envelope| {
                log.lock().unwrap().push(name);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn handlers_run_in_registration_order() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        for name in ["first", "second", "third"] {
            let h = make(name);
            bus.on(Topic::message("state_update"), move |e| h(e));
        }

        let event = Envelope::new("state_update", json!({}));
        assert_eq!(bus.emit(&Topic::message("state_update"), &event), 3);
        assert_eq!(*log.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn failing_and_panicking_handlers_are_isolated() {
        let bus = EventBus::new();
        let (log, make) = recorder();

        let before = make("before");
        bus.on(Topic::Connected, move |e| before(e));
        bus.on(Topic::Connected, |_| Err(eyre!("listener broke")));
        bus.on(Topic::Connected, |_| panic!("listener exploded"));
        let after = make("after");
        bus.on(Topic::Connected, move |e| after(e));

        let delivered = bus.emit(&Topic::Connected, &Envelope::lifecycle(CONNECTED));

        assert_eq!(delivered, 2);
        assert_eq!(*log.lock().unwrap(), vec!["before", "after"]);

        // the bus keeps working after a panic
        assert_eq!(bus.emit(&Topic::Connected, &Envelope::lifecycle(CONNECTED)), 2);
    }

    #[test]
    fn off_removes_only_that_subscription() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        let id_a = bus.on(Topic::Disconnected, move |e| a(e));
        bus.on(Topic::Disconnected, move |e| b(e));

        assert!(bus.off(&Topic::Disconnected, id_a));
        assert!(!bus.off(&Topic::Disconnected, id_a));
        assert!(!bus.off(&Topic::Connecting, id_a));

        bus.emit(&Topic::Disconnected, &Envelope::lifecycle(DISCONNECTED));
        assert_eq!(*log.lock().unwrap(), vec!["b"]);
        assert_eq!(bus.subscriber_count(&Topic::Disconnected), 1);
    }

    #[test]
    fn topics_do_not_leak_into_each_other() {
        let bus = EventBus::new();
        let (log, make) = recorder();
        let h = make("lifecycle");
        bus.on(Topic::Connected, move |e| h(e));

        // the server's welcome frame shares the name but not the topic
        let welcome = Envelope::new("connected", json!({ "version": "1.0" }));
        assert_eq!(bus.emit(&Topic::message("connected"), &welcome), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn handler_may_unsubscribe_during_dispatch() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        let id = Arc::new(Mutex::new(None));
        let id_slot = id.clone();
        let sub = bus.on(Topic::Connecting, move |_| {
            if let Some(id) = *id_slot.lock().unwrap() {
                inner.off(&Topic::Connecting, id);
            }
            Ok(())
        });
        *id.lock().unwrap() = Some(sub);

        assert_eq!(bus.emit(&Topic::Connecting, &Envelope::lifecycle(CONNECTING)), 1);
        assert_eq!(bus.subscriber_count(&Topic::Connecting), 0);
    }
}
