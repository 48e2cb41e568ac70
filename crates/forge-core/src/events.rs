//! Typed listener registry.
//!
//! One [`EventBus`] carries every notification the session layer emits.
//! Subscribers register for a [`Topic`] either persistently or for a single
//! delivery. Dispatch runs callbacks synchronously, in subscription order,
//! over a snapshot taken when the event is raised, so subscribing or
//! unsubscribing from inside a callback only affects later events.

use crate::session::PreviewAddress;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Kinds of event that can be subscribed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// The sandbox dev server is reachable at a new address.
    PreviewUrlChanged,
    /// The version collection was mutated.
    VersionsChanged,
}

/// An event and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The sandbox dev server is reachable at this address.
    PreviewUrlChanged(PreviewAddress),
    /// The version collection was mutated.
    VersionsChanged,
}

impl Event {
    /// Topic this event is delivered on.
    pub fn topic(&self) -> Topic {
        match self {
            Self::PreviewUrlChanged(_) => Topic::PreviewUrlChanged,
            Self::VersionsChanged => Topic::VersionsChanged,
        }
    }
}

/// Subscriber callback.
pub type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Clone)]
struct Listener {
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct ListenerSet {
    persistent: Vec<Listener>,
    once: Vec<Listener>,
}

#[derive(Default)]
struct BusInner {
    topics: Mutex<HashMap<Topic, ListenerSet>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn topics(&self) -> MutexGuard<'_, HashMap<Topic, ListenerSet>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: Topic, id: u64) {
        if let Some(set) = self.topics().get_mut(&topic) {
            set.persistent.retain(|l| l.id != id);
            set.once.retain(|l| l.id != id);
        }
    }
}

/// Cloneable handle to a shared listener registry.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for every future event on `topic`.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(callback), false)
    }

    /// Register a callback for the next event on `topic` only.
    pub fn subscribe_once<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.register(topic, Arc::new(callback), true)
    }

    fn register(&self, topic: Topic, callback: Callback, once: bool) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let listener = Listener { id, callback };
        {
            let mut topics = self.inner.topics();
            let set = topics.entry(topic).or_default();
            if once {
                set.once.push(listener);
            } else {
                set.persistent.push(listener);
            }
        }
        Subscription {
            bus: Arc::downgrade(&self.inner),
            topic,
            id,
        }
    }

    /// Deliver `event` to its topic's subscribers.
    ///
    /// Single-delivery subscribers are removed before any callback runs, so a
    /// re-entrant dispatch can never deliver to them twice. A panicking
    /// callback is logged and does not prevent delivery to the rest.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, event: &Event) -> usize {
        let mut snapshot = {
            let mut topics = self.inner.topics();
            let Some(set) = topics.get_mut(&event.topic()) else {
                return 0;
            };
            let mut snapshot = set.persistent.clone();
            snapshot.append(&mut std::mem::take(&mut set.once));
            snapshot
        };
        snapshot.sort_by_key(|l| l.id);

        for listener in &snapshot {
            let callback = &listener.callback;
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::warn!(
                    topic = ?event.topic(),
                    listener = listener.id,
                    "Listener panicked; continuing dispatch"
                );
            }
        }
        snapshot.len()
    }

    /// Number of callbacks currently registered for `topic`.
    pub fn listener_count(&self, topic: Topic) -> usize {
        self.inner
            .topics()
            .get(&topic)
            .map_or(0, |set| set.persistent.len() + set.once.len())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("preview_listeners", &self.listener_count(Topic::PreviewUrlChanged))
            .field("version_listeners", &self.listener_count(Topic::VersionsChanged))
            .finish()
    }
}

/// Handle returned by a subscription.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<BusInner>,
    topic: Topic,
    id: u64,
}

impl Subscription {
    /// Remove the callback. Safe to call more than once, or after a
    /// single-delivery callback has already fired.
    pub fn unsubscribe(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.topic, self.id);
        }
    }

    /// Topic this subscription listens on.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Event) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &Event| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    fn address() -> Event {
        Event::PreviewUrlChanged(PreviewAddress::from_server_ready(5173, "localhost"))
    }

    #[test]
    fn test_persistent_listener_fires_every_time() {
        let bus = EventBus::new();
        let (count, cb) = counter();
        bus.subscribe(Topic::VersionsChanged, cb);

        bus.dispatch(&Event::VersionsChanged);
        bus.dispatch(&Event::VersionsChanged);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_once_listener_fires_once() {
        let bus = EventBus::new();
        let (count, cb) = counter();
        bus.subscribe_once(Topic::PreviewUrlChanged, cb);

        assert_eq!(bus.dispatch(&address()), 1);
        assert_eq!(bus.dispatch(&address()), 0);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(Topic::PreviewUrlChanged), 0);
    }

    #[test]
    fn test_topics_are_isolated() {
        let bus = EventBus::new();
        let (count, cb) = counter();
        bus.subscribe(Topic::PreviewUrlChanged, cb);

        bus.dispatch(&Event::VersionsChanged);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let (count, cb) = counter();
        let sub = bus.subscribe(Topic::VersionsChanged, cb);

        sub.unsubscribe();
        sub.unsubscribe();
        bus.dispatch(&Event::VersionsChanged);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_after_once_fired() {
        let bus = EventBus::new();
        let (_, cb) = counter();
        let sub = bus.subscribe_once(Topic::PreviewUrlChanged, cb);
        bus.dispatch(&address());
        sub.unsubscribe();
        assert_eq!(bus.listener_count(Topic::PreviewUrlChanged), 0);
    }

    #[test]
    fn test_dispatch_in_subscription_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for (i, once) in [(0, false), (1, true), (2, false)] {
            let order = Arc::clone(&order);
            let cb = move |_: &Event| order.lock().unwrap().push(i);
            if once {
                bus.subscribe_once(Topic::VersionsChanged, cb);
            } else {
                bus.subscribe(Topic::VersionsChanged, cb);
            }
        }

        bus.dispatch(&Event::VersionsChanged);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_dispatch() {
        let bus = EventBus::new();
        bus.subscribe(Topic::VersionsChanged, |_| panic!("listener bug"));
        let (count, cb) = counter();
        bus.subscribe(Topic::VersionsChanged, cb);

        assert_eq!(bus.dispatch(&Event::VersionsChanged), 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_during_dispatch_applies_to_next_event() {
        let bus = EventBus::new();
        let (count, cb) = counter();
        let cb = Arc::new(cb);
        let inner_bus = bus.clone();
        bus.subscribe_once(Topic::VersionsChanged, move |_| {
            let cb = Arc::clone(&cb);
            inner_bus.subscribe(Topic::VersionsChanged, move |e| cb(e));
        });

        bus.dispatch(&Event::VersionsChanged);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        bus.dispatch(&Event::VersionsChanged);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_dispatch_does_not_repeat_once() {
        let bus = EventBus::new();
        let (count, cb) = counter();
        let inner_bus = bus.clone();
        bus.subscribe_once(Topic::VersionsChanged, move |e| {
            cb(e);
            inner_bus.dispatch(&Event::VersionsChanged);
        });

        bus.dispatch(&Event::VersionsChanged);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
