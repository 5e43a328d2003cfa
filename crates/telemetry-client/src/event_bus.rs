//! Typed publish/subscribe event bus (spec §4.A).
//!
//! Listener registrations are values with explicit lifetime: `on` returns
//! a [`Subscription`] token; dropping it does not unregister (explicit
//! `off` is required, matching spec.md's "unregister by reference"), but
//! holding it is how a caller later calls `off`.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::events::Event;

/// Opaque handle returned by [`EventBus::on`]/[`EventBus::once`]; pass back
/// to [`EventBus::off`] to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct Entry {
    id: Subscription,
    listener: Listener,
    once: bool,
}

/// Synchronous, single-threaded-semantics event bus. `emit` delivers to
/// every *current* subscriber for that event name in registration order;
/// a listener that panics is caught and logged rather than propagated, so
/// later listeners still run and the emitter's internal state is never
/// mutated by a failing listener.
pub struct EventBus {
    listeners: Mutex<HashMap<&'static str, Vec<Entry>>>,
    next_id: AtomicU64,
    max_listeners: usize,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(50)
    }
}

impl EventBus {
    pub fn new(max_listeners: usize) -> Self {
        EventBus {
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_listeners,
        }
    }

    /// Register `listener` for `event_name`. Warns (does not error) past
    /// `max_listeners_per_event`.
    pub fn on(
        &self,
        event_name: &'static str,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        let id = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap();
        let bucket = listeners.entry(event_name).or_default();
        bucket.push(Entry {
            id,
            listener: Arc::new(listener),
            once: false,
        });
        if bucket.len() > self.max_listeners {
            tracing::warn!(event = event_name, count = bucket.len(), "listener count exceeds configured maximum");
        }
        id
    }

    /// Register a listener that self-unregisters after its first delivery.
    /// The entry is tagged `once` and actually removed from the registry by
    /// `emit` right after it fires (see `emit`'s removal pass), rather than
    /// left in place behind a fired flag.
    pub fn once(
        &self,
        event_name: &'static str,
        listener: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Subscription {
        let id = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap();
        let bucket = listeners.entry(event_name).or_default();
        bucket.push(Entry {
            id,
            listener: Arc::new(listener),
            once: true,
        });
        id
    }

    /// Unregister a previously registered listener by its [`Subscription`]
    /// handle. No-op if already removed.
    pub fn off(&self, event_name: &'static str, subscription: Subscription) {
        let mut listeners = self.listeners.lock().unwrap();
        if let Some(bucket) = listeners.get_mut(event_name) {
            bucket.retain(|e| e.id != subscription);
        }
    }

    /// Emit `event` to every subscriber of `event_name`, in registration
    /// order, isolating listener panics.
    pub fn emit(&self, event_name: &'static str, event: Event) {
        // Dispatch by index, re-locking per call, so a listener calling
        // `on`/`off` mid-emit cannot deadlock and the delivery list length
        // is re-checked each iteration rather than snapshotted up front.
        // The listener itself is cloned out and invoked with the registry
        // lock released, so a `once` entry can be removed by id afterward
        // without re-entering the lock from inside the call.
        let len = {
            let listeners = self.listeners.lock().unwrap();
            listeners.get(event_name).map_or(0, Vec::len)
        };
        let mut fired_once = Vec::new();
        for i in 0..len {
            let entry = {
                let listeners = self.listeners.lock().unwrap();
                listeners
                    .get(event_name)
                    .and_then(|b| b.get(i))
                    .map(|e| (e.id, e.listener.clone(), e.once))
            };
            let Some((id, listener, once)) = entry else { continue };
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener(&event)));
            if let Err(panic) = outcome {
                tracing::error!(event = event_name, ?panic, "event listener panicked; isolated");
            }
            if once {
                fired_once.push(id);
            }
        }
        if !fired_once.is_empty() {
            let mut listeners = self.listeners.lock().unwrap();
            if let Some(bucket) = listeners.get_mut(event_name) {
                bucket.retain(|e| !fired_once.contains(&e.id));
            }
        }
    }

    pub fn listener_count(&self, event_name: &'static str) -> usize {
        self.listeners
            .lock()
            .unwrap()
            .get(event_name)
            .map_or(0, Vec::len)
    }

    /// Remove every registered listener across all events (spec §8
    /// property 8: `destroy()` leaves no listeners alive).
    pub fn clear_all(&self) {
        self.listeners.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn emit_delivers_in_registration_order() {
        let bus = EventBus::default();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        bus.on("evt", move |_| o1.lock().unwrap().push(1));
        let o2 = order.clone();
        bus.on("evt", move |_| o2.lock().unwrap().push(2));
        bus.emit("evt", Event::Custom("x".into()));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn once_fires_only_a_single_time() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.once("evt", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("evt", Event::Custom("x".into()));
        bus.emit("evt", Event::Custom("x".into()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count("evt"), 0, "once listener must be removed, not just silenced");
    }

    #[test]
    fn clear_all_removes_listeners_across_events() {
        let bus = EventBus::default();
        bus.on("evt_a", |_| {});
        bus.on("evt_b", |_| {});
        bus.clear_all();
        assert_eq!(bus.listener_count("evt_a"), 0);
        assert_eq!(bus.listener_count("evt_b"), 0);
    }

    #[test]
    fn off_unregisters_by_handle() {
        let bus = EventBus::default();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = bus.on("evt", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.off("evt", sub);
        bus.emit("evt", Event::Custom("x".into()));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_block_later_listeners() {
        let bus = EventBus::default();
        bus.on("evt", |_| panic!("boom"));
        let called = Arc::new(AtomicUsize::new(0));
        let c = called.clone();
        bus.on("evt", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit("evt", Event::Custom("x".into()));
        assert_eq!(called.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn exceeding_max_listeners_warns_but_still_registers() {
        let bus = EventBus::new(1);
        bus.on("evt", |_| {});
        bus.on("evt", |_| {});
        assert_eq!(bus.listener_count("evt"), 2);
    }
}
