//! The event bus.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use agency_core::{AgencyEvent, Event};
use agency_settings::EventSettings;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{trace, warn};

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    id: u64,
    once: bool,
    listener: Listener,
}

struct Inner {
    listeners: RwLock<HashMap<String, Vec<Entry>>>,
    next_id: AtomicU64,
    log_listener_errors: bool,
}

impl Inner {
    fn remove(&self, name: &str, id: u64) -> bool {
        let mut map = self.listeners.write();
        let Some(entries) = map.get_mut(name) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|e| e.id != id);
        let removed = entries.len() < before;
        if entries.is_empty() {
            let _ = map.remove(name);
        }
        removed
    }
}

/// Cheaply cloneable handle to a shared listener table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("event_names", &self.event_names())
            .finish()
    }
}

impl EventBus {
    /// Bus that logs listener failures.
    pub fn new() -> Self {
        Self::from_settings(&EventSettings::default())
    }

    /// Bus configured from settings.
    pub fn from_settings(settings: &EventSettings) -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                log_listener_errors: settings.log_listener_errors,
            }),
        }
    }

    /// Register `listener` for every future `name` event.
    pub fn subscribe<F>(&self, name: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(name.into(), Arc::new(listener), false)
    }

    /// Register `listener` for the next `name` event only.
    ///
    /// The listener is removed before it runs, so a publish from inside the
    /// callback does not re-enter it.
    pub fn subscribe_once<F>(&self, name: impl Into<String>, listener: F) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.add(name.into(), Arc::new(listener), true)
    }

    fn add(&self, name: String, listener: Listener, once: bool) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .entry(name.clone())
            .or_default()
            .push(Entry { id, once, listener });
        trace!(event = %name, id, once, "listener subscribed");

        Subscription {
            bus: Arc::downgrade(&self.inner),
            name,
            id,
        }
    }

    /// Deliver an event to every listener currently registered for `name`.
    ///
    /// Returns the number of listeners invoked (including ones that failed).
    pub fn publish(&self, name: &str, payload: Value) -> usize {
        let listeners = self.take_snapshot(name);
        if listeners.is_empty() {
            return 0;
        }

        let event = Event::new(name, payload);
        for listener in &listeners {
            self.invoke(listener, &event);
        }
        listeners.len()
    }

    /// Publish a catalogue event.
    pub fn emit(&self, event: AgencyEvent) -> usize {
        self.publish(event.name(), event.payload())
    }

    /// Listeners currently registered for `name`.
    pub fn listener_count(&self, name: &str) -> usize {
        self.inner.listeners.read().get(name).map_or(0, Vec::len)
    }

    /// Names with at least one listener, sorted.
    pub fn event_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.listeners.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop every listener for `name`. Returns how many were removed.
    pub fn clear(&self, name: &str) -> usize {
        self.inner
            .listeners
            .write()
            .remove(name)
            .map_or(0, |entries| entries.len())
    }

    // Copies the listener list so callbacks may subscribe or unsubscribe
    // without holding the table lock. One-shot entries leave the table here.
    fn take_snapshot(&self, name: &str) -> Vec<Listener> {
        let mut map = self.inner.listeners.write();
        let Some(entries) = map.get_mut(name) else {
            return Vec::new();
        };

        let snapshot = entries.iter().map(|e| Arc::clone(&e.listener)).collect();
        entries.retain(|e| !e.once);
        if entries.is_empty() {
            let _ = map.remove(name);
        }
        snapshot
    }

    fn invoke(&self, listener: &Listener, event: &Event) {
        match catch_unwind(AssertUnwindSafe(|| listener(event))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                if self.inner.log_listener_errors {
                    warn!(event = %event.name, error = %error, "event listener failed");
                }
            }
            Err(panic) => {
                if self.inner.log_listener_errors {
                    warn!(event = %event.name, panic = %panic_message(&*panic), "event listener panicked");
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it leaves the
/// listener registered.
#[derive(Debug)]
pub struct Subscription {
    bus: Weak<Inner>,
    name: String,
    id: u64,
}

impl Subscription {
    /// Event name this subscription listens to.
    pub fn event_name(&self) -> &str {
        &self.name
    }

    /// Remove the listener. Returns `false` if it was already gone (a fired
    /// one-shot, a cleared name, or a dropped bus).
    pub fn unsubscribe(&self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|inner| inner.remove(&self.name, self.id))
    }
}
