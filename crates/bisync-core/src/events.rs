//! Event infrastructure for sync runs.
//!
//! Provides `SyncEvent` for progress/monitoring and `EventBus` for subscriptions.
//! Emitting never waits on subscribers beyond invoking their callbacks.

use crate::classifier::ActionKind;

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted during a sync run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A run against one endpoint began.
    RunStarted {
        endpoint: String,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// Classification finished.
    PlanReady {
        endpoint: String,
        counts: BTreeMap<ActionKind, usize>,
        total: usize,
        timestamp: f64,
    },
    /// One action completed; `completed`/`total` are per kind.
    ActionProgress {
        kind: ActionKind,
        identity: String,
        completed: usize,
        total: usize,
        timestamp: f64,
    },
    /// One action failed.
    ActionFailed {
        kind: ActionKind,
        identity: String,
        error: String,
        timestamp: f64,
    },
    /// A baseline document was rewritten.
    BaselineCommitted {
        path: String,
        entries: usize,
        timestamp: f64,
    },
    /// A run finished; `committed` is false when the baseline was left untouched.
    RunFinished {
        endpoint: String,
        committed: bool,
        failures: usize,
        timestamp: f64,
    },
}

/// Current time in milliseconds since Unix epoch, as carried by events.
pub fn now_millis() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

/// Event bus for publishing sync events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Arc<dyn Fn(SyncEvent) + Send + Sync>)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the callback list so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn progress(identity: &str) -> SyncEvent {
        SyncEvent::ActionProgress {
            kind: ActionKind::Upload,
            identity: identity.into(),
            completed: 1,
            total: 1,
            timestamp: 1000.0,
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(progress("a.md"));

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(progress("a.md"));
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        bus.emit(progress("b.md"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_events_arrive_in_order() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let _sub = bus.subscribe(move |event| {
            if let SyncEvent::ActionProgress { identity, .. } = event {
                seen_clone.lock().unwrap().push(identity);
            }
        });

        bus.emit(progress("a.md"));
        bus.emit(progress("b.md"));

        assert_eq!(*seen.lock().unwrap(), vec!["a.md", "b.md"]);
    }

    #[test]
    fn test_emit_without_subscribers_is_fine() {
        EventBus::new().emit(progress("a.md"));
    }

    #[test]
    fn test_sync_event_serialization() {
        let json = serde_json::to_string(&progress("a.md")).unwrap();
        assert!(json.contains("\"type\":\"actionProgress\""));
        assert!(json.contains("\"kind\":\"UPLOAD\""));
        assert!(json.contains("\"completed\":1"));
    }
}
