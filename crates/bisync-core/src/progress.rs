//! Per-kind progress counters for one plan.

use crate::classifier::{Action, ActionKind};
use crate::events::{EventBus, SyncEvent, now_millis};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// `(kind, completed, total)` after one completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressUpdate {
    pub kind: ActionKind,
    pub completed: usize,
    pub total: usize,
}

/// Counts completions against totals precomputed from the plan.
///
/// Purely observational: nothing in the executor branches on it.
pub struct ProgressTracker {
    totals: BTreeMap<ActionKind, usize>,
    completed: BTreeMap<ActionKind, usize>,
    events: Option<Arc<EventBus>>,
}

impl ProgressTracker {
    pub fn new(plan: &[Action]) -> Self {
        let mut totals = BTreeMap::new();
        for action in plan {
            *totals.entry(action.kind).or_insert(0) += 1;
        }
        Self {
            totals,
            completed: BTreeMap::new(),
            events: None,
        }
    }

    /// Publish every update on `events` as `SyncEvent::ActionProgress`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn total(&self, kind: ActionKind) -> usize {
        self.totals.get(&kind).copied().unwrap_or(0)
    }

    pub fn completed(&self, kind: ActionKind) -> usize {
        self.completed.get(&kind).copied().unwrap_or(0)
    }

    /// Record one finished action of `kind` for `identity`.
    pub fn record(&mut self, kind: ActionKind, identity: &str) -> ProgressUpdate {
        let counter = self.completed.entry(kind).or_insert(0);
        *counter += 1;
        let completed = *counter;

        let update = ProgressUpdate {
            kind,
            completed,
            total: self.total(kind),
        };

        if let Some(events) = &self.events {
            events.emit(SyncEvent::ActionProgress {
                kind,
                identity: identity.to_string(),
                completed: update.completed,
                total: update.total,
                timestamp: now_millis(),
            });
        }
        update
    }
}
