//! Plan executor: applies a plan action by action, then commits the baselines.
//!
//! Actions run sequentially in plan order. Only a fully successful plan
//! rewrites the baselines, from fresh listings of both sides.

use crate::backend::{Backend, BackendError};
use crate::baseline::BaselineStore;
use crate::classifier::{Action, ActionKind, PlanSummary};
use crate::error::{ActionError, ActionFailure, Result, Side, SyncError};
use crate::events::{EventBus, SyncEvent, now_millis};
use crate::fs::FileSystem;
use crate::merge;
use crate::progress::ProgressTracker;
use crate::record::ContentHash;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What to do when one action fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Keep going, collect every failure, report them together.
    #[default]
    #[serde(rename = "continue")]
    ContinueAndCollect,
    /// Stop the plan at the first failure.
    #[serde(rename = "abort")]
    AbortOnFirst,
}

/// Outcome of a fully applied plan.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub summary: PlanSummary,
    /// Actions in the order they were applied. Merge records carry the
    /// hash and timestamp of the artifact that was written.
    pub applied: Vec<Action>,
    pub committed: bool,
}

pub struct PlanExecutor<'a, F: FileSystem> {
    local: &'a dyn Backend,
    remote: &'a dyn Backend,
    sync_baseline: &'a BaselineStore<F>,
    local_baseline: &'a BaselineStore<F>,
    events: Option<Arc<EventBus>>,
    policy: FailurePolicy,
}

impl<'a, F: FileSystem> PlanExecutor<'a, F> {
    pub fn new(
        local: &'a dyn Backend,
        remote: &'a dyn Backend,
        sync_baseline: &'a BaselineStore<F>,
        local_baseline: &'a BaselineStore<F>,
    ) -> Self {
        Self {
            local,
            remote,
            sync_baseline,
            local_baseline,
            events: None,
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Apply `plan`, then commit both baselines if every action succeeded.
    pub async fn execute(&self, plan: Vec<Action>) -> Result<ExecutionReport> {
        let summary = PlanSummary::of(&plan);
        let mut tracker = ProgressTracker::new(&plan);
        if let Some(events) = &self.events {
            tracker = tracker.with_events(Arc::clone(events));
        }

        let mut applied = Vec::with_capacity(plan.len());
        let mut failures = Vec::new();

        for mut action in plan {
            let identity = action.identity().to_string();
            let kind = action.kind;

            match self.apply(&mut action).await {
                Ok(()) => {
                    let update = tracker.record(kind, &identity);
                    debug!(
                        "{} {} ({}/{})",
                        kind, identity, update.completed, update.total
                    );
                    applied.push(action);
                }
                Err(e) => {
                    error!("{} {} failed: {}", kind, identity, e);
                    self.emit(SyncEvent::ActionFailed {
                        kind,
                        identity: identity.clone(),
                        error: e.to_string(),
                        timestamp: now_millis(),
                    });
                    match self.policy {
                        FailurePolicy::AbortOnFirst => {
                            return Err(SyncError::Action {
                                identity,
                                kind,
                                source: e,
                            });
                        }
                        FailurePolicy::ContinueAndCollect => failures.push(ActionFailure {
                            identity,
                            kind,
                            error: e,
                        }),
                    }
                }
            }
        }

        if !failures.is_empty() {
            warn!(
                "{} of {} action(s) failed; baseline not committed",
                failures.len(),
                summary.total()
            );
            return Err(SyncError::ActionsFailed(failures));
        }

        self.commit().await?;

        Ok(ExecutionReport {
            summary,
            applied,
            committed: true,
        })
    }

    async fn apply(&self, action: &mut Action) -> std::result::Result<(), ActionError> {
        let identity = action.identity().to_string();
        match action.kind {
            ActionKind::Upload => {
                let content = self.local.read_file(&identity).await?;
                self.remote.write_file(&identity, &content).await?;
            }
            ActionKind::Download => {
                let content = self.remote.read_file(&identity).await?;
                self.local.write_file(&identity, &content).await?;
            }
            ActionKind::DeleteLocal => delete(self.local, &identity).await?,
            ActionKind::DeleteRemote => delete(self.remote, &identity).await?,
            ActionKind::Merge => self.merge(action).await?,
        }
        Ok(())
    }

    /// Write the same merge artifact to both sides and refresh the records.
    async fn merge(&self, action: &mut Action) -> std::result::Result<(), ActionError> {
        let (Some(local), Some(remote)) = (action.local.as_mut(), action.remote.as_mut()) else {
            return Err(ActionError::MissingRecord);
        };
        let identity = local.identity.clone();

        let local_content = self.local.read_file(&identity).await?;
        let remote_content = self.remote.read_file(&identity).await?;
        let artifact = merge::merge(&local_content, &remote_content)?;

        self.local.write_file(&identity, &artifact).await?;
        self.remote.write_file(&identity, &artifact).await?;

        let hash = ContentHash::of(&artifact);
        let now = Utc::now();
        for record in [local, remote] {
            record.content_hash = hash.clone();
            record.size = artifact.len() as u64;
            record.modified_at = now;
        }

        info!(
            "Merged {} ({} bytes written to both sides)",
            identity,
            artifact.len()
        );
        Ok(())
    }

    /// Rewrite both baselines from fresh listings.
    async fn commit(&self) -> Result<()> {
        let remote_files = match self.remote.list_files().await {
            Ok(files) => files,
            Err(BackendError::Uninitialized(_)) => Vec::new(),
            Err(source) => {
                return Err(SyncError::Listing {
                    side: Side::Remote,
                    source,
                });
            }
        };
        let local_files = self
            .local
            .list_files()
            .await
            .map_err(|source| SyncError::Listing {
                side: Side::Local,
                source,
            })?;

        for (store, files) in [
            (self.sync_baseline, &remote_files),
            (self.local_baseline, &local_files),
        ] {
            store.write(files).await?;
            self.emit(SyncEvent::BaselineCommitted {
                path: store.path().to_string(),
                entries: store.len(),
                timestamp: now_millis(),
            });
        }

        debug!(
            "Committed baselines ({} remote, {} local entries)",
            self.sync_baseline.len(),
            self.local_baseline.len()
        );
        Ok(())
    }
}

/// Delete that treats an already-missing file as done.
async fn delete(backend: &dyn Backend, identity: &str) -> std::result::Result<(), BackendError> {
    match backend.delete_file(identity).await {
        Err(BackendError::NotFound(_)) => {
            debug!("{} already gone from {}", identity, backend.describe());
            Ok(())
        }
        other => other,
    }
}
