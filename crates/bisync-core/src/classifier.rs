//! Reconciliation classifier: (local snapshot, remote snapshot, baselines) -> plan.
//!
//! Two baselines let the classifier tell "I changed, you didn't" from "you
//! changed, I didn't" from "we both changed":
//! - the sync baseline holds the remote state as of the last successful run
//! - the local baseline holds the local state as of the last successful run
//!
//! Files are matched by identity, never by content hash.

use crate::baseline::Baseline;
use crate::record::FileRecord;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// What to do with one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Upload,
    Download,
    DeleteLocal,
    DeleteRemote,
    /// Both sides diverged from the last synced state.
    Merge,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Upload => "UPLOAD",
            ActionKind::Download => "DOWNLOAD",
            ActionKind::DeleteLocal => "DELETE_LOCAL",
            ActionKind::DeleteRemote => "DELETE_REMOTE",
            ActionKind::Merge => "MERGE",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of a plan. At least one of `local`/`remote` is present;
/// `Merge` always carries both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    pub local: Option<FileRecord>,
    pub remote: Option<FileRecord>,
}

impl Action {
    fn new(kind: ActionKind, local: Option<&FileRecord>, remote: Option<&FileRecord>) -> Self {
        Self {
            kind,
            local: local.cloned(),
            remote: remote.cloned(),
        }
    }

    pub fn identity(&self) -> &str {
        self.local
            .as_ref()
            .or(self.remote.as_ref())
            .map(|r| r.identity.as_str())
            .unwrap_or_default()
    }
}

/// Number of actions per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub counts: BTreeMap<ActionKind, usize>,
}

impl PlanSummary {
    pub fn of(plan: &[Action]) -> Self {
        let mut counts = BTreeMap::new();
        for action in plan {
            *counts.entry(action.kind).or_insert(0) += 1;
        }
        Self { counts }
    }

    pub fn count(&self, kind: ActionKind) -> usize {
        self.counts.get(&kind).copied().unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("nothing to do");
        }
        let parts: Vec<String> = self
            .counts
            .iter()
            .map(|(kind, count)| format!("{} {}", count, kind))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

/// Build the plan for one run.
///
/// Directory records are ignored. The returned plan is ordered by identity and
/// holds at most one action per identity; files whose hashes already agree on
/// both sides produce none.
pub fn classify(
    local: &[FileRecord],
    remote: &[FileRecord],
    sync_baseline: &Baseline,
    local_baseline: &Baseline,
) -> Vec<Action> {
    let local_files: Vec<&FileRecord> = local.iter().filter(|r| !r.is_directory).collect();
    let remote_files: Vec<&FileRecord> = remote.iter().filter(|r| !r.is_directory).collect();

    let mut plan: BTreeMap<&str, Action> = BTreeMap::new();

    // An empty remote next to a non-empty local is a new container, not a mass
    // deletion: upload everything regardless of what the baselines remember.
    if remote_files.is_empty() && !local_files.is_empty() {
        for file in local_files {
            plan.insert(
                file.identity.as_str(),
                Action::new(ActionKind::Upload, Some(file), None),
            );
        }
        return plan.into_values().collect();
    }

    let remote_by_id: HashMap<&str, &FileRecord> = remote_files
        .iter()
        .map(|r| (r.identity.as_str(), *r))
        .collect();
    let local_by_id: HashMap<&str, &FileRecord> = local_files
        .iter()
        .map(|r| (r.identity.as_str(), *r))
        .collect();

    for file in &local_files {
        let identity = file.identity.as_str();
        let kind = match remote_by_id.get(identity) {
            None => classify_local_only(file, sync_baseline, local_baseline),
            Some(remote_file) => classify_both(file, remote_file, sync_baseline, local_baseline),
        };
        if let Some(kind) = kind {
            plan.insert(
                identity,
                Action::new(kind, Some(*file), remote_by_id.get(identity).copied()),
            );
        }
    }

    for file in &remote_files {
        let identity = file.identity.as_str();
        if local_by_id.contains_key(identity) {
            continue;
        }
        let kind = if sync_baseline.contains_key(identity) {
            // Known and synced before, gone locally now
            ActionKind::DeleteRemote
        } else {
            ActionKind::Download
        };
        plan.insert(identity, Action::new(kind, None, Some(*file)));
    }

    plan.into_values().collect()
}

fn classify_local_only(
    local: &FileRecord,
    sync_baseline: &Baseline,
    local_baseline: &Baseline,
) -> Option<ActionKind> {
    let Some(synced) = sync_baseline.get(&local.identity) else {
        return Some(ActionKind::Upload);
    };
    // Last synced locally as it was synced remotely, and untouched since
    let unchanged_locally = local_baseline.get(&local.identity).is_some_and(|entry| {
        entry.content_hash == synced.content_hash && entry.content_hash == local.content_hash
    });
    if unchanged_locally {
        Some(ActionKind::DeleteLocal)
    } else {
        // Local edits win over a remote removal
        Some(ActionKind::Upload)
    }
}

fn classify_both(
    local: &FileRecord,
    remote: &FileRecord,
    sync_baseline: &Baseline,
    local_baseline: &Baseline,
) -> Option<ActionKind> {
    if local.content_hash == remote.content_hash {
        return None;
    }

    let remote_unchanged = sync_baseline
        .get(&local.identity)
        .is_some_and(|entry| entry.content_hash == remote.content_hash);
    if remote_unchanged {
        return Some(ActionKind::Upload);
    }

    let local_unchanged = local_baseline
        .get(&local.identity)
        .is_some_and(|entry| entry.content_hash == local.content_hash);
    if local_unchanged {
        return Some(ActionKind::Download);
    }

    Some(ActionKind::Merge)
}
