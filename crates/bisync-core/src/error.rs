//! Error taxonomy for a sync run.
//!
//! - Listing and baseline failures abort before any plan is built.
//! - Transfer and merge failures abort (or are collected for) the plan in
//!   progress; completed actions keep their effects and the baseline is left
//!   untouched, so the next run retries from the last committed state.

use crate::backend::BackendError;
use crate::baseline::BaselineError;
use crate::classifier::ActionKind;
use crate::merge::MergeError;

use std::fmt;
use thiserror::Error;

/// Which snapshot a listing failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Local,
    Remote,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Local => f.write_str("local"),
            Side::Remote => f.write_str("remote"),
        }
    }
}

/// Why a single action failed.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("transfer failed: {0}")]
    Transfer(#[from] BackendError),

    #[error("merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("merge requires both a local and a remote record")]
    MissingRecord,
}

/// A failed action, reported with its identity and kind.
#[derive(Debug, Error)]
#[error("{kind} {identity}: {error}")]
pub struct ActionFailure {
    pub identity: String,
    pub kind: ActionKind,
    #[source]
    pub error: ActionError,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Failed to list {side} files: {source}")]
    Listing {
        side: Side,
        #[source]
        source: BackendError,
    },

    #[error("Baseline error: {0}")]
    Baseline(#[from] BaselineError),

    #[error("{kind} {identity} failed: {source}")]
    Action {
        identity: String,
        kind: ActionKind,
        #[source]
        source: ActionError,
    },

    #[error("{} action(s) failed, baseline not committed", .0.len())]
    ActionsFailed(Vec<ActionFailure>),
}

impl SyncError {
    /// Identities whose actions failed (empty for listing/baseline errors).
    pub fn failed_identities(&self) -> Vec<&str> {
        match self {
            SyncError::Action { identity, .. } => vec![identity.as_str()],
            SyncError::ActionsFailed(failures) => {
                failures.iter().map(|f| f.identity.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
