//! bisync-core: baseline-driven two-way file synchronization.
//!
//! This crate provides the core functionality for:
//! - Listing a local tree and a remote container as content-hashed records
//! - Classifying both snapshots against the last synced state into a plan
//! - Applying the plan, merging files that diverged on both sides
//! - Persisting sync baselines atomically once a plan fully succeeds
//! - FileSystem and Backend trait abstractions

pub mod backend;
pub mod baseline;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod fs;
pub mod merge;
pub mod progress;
pub mod record;

#[cfg(test)]
mod testing;

pub use backend::{Backend, BackendError, DEFAULT_HASH_CONCURRENCY, FsBackend};
pub use baseline::{Baseline, BaselineEntry, BaselineError, BaselineRegistry, BaselineStore};
pub use classifier::{Action, ActionKind, PlanSummary, classify};
pub use engine::{Endpoint, SyncEngine, SyncOptions, SyncReport};
pub use error::{ActionError, ActionFailure, Side, SyncError};
pub use events::{EventBus, Subscription, SyncEvent};
pub use executor::{ExecutionReport, FailurePolicy, PlanExecutor};
pub use fs::{FileEntry, FileStat, FileSystem, FsError, InMemoryFs};
pub use merge::{ADDED_MARKER, MergeError, REMOVED_MARKER, merge};
pub use progress::{ProgressTracker, ProgressUpdate};
pub use record::{ContentHash, FileRecord, InvalidIdentity, validate_identity};
