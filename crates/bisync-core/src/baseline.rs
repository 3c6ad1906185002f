//! Baseline store: the remembered state as of the last successful sync.
//!
//! One JSON document per logical cache (one per remote endpoint, one for the
//! local side):
//!
//! ```json
//! {
//!   "lastSyncTimestamp": "2024-05-01T10:00:00Z",
//!   "entries": {
//!     "notes/a.md": { "contentHash": "9f86d0…", "syncedAtUTC": "2024-05-01T09:59:58.120Z", "size": 412 }
//!   }
//! }
//! ```
//!
//! Documents are replaced wholesale via temp file + rename, so a failed write
//! leaves the previous document in place. A missing or unparseable document
//! reads as an empty baseline (first-ever sync).

use crate::fs::{FileSystem, FsError};
use crate::record::{ContentHash, FileRecord};

use chrono::{DateTime, Utc};
use futures::lock::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum BaselineError {
    #[error("Baseline I/O error: {0}")]
    Fs(#[from] FsError),

    #[error("Failed to serialize baseline: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BaselineError>;

/// Last known-synced state of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineEntry {
    pub content_hash: ContentHash,
    #[serde(rename = "syncedAtUTC")]
    pub synced_at: DateTime<Utc>,
    /// Byte size at commit. Older documents carry no size.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Identity -> entry. Ordered so documents serialize deterministically.
pub type Baseline = BTreeMap<String, BaselineEntry>;

/// On-disk form of a baseline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaselineDocument {
    #[serde(default)]
    pub last_sync_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entries: Baseline,
}

impl BaselineDocument {
    /// Build the document that records `records` as the synced state.
    pub fn from_records(records: &[FileRecord], now: DateTime<Utc>) -> Self {
        let entries = records
            .iter()
            .filter(|r| !r.is_directory)
            .map(|r| {
                (
                    r.identity.clone(),
                    BaselineEntry {
                        content_hash: r.content_hash.clone(),
                        synced_at: r.modified_at,
                        size: Some(r.size),
                    },
                )
            })
            .collect();
        Self {
            last_sync_timestamp: Some(now),
            entries,
        }
    }
}

/// A single baseline document with its in-memory copy.
///
/// Obtain shared instances through [`BaselineRegistry`] so every component
/// opening the same path observes the same state.
pub struct BaselineStore<F: FileSystem> {
    fs: F,
    path: String,
    document: RwLock<BaselineDocument>,
}

impl<F: FileSystem> BaselineStore<F> {
    /// Open the document at `path`, treating a missing or corrupt file as empty.
    pub async fn open(fs: F, path: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let document = match fs.read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BaselineDocument>(&bytes) {
                Ok(document) => {
                    debug!(
                        "Loaded baseline {} ({} entries)",
                        path,
                        document.entries.len()
                    );
                    document
                }
                Err(e) => {
                    warn!("Ignoring unparseable baseline {}: {}", path, e);
                    BaselineDocument::default()
                }
            },
            Err(FsError::NotFound(_)) => {
                debug!("No baseline at {}, starting empty", path);
                BaselineDocument::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            fs,
            path,
            document: RwLock::new(document),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Snapshot of all entries.
    pub fn read(&self) -> Baseline {
        self.document
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .clone()
    }

    pub fn has(&self, identity: &str) -> bool {
        self.document
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .contains_key(identity)
    }

    pub fn hash_of(&self, identity: &str) -> Option<ContentHash> {
        self.document
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .get(identity)
            .map(|entry| entry.content_hash.clone())
    }

    /// When this baseline was last committed, if ever.
    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.document
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .last_sync_timestamp
    }

    pub fn len(&self) -> usize {
        self.document
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replace the whole baseline with `records` (directories are skipped).
    ///
    /// The in-memory copy only changes once the new document is durable.
    pub async fn write(&self, records: &[FileRecord]) -> Result<()> {
        let document = BaselineDocument::from_records(records, Utc::now());
        let bytes = serde_json::to_vec_pretty(&document)?;

        self.atomic_write(&bytes).await?;

        debug!(
            "Committed baseline {} ({} entries)",
            self.path,
            document.entries.len()
        );
        *self.document.write().unwrap_or_else(|e| e.into_inner()) = document;
        Ok(())
    }

    /// Generate a random hex string for temp file names.
    fn random_hex() -> String {
        let bytes: [u8; 8] = rand::rng().random();
        hex::encode(bytes)
    }

    /// Write to a temp file, then rename over the target.
    async fn atomic_write(&self, content: &[u8]) -> Result<()> {
        let temp_path = format!("{}.{}.tmp", self.path, Self::random_hex());

        if let Err(e) = self.fs.write(&temp_path, content).await {
            let _ = self.fs.delete(&temp_path).await;
            return Err(e.into());
        }

        if let Err(e) = self.fs.rename(&temp_path, &self.path).await {
            let _ = self.fs.delete(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }
}

/// Caller-owned get-or-create registry: one shared store per document path.
pub struct BaselineRegistry<F: FileSystem + Clone> {
    fs: F,
    stores: Mutex<HashMap<String, Arc<BaselineStore<F>>>>,
}

impl<F: FileSystem + Clone> BaselineRegistry<F> {
    pub fn new(fs: F) -> Self {
        Self {
            fs,
            stores: Mutex::new(HashMap::new()),
        }
    }

    /// Return the store for `path`, opening it on first use.
    pub async fn get_or_create(&self, path: &str) -> Result<Arc<BaselineStore<F>>> {
        // Held across the open so concurrent callers cannot load the same path twice.
        let mut stores = self.stores.lock().await;
        if let Some(store) = stores.get(path) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(BaselineStore::open(self.fs.clone(), path).await?);
        stores.insert(path.to_string(), Arc::clone(&store));
        Ok(store)
    }
}
