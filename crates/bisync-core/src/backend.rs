//! Backend capability contract: the only way the engine touches a file tree.
//!
//! Implementations:
//! - `FsBackend` - any `FileSystem`, optionally under an object-store style key prefix
//! - Cloud object stores live outside this crate and implement `Backend` directly
//!
//! Retries for transient failures belong inside implementations; any error that
//! escapes this trait is final for the action that triggered it.

use crate::baseline::Baseline;
use crate::fs::{FileSystem, FsError};
use crate::record::{
    ContentHash, FileRecord, InvalidIdentity, millis_to_datetime, validate_identity,
};

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::RwLock;
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of files hashed concurrently during a listing.
pub const DEFAULT_HASH_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The container/root does not exist yet. Listing treats this as "no files".
    #[error("Container not initialized: {0}")]
    Uninitialized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidIdentity(#[from] InvalidIdentity),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Backend error: {0}")]
    Other(String),
}

impl From<FsError> for BackendError {
    fn from(e: FsError) -> Self {
        match e {
            FsError::NotFound(path) => BackendError::NotFound(path),
            other => BackendError::Io(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;

/// The four-operation contract every side of a sync implements.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Human-readable label for logs (e.g. a root path or bucket URI).
    fn describe(&self) -> String;

    /// List every file and directory. Fails with `Uninitialized` when the
    /// container does not exist yet.
    async fn list_files(&self) -> Result<Vec<FileRecord>>;

    async fn read_file(&self, identity: &str) -> Result<Vec<u8>>;

    /// Create or replace a file (parent directories are created as needed).
    async fn write_file(&self, identity: &str, content: &[u8]) -> Result<()>;

    async fn delete_file(&self, identity: &str) -> Result<()>;

    /// Offer previously recorded hashes so unchanged files need not be re-read.
    ///
    /// Entries are trusted when the file's modification time equals the
    /// recorded `synced_at`. Backends that get hashes for free ignore this.
    fn prime_hash_cache(&self, _cache: &Baseline) {}
}

/// `Backend` over any `FileSystem`.
///
/// With a non-empty `prefix` the backend behaves like an object-store key
/// prefix: identities map to `prefix/identity` and the prefix itself must
/// exist for listing to succeed.
pub struct FsBackend<F: FileSystem> {
    fs: F,
    label: String,
    prefix: String,
    /// Top-level names never listed (e.g. the sync state directory).
    ignore: HashSet<String>,
    hash_concurrency: usize,
    hash_cache: RwLock<Baseline>,
}

impl<F: FileSystem> FsBackend<F> {
    pub fn new(fs: F, label: impl Into<String>) -> Self {
        Self {
            fs,
            label: label.into(),
            prefix: String::new(),
            ignore: HashSet::new(),
            hash_concurrency: DEFAULT_HASH_CONCURRENCY,
            hash_cache: RwLock::new(Baseline::new()),
        }
    }

    /// Store everything under `prefix` (leading/trailing slashes ignored).
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_matches('/').to_string();
        self
    }

    /// Skip these top-level names when listing.
    pub fn with_ignored<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_hash_concurrency(mut self, workers: usize) -> Self {
        self.hash_concurrency = workers.max(1);
        self
    }

    fn storage_path(&self, identity: &str) -> String {
        if self.prefix.is_empty() {
            identity.to_string()
        } else {
            format!("{}/{}", self.prefix, identity)
        }
    }

    fn checked_path(&self, identity: &str) -> Result<String> {
        validate_identity(identity)?;
        Ok(self.storage_path(identity))
    }

    /// Walk the tree below the prefix, returning (identity, is_dir) pairs.
    async fn walk(&self) -> Result<Vec<(String, bool)>> {
        let mut found = Vec::new();
        let mut pending = vec![String::new()];

        while let Some(dir) = pending.pop() {
            let entries = match self.fs.list(&self.storage_path_of_dir(&dir)).await {
                Ok(entries) => entries,
                // Raced with a delete; nothing left to list there.
                Err(FsError::NotFound(_)) if !dir.is_empty() => continue,
                Err(e) => return Err(e.into()),
            };

            for entry in entries {
                if dir.is_empty() && self.ignore.contains(&entry.name) {
                    continue;
                }
                let identity = if dir.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", dir, entry.name)
                };
                if let Err(e) = validate_identity(&identity) {
                    warn!("Skipping {} in {}: {}", identity, self.label, e);
                    continue;
                }
                if entry.is_dir {
                    pending.push(identity.clone());
                }
                found.push((identity, entry.is_dir));
            }
        }

        Ok(found)
    }

    fn storage_path_of_dir(&self, dir: &str) -> String {
        if dir.is_empty() {
            self.prefix.clone()
        } else {
            self.storage_path(dir)
        }
    }

    /// Stat (and hash, unless cached) one listed entry.
    async fn describe_entry(&self, identity: String, is_dir: bool) -> Result<Option<FileRecord>> {
        let path = self.storage_path(&identity);
        let stat = match self.fs.stat(&path).await {
            Ok(stat) => stat,
            // Deleted between list and stat
            Err(FsError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified_at = millis_to_datetime(stat.mtime_millis);

        let mut record = if is_dir || stat.is_dir {
            FileRecord::directory(identity, modified_at)
        } else {
            let cached = self
                .hash_cache
                .read()
                .unwrap_or_else(|e| e.into_inner())
                .get(&identity)
                .filter(|entry| {
                    entry.synced_at == modified_at && entry.size == Some(stat.size)
                })
                .map(|entry| entry.content_hash.clone());

            let content_hash = match cached {
                Some(hash) => hash,
                None => match self.fs.read(&path).await {
                    Ok(bytes) => ContentHash::of(&bytes),
                    Err(FsError::NotFound(_)) => return Ok(None),
                    Err(e) => return Err(e.into()),
                },
            };
            FileRecord::file(identity, content_hash, stat.size, modified_at)
        };
        record.remote_path = path;
        Ok(Some(record))
    }
}

#[async_trait]
impl<F: FileSystem> Backend for FsBackend<F> {
    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            self.label.clone()
        } else {
            format!("{}/{}", self.label, self.prefix)
        }
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        if !self.fs.exists(&self.prefix).await? {
            return Err(BackendError::Uninitialized(self.describe()));
        }

        let entries = self.walk().await?;
        let total = entries.len();

        let records: Vec<Option<FileRecord>> = stream::iter(entries)
            .map(|(identity, is_dir)| self.describe_entry(identity, is_dir))
            .buffer_unordered(self.hash_concurrency)
            .try_collect()
            .await?;

        let mut records: Vec<FileRecord> = records.into_iter().flatten().collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));

        debug!(
            "Listed {} entries ({} walked) from {}",
            records.len(),
            total,
            self.describe()
        );
        Ok(records)
    }

    async fn read_file(&self, identity: &str) -> Result<Vec<u8>> {
        let path = self.checked_path(identity)?;
        Ok(self.fs.read(&path).await?)
    }

    async fn write_file(&self, identity: &str, content: &[u8]) -> Result<()> {
        let path = self.checked_path(identity)?;
        Ok(self.fs.write(&path, content).await?)
    }

    async fn delete_file(&self, identity: &str) -> Result<()> {
        let path = self.checked_path(identity)?;
        Ok(self.fs.delete(&path).await?)
    }

    fn prime_hash_cache(&self, cache: &Baseline) {
        *self.hash_cache.write().unwrap_or_else(|e| e.into_inner()) = cache.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::baseline::BaselineEntry;
    use crate::fs::InMemoryFs;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_list_files_hashes_and_sorts() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("b.md", b"bee").await.unwrap();
        fs.write("notes/a.md", b"ay").await.unwrap();

        let backend = FsBackend::new(Arc::clone(&fs), "mem");
        let records = backend.list_files().await.unwrap();

        let ids: Vec<_> = records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, vec!["b.md", "notes", "notes/a.md"]);

        let a = records.iter().find(|r| r.identity == "notes/a.md").unwrap();
        assert_eq!(a.content_hash, ContentHash::of(b"ay"));
        assert_eq!(a.size, 2);
        assert!(!a.is_directory);
        assert!(records.iter().find(|r| r.identity == "notes").unwrap().is_directory);
    }

    #[tokio::test]
    async fn test_prefix_maps_identities() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("bucket/vault/a.md", b"x").await.unwrap();
        fs.write("elsewhere.md", b"y").await.unwrap();

        let backend = FsBackend::new(Arc::clone(&fs), "mem").with_prefix("bucket/vault/");
        let records = backend.list_files().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "a.md");
        assert_eq!(records[0].remote_path, "bucket/vault/a.md");

        backend.write_file("b.md", b"z").await.unwrap();
        assert_eq!(fs.read("bucket/vault/b.md").await.unwrap(), b"z");
        assert_eq!(backend.read_file("a.md").await.unwrap(), b"x");

        backend.delete_file("a.md").await.unwrap();
        assert!(!fs.exists("bucket/vault/a.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_prefix_is_uninitialized() {
        let backend = FsBackend::new(InMemoryFs::new(), "mem").with_prefix("new-bucket");
        assert!(matches!(
            backend.list_files().await,
            Err(BackendError::Uninitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_ignored_names_are_skipped() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write(".bisync/backup.local.baseline.json", b"{}").await.unwrap();
        fs.write("a.md", b"x").await.unwrap();

        let backend = FsBackend::new(Arc::clone(&fs), "mem").with_ignored([".bisync"]);
        let records = backend.list_files().await.unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].identity, "a.md");
    }

    #[tokio::test]
    async fn test_rejects_traversal_identities() {
        let backend = FsBackend::new(InMemoryFs::new(), "mem");
        assert!(matches!(
            backend.write_file("../escape.md", b"x").await,
            Err(BackendError::InvalidIdentity(_))
        ));
    }

    #[tokio::test]
    async fn test_read_missing_file_is_not_found() {
        let backend = FsBackend::new(InMemoryFs::new(), "mem");
        assert!(matches!(
            backend.read_file("ghost.md").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_hash_cache_reused_when_mtime_matches() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("a.md", b"actual").await.unwrap();
        fs.set_mtime("a.md", 5_000);

        let backend = FsBackend::new(Arc::clone(&fs), "mem");
        let stale = ContentHash::from_hex("cached");
        let mut cache = Baseline::new();
        cache.insert(
            "a.md".into(),
            BaselineEntry {
                content_hash: stale.clone(),
                synced_at: millis_to_datetime(5_000),
                size: Some(6),
            },
        );
        backend.prime_hash_cache(&cache);

        // mtime matches: cached hash trusted without reading
        let records = backend.list_files().await.unwrap();
        assert_eq!(records[0].content_hash, stale);

        // mtime moved: file is re-hashed
        fs.set_mtime("a.md", 6_000);
        let records = backend.list_files().await.unwrap();
        assert_eq!(records[0].content_hash, ContentHash::of(b"actual"));
    }

    #[tokio::test]
    async fn test_hash_cache_ignored_when_size_differs() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("a.md", b"rewritten in the same tick").await.unwrap();
        fs.set_mtime("a.md", 5_000);

        let backend = FsBackend::new(Arc::clone(&fs), "mem");
        let mut cache = Baseline::new();
        for (identity, size) in [("a.md", Some(6)), ("b.md", None)] {
            cache.insert(
                identity.into(),
                BaselineEntry {
                    content_hash: ContentHash::from_hex("cached"),
                    synced_at: millis_to_datetime(5_000),
                    size,
                },
            );
        }
        fs.write("b.md", b"no size recorded").await.unwrap();
        fs.set_mtime("b.md", 5_000);
        backend.prime_hash_cache(&cache);

        let records = backend.list_files().await.unwrap();
        assert_eq!(
            records[0].content_hash,
            ContentHash::of(b"rewritten in the same tick")
        );
        assert_eq!(records[1].content_hash, ContentHash::of(b"no size recorded"));
    }

    #[tokio::test]
    async fn test_concurrency_setting_does_not_change_result() {
        let fs = Arc::new(InMemoryFs::new());
        for i in 0..20 {
            fs.write(&format!("dir/{}.md", i), format!("{}", i).as_bytes())
                .await
                .unwrap();
        }

        let serial = FsBackend::new(Arc::clone(&fs), "mem").with_hash_concurrency(1);
        let parallel = FsBackend::new(Arc::clone(&fs), "mem").with_hash_concurrency(16);

        assert_eq!(
            serial.list_files().await.unwrap(),
            parallel.list_files().await.unwrap()
        );
    }
}
