//! File records observed on either side of a sync, and their content hashes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Identities longer than this are rejected (filesystem safety).
const MAX_IDENTITY_LEN: usize = 1024;

/// Hex-encoded SHA-256 digest of a file's raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Compute hash from content bytes.
    pub fn of(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// Wrap an already computed digest (e.g. one reported by a remote store).
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory records carry the empty hash.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One observed file (or directory) from a local or remote listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Stable logical path used to match the file across sides.
    pub identity: String,
    /// Path relative to the local root.
    pub local_path: String,
    /// Key on the remote side (may carry a prefix the identity does not).
    pub remote_path: String,
    pub content_hash: ContentHash,
    pub size: u64,
    pub modified_at: DateTime<Utc>,
    pub is_directory: bool,
}

impl FileRecord {
    /// Build a file record whose local and remote paths equal its identity.
    pub fn file(
        identity: impl Into<String>,
        content_hash: ContentHash,
        size: u64,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let identity = identity.into();
        Self {
            local_path: identity.clone(),
            remote_path: identity.clone(),
            identity,
            content_hash,
            size,
            modified_at,
            is_directory: false,
        }
    }

    /// Build a directory record. Directories are listed but never transferred.
    pub fn directory(identity: impl Into<String>, modified_at: DateTime<Utc>) -> Self {
        let identity = identity.into();
        Self {
            local_path: identity.clone(),
            remote_path: identity.clone(),
            identity,
            content_hash: ContentHash::default(),
            size: 0,
            modified_at,
            is_directory: true,
        }
    }
}

/// Convert a millisecond timestamp into a UTC datetime, clamping garbage to the epoch.
pub fn millis_to_datetime(millis: u64) -> DateTime<Utc> {
    i64::try_from(millis)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid identity '{identity}': {reason}")]
pub struct InvalidIdentity {
    pub identity: String,
    pub reason: &'static str,
}

/// Validate an identity before it is turned into a path on any backend.
pub fn validate_identity(identity: &str) -> Result<(), InvalidIdentity> {
    let reject = |reason| {
        Err(InvalidIdentity {
            identity: identity.to_string(),
            reason,
        })
    };

    if identity.is_empty() {
        return reject("empty identity");
    }
    if identity.split('/').any(|segment| segment == "..") {
        return reject("path traversal");
    }
    if identity.split('/').any(str::is_empty) {
        return reject("empty path segment");
    }
    if identity.starts_with('/') {
        return reject("absolute path");
    }
    // Windows drive letter
    if identity.len() >= 2 && identity.chars().nth(1) == Some(':') {
        return reject("absolute path");
    }
    if identity.contains('\\') {
        return reject("backslash in path");
    }
    if identity.chars().any(|c| c.is_control()) {
        return reject("control character in path");
    }
    if identity.len() > MAX_IDENTITY_LEN {
        return reject("path too long");
    }
    Ok(())
}
