//! Test doubles shared by the executor and engine tests.

use crate::backend::{Backend, BackendError, Result};
use crate::baseline::Baseline;
use crate::record::FileRecord;

use async_trait::async_trait;
use std::collections::HashSet;

/// Delegates to `inner` but fails reads, writes and deletes of chosen identities.
pub struct FailingBackend<B: Backend> {
    inner: B,
    fail_on: HashSet<String>,
}

impl<B: Backend> FailingBackend<B> {
    pub fn new<I, S>(inner: B, fail_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner,
            fail_on: fail_on.into_iter().map(Into::into).collect(),
        }
    }

    fn check(&self, identity: &str) -> Result<()> {
        if self.fail_on.contains(identity) {
            return Err(BackendError::Io(format!("injected failure for {}", identity)));
        }
        Ok(())
    }
}

#[async_trait]
impl<B: Backend> Backend for FailingBackend<B> {
    fn describe(&self) -> String {
        format!("failing({})", self.inner.describe())
    }

    async fn list_files(&self) -> Result<Vec<FileRecord>> {
        self.inner.list_files().await
    }

    async fn read_file(&self, identity: &str) -> Result<Vec<u8>> {
        self.check(identity)?;
        self.inner.read_file(identity).await
    }

    async fn write_file(&self, identity: &str, content: &[u8]) -> Result<()> {
        self.check(identity)?;
        self.inner.write_file(identity, content).await
    }

    async fn delete_file(&self, identity: &str) -> Result<()> {
        self.check(identity)?;
        self.inner.delete_file(identity).await
    }

    fn prime_hash_cache(&self, cache: &Baseline) {
        self.inner.prime_hash_cache(cache);
    }
}
