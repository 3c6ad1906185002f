//! Native filesystem implementation using tokio::fs.

use async_trait::async_trait;
use bisync_core::fs::{FileEntry, FileStat, FileSystem, FsError, Result};
use std::io;
use std::path::PathBuf;
use tokio::fs;

/// A directory on disk, addressed with `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct NativeFs {
    base_path: PathBuf,
}

impl NativeFs {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    pub fn base_path(&self) -> &PathBuf {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }
}

fn map_err(path: &str, e: io::Error) -> FsError {
    match e.kind() {
        io::ErrorKind::NotFound => FsError::NotFound(path.to_string()),
        io::ErrorKind::AlreadyExists => FsError::AlreadyExists(path.to_string()),
        _ => FsError::Io(format!("{}: {}", path, e)),
    }
}

#[async_trait]
impl FileSystem for NativeFs {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        let full_path = self.full_path(path);
        if full_path.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }
        fs::read(&full_path).await.map_err(|e| map_err(path, e))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);
        if full_path.is_dir() {
            return Err(FsError::IsDirectory(path.to_string()));
        }

        // Create parent directories if needed
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_err(path, e))?;
        }

        fs::write(&full_path, content)
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn list(&self, path: &str) -> Result<Vec<FileEntry>> {
        let full_path = self.full_path(path);
        let mut entries = Vec::new();

        let mut dir = fs::read_dir(&full_path)
            .await
            .map_err(|e| map_err(path, e))?;

        while let Some(entry) = dir.next_entry().await.map_err(|e| map_err(path, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            let metadata = entry.metadata().await.map_err(|e| map_err(path, e))?;

            entries.push(FileEntry {
                name,
                is_dir: metadata.is_dir(),
            });
        }

        Ok(entries)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| map_err(path, e))?;

        if metadata.is_dir() {
            fs::remove_dir(&full_path)
                .await
                .map_err(|e| map_err(path, e))
        } else {
            fs::remove_file(&full_path)
                .await
                .map_err(|e| map_err(path, e))
        }
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        fs::try_exists(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn stat(&self, path: &str) -> Result<FileStat> {
        let full_path = self.full_path(path);
        let metadata = fs::metadata(&full_path)
            .await
            .map_err(|e| map_err(path, e))?;

        let mtime_millis = metadata
            .modified()
            .map(|t| {
                t.duration_since(std::time::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0)
            })
            .unwrap_or(0);

        Ok(FileStat {
            mtime_millis,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
        })
    }

    async fn mkdir(&self, path: &str) -> Result<()> {
        fs::create_dir_all(self.full_path(path))
            .await
            .map_err(|e| map_err(path, e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<()> {
        let target = self.full_path(to);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| map_err(to, e))?;
        }
        fs::rename(self.full_path(from), &target)
            .await
            .map_err(|e| map_err(from, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_creates_parents_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        fs.write("notes/deep/a.md", b"hello").await.unwrap();

        assert_eq!(fs.read("notes/deep/a.md").await.unwrap(), b"hello");
        assert!(fs.stat("notes").await.unwrap().is_dir);
        assert_eq!(fs.stat("notes/deep/a.md").await.unwrap().size, 5);
    }

    #[tokio::test]
    async fn test_missing_paths_map_to_not_found() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());

        assert!(matches!(fs.read("nope.md").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.delete("nope.md").await, Err(FsError::NotFound(_))));
        assert!(matches!(fs.list("nope").await, Err(FsError::NotFound(_))));
        assert!(!fs.exists("nope.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_replaces_target() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());
        fs.write("a.tmp", b"new").await.unwrap();
        fs.write("a.json", b"old").await.unwrap();

        fs.rename("a.tmp", "a.json").await.unwrap();

        assert_eq!(fs.read("a.json").await.unwrap(), b"new");
        assert!(!fs.exists("a.tmp").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_reports_directories() {
        let dir = TempDir::new().unwrap();
        let fs = NativeFs::new(dir.path().to_path_buf());
        fs.write("a.md", b"a").await.unwrap();
        fs.mkdir("sub").await.unwrap();

        let mut entries = fs.list("").await.unwrap();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a.md");
        assert!(!entries[0].is_dir);
        assert!(entries[1].is_dir);
    }
}
