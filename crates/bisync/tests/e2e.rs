//! End-to-end tests for bisync.
//!
//! Drives full runs against real directories: a local root and one or two
//! folder endpoints, each in its own temporary directory.

use std::fs;
use std::path::Path;
use std::time::Duration;

use bisync::{App, Config};
use bisync_core::{ActionKind, ADDED_MARKER, REMOVED_MARKER, SyncError, SyncReport};
use tempfile::TempDir;

/// A local root plus one folder endpoint named "backup".
struct TestSetup {
    local: TempDir,
    remote: TempDir,
    config: Config,
}

impl TestSetup {
    fn new() -> Self {
        Self::with_prefix("")
    }

    fn with_prefix(prefix: &str) -> Self {
        let local = TempDir::new().unwrap();
        let remote = TempDir::new().unwrap();
        let text = format!(
            r#"{{
                "localRoot": "{}",
                "endpoints": [{{ "name": "backup", "kind": "folder", "path": "{}", "prefix": "{}" }}]
            }}"#,
            local.path().display(),
            remote.path().display(),
            prefix
        );
        let config = Config::from_json(&text, Path::new("/")).unwrap();
        Self {
            local,
            remote,
            config,
        }
    }

    fn app(&self) -> App {
        App::new(self.config.clone(), false)
    }

    async fn sync(&self) -> SyncReport {
        self.try_sync().await.expect("sync should succeed")
    }

    async fn try_sync(&self) -> Result<SyncReport, SyncError> {
        let mut results = self.app().sync(None).await.unwrap();
        assert_eq!(results.len(), 1);
        results.remove(0).1
    }

    fn write_local(&self, path: &str, content: &str) {
        write(self.local.path(), path, content);
    }

    fn write_remote(&self, path: &str, content: &str) {
        write(self.remote.path(), path, content);
    }

    fn read_local(&self, path: &str) -> String {
        fs::read_to_string(self.local.path().join(path)).unwrap()
    }

    fn read_remote(&self, path: &str) -> String {
        fs::read_to_string(self.remote.path().join(path)).unwrap()
    }
}

fn write(root: &Path, path: &str, content: &str) {
    let full = root.join(path);
    if let Some(parent) = full.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(full, content).unwrap();
}

/// Make sure later writes land on a different mtime than the last listing.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_first_sync_uploads_into_empty_folder() {
    let setup = TestSetup::new();
    setup.write_local("a.md", "alpha\n");
    setup.write_local("notes/b.md", "beta\n");

    let report = setup.sync().await;

    assert!(report.committed);
    assert_eq!(report.summary.count(ActionKind::Upload), 2);
    assert_eq!(setup.read_remote("a.md"), "alpha\n");
    assert_eq!(setup.read_remote("notes/b.md"), "beta\n");

    // State lives in the local root but is never synced
    assert!(setup.local.path().join(".bisync/backup.baseline.json").exists());
    assert!(setup.local.path().join(".bisync/backup.local.baseline.json").exists());
    assert!(!setup.remote.path().join(".bisync").exists());

    let again = setup.sync().await;
    assert!(again.summary.is_empty());
}

#[tokio::test]
async fn test_one_sided_edits_flow_both_ways() {
    let setup = TestSetup::new();
    setup.write_local("a.md", "a1\n");
    setup.write_local("b.md", "b1\n");
    setup.sync().await;
    settle().await;

    setup.write_local("a.md", "a2\n");
    setup.write_remote("b.md", "b2\n");
    setup.write_remote("c.md", "c1\n");

    let report = setup.sync().await;

    assert_eq!(report.summary.count(ActionKind::Upload), 1);
    assert_eq!(report.summary.count(ActionKind::Download), 2);
    assert_eq!(setup.read_remote("a.md"), "a2\n");
    assert_eq!(setup.read_local("b.md"), "b2\n");
    assert_eq!(setup.read_local("c.md"), "c1\n");
    assert!(setup.sync().await.summary.is_empty());
}

#[tokio::test]
async fn test_deletions_propagate() {
    let setup = TestSetup::new();
    setup.write_local("gone-local.md", "x\n");
    setup.write_local("gone-remote.md", "y\n");
    setup.write_local("keep.md", "z\n");
    setup.sync().await;

    fs::remove_file(setup.local.path().join("gone-local.md")).unwrap();
    fs::remove_file(setup.remote.path().join("gone-remote.md")).unwrap();

    let report = setup.sync().await;

    assert_eq!(report.summary.count(ActionKind::DeleteRemote), 1);
    assert_eq!(report.summary.count(ActionKind::DeleteLocal), 1);
    assert!(!setup.remote.path().join("gone-local.md").exists());
    assert!(!setup.local.path().join("gone-remote.md").exists());
    assert!(setup.remote.path().join("keep.md").exists());
}

#[tokio::test]
async fn test_local_edit_beats_remote_delete() {
    let setup = TestSetup::new();
    setup.write_local("a.md", "v1\n");
    setup.write_local("keep.md", "k\n");
    setup.sync().await;
    settle().await;

    setup.write_local("a.md", "v2\n");
    fs::remove_file(setup.remote.path().join("a.md")).unwrap();

    let report = setup.sync().await;

    assert_eq!(report.summary.count(ActionKind::Upload), 1);
    assert_eq!(setup.read_remote("a.md"), "v2\n");
}

#[tokio::test]
async fn test_conflict_is_merged_and_converges() {
    let setup = TestSetup::new();
    setup.write_local("doc.md", "line1\nline2\n");
    setup.sync().await;
    settle().await;

    setup.write_local("doc.md", "line1\nlocal\n");
    setup.write_remote("doc.md", "line1\nremote\n");

    let report = setup.sync().await;
    assert_eq!(report.summary.count(ActionKind::Merge), 1);

    let local = setup.read_local("doc.md");
    let remote = setup.read_remote("doc.md");
    assert_eq!(local, remote);
    assert_eq!(
        local,
        format!("line1\n{} local\n{} remote\n", REMOVED_MARKER, ADDED_MARKER)
    );

    assert!(setup.sync().await.summary.is_empty());
}

#[tokio::test]
async fn test_emptied_remote_is_repopulated() {
    let setup = TestSetup::new();
    setup.write_local("a.md", "a\n");
    setup.write_local("b.md", "b\n");
    setup.sync().await;

    fs::remove_file(setup.remote.path().join("a.md")).unwrap();
    fs::remove_file(setup.remote.path().join("b.md")).unwrap();

    let report = setup.sync().await;

    assert_eq!(report.summary.count(ActionKind::Upload), 2);
    assert_eq!(report.summary.count(ActionKind::DeleteLocal), 0);
    assert!(setup.local.path().join("a.md").exists());
    assert_eq!(setup.read_remote("b.md"), "b\n");
}

#[tokio::test]
async fn test_missing_local_root_fails_without_touching_remote() {
    let setup = TestSetup::new();
    setup.write_local("a.md", "a\n");
    setup.sync().await;

    let mut config = setup.config.clone();
    config.local_root = setup.local.path().join("does-not-exist");
    let mut results = App::new(config, false).sync(None).await.unwrap();

    assert!(matches!(
        results.remove(0).1,
        Err(SyncError::Listing { .. })
    ));
    assert!(setup.remote.path().join("a.md").exists());
}

#[tokio::test]
async fn test_plan_is_a_dry_run() {
    let setup = TestSetup::new();
    setup.write_local("a.md", "a\n");

    let app = App::new(setup.config.clone(), true);
    let mut results = app.sync(None).await.unwrap();
    let report = results.remove(0).1.unwrap();

    assert!(report.dry_run);
    assert!(!report.committed);
    assert_eq!(report.plan.len(), 1);
    assert_eq!(report.plan[0].kind, ActionKind::Upload);
    assert!(!setup.remote.path().join("a.md").exists());
    assert!(!setup.local.path().join(".bisync").exists());

    let json = serde_json::to_string(&report).unwrap();
    assert!(json.contains("\"kind\":\"UPLOAD\""));
}

#[tokio::test]
async fn test_status_reports_last_sync() {
    let setup = TestSetup::new();
    setup.write_local("a.md", "a\n");
    setup.write_local("b.md", "b\n");

    let before = setup.app().status().await.unwrap();
    assert_eq!(before[0].name, "backup");
    assert!(before[0].last_sync.is_none());
    assert_eq!(before[0].entries, 0);

    setup.sync().await;

    let after = setup.app().status().await.unwrap();
    assert!(after[0].last_sync.is_some());
    assert_eq!(after[0].entries, 2);
}

#[tokio::test]
async fn test_prefix_scopes_remote_storage() {
    let setup = TestSetup::with_prefix("vaults/main");
    setup.write_local("a.md", "a\n");
    setup.write_remote("unrelated.txt", "not ours\n");

    setup.sync().await;

    assert_eq!(setup.read_remote("vaults/main/a.md"), "a\n");
    assert!(!setup.local.path().join("unrelated.txt").exists());
}

#[tokio::test]
async fn test_unknown_endpoint_is_rejected() {
    let setup = TestSetup::new();
    let result = setup.app().sync(Some("nope")).await;
    assert!(result.is_err());
}

/// Config for a local root synced to two folder endpoints, "first" and "second".
fn two_endpoint_config(local: &Path, first: &Path, second: &Path) -> Config {
    let text = format!(
        r#"{{
            "localRoot": "{}",
            "endpoints": [
                {{ "name": "first", "kind": "folder", "path": "{}" }},
                {{ "name": "second", "kind": "folder", "path": "{}" }}
            ]
        }}"#,
        local.display(),
        first.display(),
        second.display()
    );
    Config::from_json(&text, Path::new("/")).unwrap()
}

async fn sync_all(config: &Config) -> Vec<SyncReport> {
    App::new(config.clone(), false)
        .sync(None)
        .await
        .unwrap()
        .into_iter()
        .map(|(name, result)| result.unwrap_or_else(|e| panic!("{} failed: {}", name, e)))
        .collect()
}

#[tokio::test]
async fn test_two_endpoints_converge() {
    let local = TempDir::new().unwrap();
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let config = two_endpoint_config(local.path(), first.path(), second.path());
    write(local.path(), "shared.md", "s\n");
    write(first.path(), "from-first.md", "f\n");

    sync_all(&config).await;

    // first's file reached local during the first pass, then second
    assert!(local.path().join("from-first.md").exists());
    assert!(second.path().join("from-first.md").exists());
    assert!(second.path().join("shared.md").exists());
    assert!(first.path().join("shared.md").exists());
}

#[tokio::test]
async fn test_edit_on_second_endpoint_merges_after_first_took_local_edit() {
    let local = TempDir::new().unwrap();
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    let config = two_endpoint_config(local.path(), first.path(), second.path());
    write(local.path(), "doc.md", "base\n");
    write(local.path(), "keep.md", "k\n");
    sync_all(&config).await;
    settle().await;

    write(local.path(), "doc.md", "base\nlocal\n");
    write(second.path(), "doc.md", "base\nsecond\n");

    let reports = sync_all(&config).await;
    assert_eq!(reports[0].summary.count(ActionKind::Upload), 1);
    assert_eq!(reports[1].summary.count(ActionKind::Merge), 1);
    assert_eq!(reports[1].summary.count(ActionKind::Download), 0);

    let expected = format!("base\n{} local\n{} second\n", REMOVED_MARKER, ADDED_MARKER);
    let read = |root: &Path| fs::read_to_string(root.join("doc.md")).unwrap();
    assert_eq!(read(local.path()), expected);
    assert_eq!(read(second.path()), expected);

    // One more pass carries the merge to the first endpoint
    sync_all(&config).await;
    assert_eq!(read(first.path()), expected);
    for report in sync_all(&config).await {
        assert!(report.summary.is_empty());
    }
}
