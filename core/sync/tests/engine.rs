//! End-to-end runs of the sync engine against the in-memory store.

use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use drivesync_archive::{ArchivePackager, ZipPackager};
use drivesync_common::{Error, Secret};
use drivesync_storage::MemoryStore;
use drivesync_sync::{SyncConfig, SyncEngine, SyncEvent};

const PASSWORD: &str = "correct horse";

struct Fixture {
    temp: TempDir,
    store: Arc<MemoryStore>,
    engine: SyncEngine<MemoryStore>,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let config = SyncConfig {
            staging_dir: Some(temp.path().join("staging")),
            ..Default::default()
        };
        let engine = SyncEngine::new(store.clone(), Arc::new(ZipPackager::new()), config).unwrap();
        Self {
            temp,
            store,
            engine,
        }
    }

    fn dir(&self, relative: &str) -> PathBuf {
        let path = self.temp.path().join(relative);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    /// Staging run directories still on disk.
    fn leftover_staging(&self) -> usize {
        match std::fs::read_dir(self.temp.path().join("staging")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    /// Pack `content` as an archive named `<name>.zip` and return its bytes.
    fn archive(&self, name: &str, content: &[u8], password: &str) -> Vec<u8> {
        let scratch = self.dir(&format!("scratch-{}", slug(name)));
        let source = scratch.join(name);
        std::fs::write(&source, content).unwrap();
        let archive = ZipPackager::new().pack(&source, &scratch, password).unwrap();
        std::fs::read(archive).unwrap()
    }
}

fn slug(name: &str) -> String {
    name.replace(['.', '/'], "_")
}

fn secret() -> Secret {
    Secret::new(PASSWORD)
}

fn at(secs: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
}

fn write(path: &Path, content: &[u8], secs: i64) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).unwrap();
}

fn mtime(path: &Path) -> i64 {
    FileTime::from_last_modification_time(&std::fs::metadata(path).unwrap()).unix_seconds()
}

#[tokio::test]
async fn upload_mirrors_tree_and_is_idempotent() {
    let fx = Fixture::new();
    fx.store.add_folder("root", "Backups");

    let data = fx.dir("data");
    write(&data.join("a.txt"), b"alpha", 1_000);
    write(&data.join("sub/b.txt"), b"beta", 1_000);
    std::fs::create_dir_all(data.join("empty")).unwrap();

    let report = fx.engine.sync_up("/Backups", &data, &secret()).await.unwrap();
    assert_eq!(report.transferred, 2);
    assert_eq!(report.deleted, 0);

    assert!(fx.store.lookup("Backups/data/a.txt.zip").is_some());
    assert!(fx.store.lookup("Backups/data/sub/b.txt.zip").is_some());
    // Folders are only created to hold uploads.
    assert!(fx.store.lookup("Backups/data/empty").is_none());
    assert_eq!(fx.leftover_staging(), 0);
    assert!(!data.join("a.txt.zip").exists());

    let again = fx.engine.sync_up("/Backups", &data, &secret()).await.unwrap();
    assert!(again.is_noop());
    assert_eq!(fx.store.upload_count(), 2);
}

#[tokio::test]
async fn upload_replaces_stale_and_removes_orphans() {
    let fx = Fixture::new();
    let backups = fx.store.add_folder("root", "Backups");
    let remote = fx.store.add_folder(&backups, "data");
    let stale = fx.store.add_file(&remote, "a.txt.zip", vec![0; 8], at(1_000));
    fx.store.add_file(&remote, "old.txt.zip", vec![0; 8], at(1_000));
    let gone = fx.store.add_folder(&remote, "gone");
    fx.store.add_file(&gone, "x.zip", vec![0; 8], at(1_000));
    fx.store.add_file(&remote, "fresh.txt.zip", vec![0; 8], at(5_000));

    let data = fx.dir("data");
    write(&data.join("a.txt"), b"newer", 2_000);
    write(&data.join("fresh.txt"), b"same", 5_000);

    let report = fx.engine.sync_up("/Backups", &data, &secret()).await.unwrap();
    assert_eq!(report.transferred, 1);
    assert_eq!(report.deleted, 3);

    assert!(fx.store.entry(&stale).is_none());
    assert!(fx.store.lookup("Backups/data/old.txt.zip").is_none());
    assert!(fx.store.lookup("Backups/data/gone").is_none());
    let replaced = fx.store.lookup("Backups/data/a.txt.zip").unwrap();
    assert_ne!(replaced.id, stale);
    // Backups, data, a.txt.zip, fresh.txt.zip
    assert_eq!(fx.store.len(), 4);
}

#[tokio::test]
async fn upload_argument_checks() {
    let fx = Fixture::new();
    let data = fx.dir("data");

    let missing_remote = fx.engine.sync_up("/Nowhere", &data, &secret()).await;
    assert!(matches!(missing_remote, Err(Error::PathNotFound(_))));

    let missing_local = fx
        .engine
        .sync_up("/", fx.temp.path().join("absent"), &secret())
        .await;
    assert!(matches!(missing_local, Err(Error::InvalidArgument(_))));

    let no_password = fx.engine.sync_up("/", &data, &Secret::new("")).await;
    assert!(matches!(no_password, Err(Error::InvalidArgument(_))));

    assert!(fx.store.is_empty());
}

#[tokio::test]
async fn failed_upload_keeps_earlier_work_and_cleans_staging() {
    let fx = Fixture::new();
    let data = fx.dir("data");
    write(&data.join("a.txt"), b"one", 1_000);
    write(&data.join("b.txt"), b"two", 1_000);
    write(&data.join("c.txt"), b"three", 1_000);
    fx.store.fail_uploads_named("b.txt.zip");

    let result = fx.engine.sync_up("/", &data, &secret()).await;
    assert!(matches!(result, Err(Error::TransferFailed(_))));

    assert!(fx.store.lookup("data/a.txt.zip").is_some());
    assert!(fx.store.lookup("data/b.txt.zip").is_none());
    assert!(fx.store.lookup("data/c.txt.zip").is_none());
    assert_eq!(fx.leftover_staging(), 0);
}

#[tokio::test]
async fn progress_is_announced_then_monotonic() {
    let fx = Fixture::new();
    let data = fx.dir("data");
    for (i, name) in ["a", "b", "c"].iter().enumerate() {
        write(&data.join(name), &vec![i as u8; 20_000 * (i + 1)], 1_000);
    }
    let mut rx = fx.engine.subscribe();

    let report = fx.engine.sync_up("/", &data, &secret()).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert_eq!(events.first(), Some(&SyncEvent::TotalSize(report.bytes)));

    let progress: Vec<u64> = events[1..]
        .iter()
        .map(|event| match event {
            SyncEvent::Progress(bytes) => *bytes,
            SyncEvent::TotalSize(_) => panic!("total announced twice"),
        })
        .collect();
    assert!(!progress.is_empty());
    assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(progress.last(), Some(&report.bytes));
}

#[tokio::test]
async fn round_trip_then_no_changes() {
    let fx = Fixture::new();
    let data = fx.dir("data");
    write(&data.join("a.txt"), b"alpha", 1_000);
    write(&data.join("sub/b.txt"), b"beta", 1_000);
    fx.engine.sync_up("/", &data, &secret()).await.unwrap();

    let restore = fx.dir("restore");
    let report = fx.engine.sync_down(&restore, "/data", &secret()).await.unwrap();
    assert_eq!(report.transferred, 2);

    assert_eq!(std::fs::read(restore.join("data/a.txt")).unwrap(), b"alpha");
    assert_eq!(std::fs::read(restore.join("data/sub/b.txt")).unwrap(), b"beta");
    assert_eq!(fx.leftover_staging(), 0);

    assert!(!fx.engine.check_for_remote_changes(&restore, "/data").await.unwrap());
    let again = fx.engine.sync_down(&restore, "/data", &secret()).await.unwrap();
    assert!(again.is_noop());

    let remote = fx.store.lookup("data/a.txt.zip").unwrap();
    fx.store.set_modified(&remote.id, Utc::now() + chrono::Duration::hours(1));
    assert!(fx.engine.check_for_remote_changes(&restore, "/data").await.unwrap());
}

#[tokio::test]
async fn download_stamps_remote_time_and_ignores_non_archives() {
    let fx = Fixture::new();
    let bytes = fx.archive("x.txt", b"payload", PASSWORD);
    fx.store.add_file("root", "x.txt.zip", bytes, at(1_700_000_000));
    fx.store.add_file("root", "notes.txt", b"plain".to_vec(), at(1_700_000_000));

    // The store root maps onto the local root itself.
    let local = fx.dir("mirror");
    let report = fx.engine.sync_down(&local, "/", &secret()).await.unwrap();
    assert_eq!(report.transferred, 1);

    assert_eq!(std::fs::read(local.join("x.txt")).unwrap(), b"payload");
    assert_eq!(mtime(&local.join("x.txt")), 1_700_000_000);
    assert!(!local.join("notes.txt").exists());
    assert!(!local.join("notes").exists());
}

#[tokio::test]
async fn download_accepts_unprotected_archives() {
    let fx = Fixture::new();
    let scratch = fx.dir("scratch");
    let archive = scratch.join("plain.txt.zip");
    {
        use std::io::Write;
        let file = std::fs::File::create(&archive).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file("plain.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"open").unwrap();
        zip.finish().unwrap();
    }
    let remote = fx.store.add_folder("root", "r");
    fx.store
        .add_file(&remote, "plain.txt.zip", std::fs::read(&archive).unwrap(), at(1_000));

    let local = fx.dir("local");
    fx.engine.sync_down(&local, "/r", &secret()).await.unwrap();
    assert_eq!(std::fs::read(local.join("r/plain.txt")).unwrap(), b"open");
}

#[tokio::test]
async fn download_with_wrong_password_is_corrupt() {
    let fx = Fixture::new();
    let bytes = fx.archive("s.txt", b"secret", "another password");
    let remote = fx.store.add_folder("root", "r");
    fx.store.add_file(&remote, "s.txt.zip", bytes, at(1_000));

    let local = fx.dir("local");
    let result = fx.engine.sync_down(&local, "/r", &secret()).await;
    assert!(matches!(result, Err(Error::ArchiveCorrupt(_))));
    assert!(!local.join("r/s.txt").exists());
    assert_eq!(fx.leftover_staging(), 0);
}

#[tokio::test]
async fn failed_download_stops_the_run() {
    let fx = Fixture::new();
    let remote = fx.store.add_folder("root", "r");
    for name in ["a.txt", "b.txt", "c.txt"] {
        let bytes = fx.archive(name, &vec![7u8; 10_000], PASSWORD);
        fx.store
            .add_file(&remote, &format!("{}.zip", name), bytes, at(1_000));
    }
    fx.store.fail_downloads_named("b.txt.zip");

    let local = fx.dir("local");
    let result = fx.engine.sync_down(&local, "/r", &secret()).await;
    assert!(matches!(result, Err(Error::TransferFailed(_))));

    assert!(local.join("r/a.txt").exists());
    assert!(!local.join("r/b.txt").exists());
    assert!(!local.join("r/c.txt").exists());
    assert_eq!(fx.leftover_staging(), 0);
}

#[tokio::test]
async fn download_deletes_orphans_but_never_excluded_paths() {
    let mut fx = Fixture::new();
    let remote = fx.store.add_folder("root", "r");
    let bytes = fx.archive("a.txt", b"remote a", PASSWORD);
    fx.store.add_file(&remote, "a.txt.zip", bytes, at(1_000));
    let bytes = fx.archive("guarded.txt", b"remote version", PASSWORD);
    fx.store.add_file(&remote, "guarded.txt.zip", bytes, at(9_000));

    let local = fx.dir("local/r");
    write(&local.join("extra.txt"), b"orphan", 1_000);
    write(&local.join("guarded.txt"), b"local version", 1_000);
    write(&local.join("keep/secret.txt"), b"keep me", 1_000);
    write(&local.join("keep/other.txt"), b"orphan", 1_000);
    write(&local.join("drop/nested.txt"), b"orphan", 1_000);

    fx.engine.add_excluded(local.join("guarded.txt"));
    fx.engine.add_excluded(local.join("keep/secret.txt"));

    let report = fx
        .engine
        .sync_down(fx.temp.path().join("local"), "/r", &secret())
        .await
        .unwrap();
    assert_eq!(report.transferred, 1);
    // extra.txt, keep/other.txt, drop/
    assert_eq!(report.deleted, 3);

    assert_eq!(std::fs::read(local.join("a.txt")).unwrap(), b"remote a");
    assert_eq!(std::fs::read(local.join("guarded.txt")).unwrap(), b"local version");
    assert_eq!(std::fs::read(local.join("keep/secret.txt")).unwrap(), b"keep me");
    assert!(!local.join("extra.txt").exists());
    assert!(!local.join("keep/other.txt").exists());
    assert!(!local.join("drop").exists());

    assert!(!fx
        .engine
        .check_for_remote_changes(fx.temp.path().join("local"), "/r")
        .await
        .unwrap());
}

#[tokio::test]
async fn explicit_paths_are_always_resent() {
    let mut fx = Fixture::new();
    let data = fx.dir("data");
    write(&data.join("a.txt"), b"alpha", 1_000);
    write(&data.join("b.txt"), b"beta", 1_000);
    write(&data.join("skip.txt"), b"skip", 1_000);

    let remote = fx.store.add_folder("root", "data");
    let current = fx.store.add_file(&remote, "a.txt.zip", vec![1], at(5_000));

    fx.engine.add_excluded(data.join("skip.txt"));
    let paths = vec![
        data.join("a.txt"),
        data.join("skip.txt"),
        fx.temp.path().join("elsewhere.txt"),
    ];
    let report = fx
        .engine
        .sync_up_paths("/", &data, &paths, &secret())
        .await
        .unwrap();

    assert_eq!(report.transferred, 1);
    assert_eq!(report.deleted, 1);
    let resent = fx.store.lookup("data/a.txt.zip").unwrap();
    assert_ne!(resent.id, current);
    assert!(fx.store.lookup("data/b.txt.zip").is_none());
    assert!(fx.store.lookup("data/skip.txt.zip").is_none());
}

#[tokio::test]
async fn missing_remote_root_on_download() {
    let fx = Fixture::new();
    let local = fx.dir("local");

    let result = fx.engine.sync_down(&local, "/absent", &secret()).await;
    assert!(matches!(result, Err(Error::PathNotFound(_))));
    let result = fx.engine.check_for_remote_changes(&local, "/absent").await;
    assert!(matches!(result, Err(Error::PathNotFound(_))));
}

#[tokio::test]
async fn cancelled_engine_refuses_to_run() {
    let fx = Fixture::new();
    fx.store.add_folder("root", "r");
    let local = fx.dir("local");

    fx.engine.cancellation_token().cancel();
    let result = fx.engine.sync_down(&local, "/r", &secret()).await;
    assert!(matches!(result, Err(Error::Cancelled(_))));
    assert_eq!(fx.store.download_count(), 0);
}

/// Every path below `dir`, sorted, leaving out anything under `skip`.
fn snapshot(dir: &Path, skip: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir).unwrap() {
            let path = entry.unwrap().path();
            if skip.iter().any(|s| path.starts_with(s)) {
                continue;
            }
            if path.is_dir() {
                pending.push(path.clone());
            }
            found.push(path);
        }
    }
    found.sort();
    found
}

#[tokio::test]
async fn parent_named_remote_folder_stays_inside_destination() {
    let fx = Fixture::new();
    let remote = fx.store.add_folder("root", "r");
    fx.store.add_folder(&remote, "..");
    let bytes = fx.archive("ok.txt", b"ok", PASSWORD);
    fx.store.add_file(&remote, "ok.txt.zip", bytes, at(1_000));

    let base = fx.dir("base");
    write(&base.join("victim.txt"), b"not mine", 1_000);
    write(&base.join("r/stale.txt"), b"orphan", 1_000);

    let report = fx.engine.sync_down(&base, "/r", &secret()).await.unwrap();
    assert_eq!(report.transferred, 1);
    assert_eq!(report.deleted, 1);

    assert_eq!(std::fs::read(base.join("victim.txt")).unwrap(), b"not mine");
    assert_eq!(std::fs::read(base.join("r/ok.txt")).unwrap(), b"ok");
    assert!(!base.join("r/stale.txt").exists());
}

#[tokio::test]
async fn absolute_named_remote_folder_stays_inside_destination() {
    let fx = Fixture::new();
    let outside = fx.dir("outside");
    write(&outside.join("victim.txt"), b"not mine", 1_000);

    let remote = fx.store.add_folder("root", "r");
    fx.store
        .add_folder(&remote, &outside.display().to_string());

    let base = fx.dir("base");
    std::fs::create_dir_all(base.join("r")).unwrap();

    let report = fx.engine.sync_down(&base, "/r", &secret()).await.unwrap();
    assert!(report.is_noop());
    assert_eq!(std::fs::read(outside.join("victim.txt")).unwrap(), b"not mine");
    assert!(!fx.engine.check_for_remote_changes(&base, "/r").await.unwrap());
}

#[tokio::test]
async fn slash_named_archive_is_skipped_and_runs_stay_idempotent() {
    let fx = Fixture::new();
    let remote = fx.store.add_folder("root", "r");
    fx.store.add_file(&remote, "a/b.zip", vec![0; 16], at(1_000));
    let bytes = fx.archive("ok.txt", b"ok", PASSWORD);
    fx.store.add_file(&remote, "ok.txt.zip", bytes, at(1_000));

    let base = fx.dir("base");
    let report = fx.engine.sync_down(&base, "/r", &secret()).await.unwrap();
    assert_eq!(report.transferred, 1);
    assert!(base.join("r/ok.txt").exists());
    assert!(!base.join("r/a").exists());

    assert!(!fx.engine.check_for_remote_changes(&base, "/r").await.unwrap());
    let again = fx.engine.sync_down(&base, "/r", &secret()).await.unwrap();
    assert!(again.is_noop());
}

#[tokio::test]
async fn download_never_touches_anything_outside_destination() {
    let fx = Fixture::new();
    let outside = fx.dir("outside");
    write(&outside.join("victim.txt"), b"not mine", 1_000);

    let remote = fx.store.add_folder("root", "r");
    fx.store.add_folder(&remote, "..");
    fx.store.add_folder(&remote, ".");
    fx.store
        .add_folder(&remote, &outside.display().to_string());
    let escape = fx.archive("escape.txt", b"escaped", PASSWORD);
    fx.store.add_file(&remote, "../escape.txt.zip", escape, at(1_000));
    let sub = fx.store.add_folder(&remote, "sub");
    let inner = fx.archive("inner.txt", b"inner", PASSWORD);
    fx.store.add_file(&sub, "inner.txt.zip", inner, at(1_000));

    let base = fx.dir("base");
    write(&base.join("victim.txt"), b"not mine", 1_000);
    let dest = base.join("r");
    let skip = [dest.clone(), fx.temp.path().join("staging")];
    let before = snapshot(fx.temp.path(), &skip);

    fx.engine.sync_down(&base, "/r", &secret()).await.unwrap();

    assert_eq!(snapshot(fx.temp.path(), &skip), before);
    assert_eq!(snapshot(&dest, &[]), [dest.join("sub"), dest.join("sub/inner.txt")]);
}

#[tokio::test]
async fn archive_does_not_replace_folder_holding_excluded_paths() {
    let mut fx = Fixture::new();
    let remote = fx.store.add_folder("root", "r");
    let bytes = fx.archive("photos", b"flat file", PASSWORD);
    fx.store.add_file(&remote, "photos.zip", bytes, at(9_000));

    let local = fx.dir("local/r");
    write(&local.join("photos/keep.jpg"), b"keep", 1_000);
    write(&local.join("photos/other.jpg"), b"orphan", 1_000);
    fx.engine.add_excluded(local.join("photos/keep.jpg"));

    let report = fx
        .engine
        .sync_down(fx.temp.path().join("local"), "/r", &secret())
        .await
        .unwrap();
    assert_eq!(report.transferred, 0);
    assert_eq!(report.deleted, 1);

    assert!(local.join("photos").is_dir());
    assert_eq!(std::fs::read(local.join("photos/keep.jpg")).unwrap(), b"keep");
    assert!(!local.join("photos/other.jpg").exists());
    assert!(!fx
        .engine
        .check_for_remote_changes(fx.temp.path().join("local"), "/r")
        .await
        .unwrap());
}
