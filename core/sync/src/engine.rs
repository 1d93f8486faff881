//! Core sync engine that orchestrates synchronization runs.

use serde::Serialize;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use drivesync_archive::ArchivePackager;
use drivesync_common::{Error, RemotePath, Result, Secret};
use drivesync_storage::RemoteStore;

use crate::config::SyncConfig;
use crate::detect::ChangeDetector;
use crate::diff::{DownloadPlan, OrphanSet, RemoteTarget, TreeDiffer, UploadPlan};
use crate::exclusions::{normalize, ExclusionSet};
use crate::local;
use crate::progress::{ProgressHub, SyncEvent};
use crate::queue::TransferQueue;
use crate::remote::RemoteTree;
use crate::retry::RetryExecutor;
use crate::staging::StagingArea;
use crate::transfer::{DownloadTransport, StagedArchive, UploadItem, UploadTransport};

/// Summary of one synchronization run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Items uploaded or downloaded.
    pub transferred: usize,
    /// Orphans deleted on the destination side.
    pub deleted: usize,
    /// Bytes moved.
    pub bytes: u64,
    /// Wall-clock time of the run.
    pub duration: Duration,
}

impl SyncReport {
    /// Check if the run changed nothing.
    pub fn is_noop(&self) -> bool {
        self.transferred == 0 && self.deleted == 0
    }
}

/// Directional synchronizer between a local folder tree and a remote store.
///
/// Each run diffs the trees from scratch, deletes orphans on the
/// destination side, then transfers what is missing or stale. Payloads
/// travel as password-protected single-file archives.
pub struct SyncEngine<S: RemoteStore + ?Sized> {
    store: Arc<S>,
    packager: Arc<dyn ArchivePackager>,
    config: SyncConfig,
    exclusions: ExclusionSet,
    hub: Arc<ProgressHub>,
    retry: RetryExecutor,
    cancel: CancellationToken,
}

impl<S: RemoteStore + ?Sized> SyncEngine<S> {
    /// Create a new sync engine.
    ///
    /// # Errors
    /// - `InvalidArgument` if the configuration is out of range
    pub fn new(
        store: Arc<S>,
        packager: Arc<dyn ArchivePackager>,
        config: SyncConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            retry: RetryExecutor::new(config.retry_config()),
            store,
            packager,
            config,
            exclusions: ExclusionSet::new(),
            hub: Arc::new(ProgressHub::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Receive total-size and progress events for subsequent runs.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
        self.hub.subscribe()
    }

    /// Token that interrupts a run at its next remote listing.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Replace a fired cancellation token so new runs can start.
    pub fn reset_cancellation(&mut self) {
        self.cancel = CancellationToken::new();
    }

    /// Shield a local path from deletion.
    pub fn add_excluded(&mut self, path: impl AsRef<Path>) -> bool {
        self.exclusions.add(path)
    }

    /// Stop shielding a local path.
    pub fn remove_excluded(&mut self, path: impl AsRef<Path>) -> bool {
        self.exclusions.remove(path)
    }

    /// Stop shielding every path.
    pub fn clear_excluded(&mut self) {
        self.exclusions.clear();
    }

    /// Currently shielded paths.
    pub fn excluded(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// Remove staging directories abandoned by interrupted runs.
    pub async fn purge_stale_staging(&mut self) -> Result<usize> {
        let cleaned = StagingArea::purge_stale(self.config.staging_root()).await?;
        if cleaned > 0 {
            info!(cleaned, "Purged stale staging directories");
        }
        Ok(cleaned)
    }

    /// Mirror `local_root` into `<remote_root>/<name of local_root>`.
    ///
    /// # Errors
    /// - `InvalidArgument` for empty arguments or a missing local folder
    /// - `PathNotFound` if `remote_root` does not exist
    /// - `TransferFailed` if an upload fails; earlier deletions and uploads stay
    ///
    /// Dropping the future abandons the run; its staging directory goes with it.
    pub async fn sync_up(
        &self,
        remote_root: &str,
        local_root: impl AsRef<Path>,
        password: &Secret,
    ) -> Result<SyncReport> {
        self.upload_run(remote_root, local_root.as_ref(), None, password)
            .await
    }

    /// Upload only `paths` below `local_root`.
    ///
    /// Listed folders are synced recursively; listed files are always
    /// re-uploaded, replacing any archive of the same name.
    pub async fn sync_up_paths(
        &self,
        remote_root: &str,
        local_root: impl AsRef<Path>,
        paths: &[PathBuf],
        password: &Secret,
    ) -> Result<SyncReport> {
        self.upload_run(remote_root, local_root.as_ref(), Some(paths), password)
            .await
    }

    /// Mirror `remote_root` into `<local_root>/<name of remote_root>`.
    ///
    /// # Errors
    /// - `InvalidArgument` for empty arguments
    /// - `PathNotFound` if `remote_root` does not exist
    /// - `TransferFailed` or `ArchiveCorrupt` if a download fails
    ///
    /// Remote names that cannot be a single local path component are
    /// skipped, so nothing outside the destination folder is ever written
    /// or deleted. Dropping the future abandons the run; its staging
    /// directory goes with it.
    pub async fn sync_down(
        &self,
        local_root: impl AsRef<Path>,
        remote_root: &str,
        password: &Secret,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        validate_path(local_root.as_ref(), "Local root")?;
        validate_text(remote_root, "Remote root")?;
        validate_password(password)?;

        let remote_path = RemotePath::parse(remote_root)?;
        let local_dest = download_target(&normalize(local_root.as_ref()), &remote_path);

        let tree = self.tree();
        let root_id = tree
            .resolve(&remote_path)
            .await?
            .ok_or_else(|| Error::PathNotFound(remote_root.to_string()))?;

        info!(remote = %remote_path, local = %local_dest.display(), "Starting download sync");
        let staging = StagingArea::create(self.config.staging_root()).await?;
        let result = self
            .download_phases(&tree, &staging, root_id, &local_dest, password)
            .await;
        staging.discard().await;

        self.finish("Download", result, started)
    }

    /// Check whether `sync_down` with the same roots would change anything.
    ///
    /// # Errors
    /// - `InvalidArgument` for empty arguments
    /// - `PathNotFound` if `remote_root` does not exist
    pub async fn check_for_remote_changes(
        &self,
        local_root: impl AsRef<Path>,
        remote_root: &str,
    ) -> Result<bool> {
        validate_path(local_root.as_ref(), "Local root")?;
        validate_text(remote_root, "Remote root")?;

        let remote_path = RemotePath::parse(remote_root)?;
        let local_dest = download_target(&normalize(local_root.as_ref()), &remote_path);

        let tree = self.tree();
        let root_id = tree
            .resolve(&remote_path)
            .await?
            .ok_or_else(|| Error::PathNotFound(remote_root.to_string()))?;

        let changed = ChangeDetector::new(&tree, &self.exclusions)
            .has_changes(root_id, local_dest)
            .await?;
        debug!(remote = %remote_path, changed, "Checked for remote changes");
        Ok(changed)
    }

    fn tree(&self) -> RemoteTree<'_, S> {
        RemoteTree::new(
            &*self.store,
            &self.retry,
            &self.cancel,
            self.config.page_limit(),
        )
    }

    async fn upload_run(
        &self,
        remote_root: &str,
        local_root: &Path,
        paths: Option<&[PathBuf]>,
        password: &Secret,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        validate_path(local_root, "Local root")?;
        validate_text(remote_root, "Remote root")?;
        validate_password(password)?;

        let local_root = normalize(local_root);
        let is_dir = fs::metadata(&local_root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(Error::InvalidArgument(format!(
                "Local root is not a directory: {}",
                local_root.display()
            )));
        }
        let folder_name = local_root
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                Error::InvalidArgument(format!("Local root has no usable name: {}", local_root.display()))
            })?;

        let remote_path = RemotePath::parse(remote_root)?;
        let dest = remote_path.join(folder_name)?;
        let paths: Option<Vec<PathBuf>> =
            paths.map(|paths| paths.iter().map(|p| normalize(p)).collect());

        let tree = self.tree();
        if tree.resolve(&remote_path).await?.is_none() {
            return Err(Error::PathNotFound(remote_root.to_string()));
        }

        info!(local = %local_root.display(), remote = %dest, "Starting upload sync");
        let staging = StagingArea::create(self.config.staging_root()).await?;
        let result = self
            .upload_phases(&tree, &staging, &local_root, &dest, paths.as_deref(), password)
            .await;
        staging.discard().await;

        self.finish("Upload", result, started)
    }

    async fn upload_phases(
        &self,
        tree: &RemoteTree<'_, S>,
        staging: &StagingArea,
        local_root: &Path,
        dest: &RemotePath,
        paths: Option<&[PathBuf]>,
        password: &Secret,
    ) -> Result<SyncReport> {
        let differ = TreeDiffer::new(tree, &self.exclusions);
        let mut plan = UploadPlan::default();
        match paths {
            None => {
                let dest_id = tree.resolve(dest).await?;
                differ
                    .diff_upload(local_root.to_path_buf(), dest.clone(), dest_id, &mut plan)
                    .await?;
            }
            Some(paths) => {
                differ
                    .diff_upload_paths(local_root, dest, paths, &mut plan)
                    .await?;
            }
        }

        let mut queue = TransferQueue::new();
        for candidate in plan.candidates {
            let archive = self.pack(&candidate.source, staging, password).await?;
            let size = fs::metadata(&archive).await?.len();
            queue.enqueue(UploadItem {
                archive,
                remote_parent: candidate.remote_parent,
                size,
            });
        }
        self.hub.total(queue.remaining_bytes());

        let deleted = self.delete_remote(tree, plan.orphans).await?;

        let transport = UploadTransport::new(tree);
        let mut drain = queue.drain(&transport, &self.hub);
        let mut transferred = 0;
        while let Some(result) = drain.next().await {
            let entry = result?;
            debug!(name = %entry.name, "Uploaded");
            transferred += 1;
        }

        Ok(SyncReport {
            transferred,
            deleted,
            bytes: queue.transferred_bytes(),
            duration: Duration::ZERO,
        })
    }

    async fn download_phases(
        &self,
        tree: &RemoteTree<'_, S>,
        staging: &StagingArea,
        root_id: String,
        local_dest: &Path,
        password: &Secret,
    ) -> Result<SyncReport> {
        let mut plan = DownloadPlan::default();
        TreeDiffer::new(tree, &self.exclusions)
            .diff_download(root_id, local_dest.to_path_buf(), &mut plan)
            .await?;

        let mut queue = TransferQueue::new();
        for item in plan.items {
            queue.enqueue(item);
        }
        self.hub.total(queue.remaining_bytes());

        let deleted = self.delete_local(plan.orphans).await?;

        let transport = DownloadTransport::new(tree.store(), staging);
        let mut drain = queue.drain(&transport, &self.hub);
        let mut transferred = 0;
        while let Some(result) = drain.next().await {
            let extracted = self.unpack(result?, password).await?;
            debug!(path = %extracted.display(), "Downloaded");
            transferred += 1;
        }

        Ok(SyncReport {
            transferred,
            deleted,
            bytes: queue.transferred_bytes(),
            duration: Duration::ZERO,
        })
    }

    async fn pack(&self, source: &Path, staging: &StagingArea, password: &Secret) -> Result<PathBuf> {
        let slot = staging.slot().await?;
        let packager = self.packager.clone();
        let source = source.to_path_buf();
        let password = password.clone();
        local::blocking(move || packager.pack(&source, &slot, password.expose())).await
    }

    async fn unpack(&self, staged: StagedArchive, password: &Secret) -> Result<PathBuf> {
        fs::create_dir_all(&staged.local_folder).await?;

        let packager = self.packager.clone();
        let archive = staged.archive.clone();
        let password = password.clone();
        let extracted = local::blocking(move || {
            packager.unpack(&archive, password.expose(), &staged.local_folder)
        })
        .await?;

        local::remove(&staged.archive).await?;
        Ok(extracted)
    }

    async fn delete_remote(
        &self,
        tree: &RemoteTree<'_, S>,
        orphans: OrphanSet<RemoteTarget>,
    ) -> Result<usize> {
        let mut deleted = 0;
        for target in orphans {
            match tree.store().delete(&target.id).await {
                Ok(()) => {
                    debug!(path = %target.path, "Deleted remote orphan");
                    deleted += 1;
                }
                Err(Error::NotFound(_)) => debug!(path = %target.path, "Remote orphan already gone"),
                Err(e) => return Err(e),
            }
        }
        Ok(deleted)
    }

    /// Delete local orphans. A folder holding an excluded path is never
    /// removed whole; its children are considered one by one instead.
    async fn delete_local(&self, orphans: OrphanSet<PathBuf>) -> Result<usize> {
        let mut pending: VecDeque<PathBuf> = orphans.into_iter().collect();
        let mut deleted = 0;

        while let Some(path) = pending.pop_front() {
            if self.exclusions.contains(&path) {
                continue;
            }
            let Some(entry) = local::stat(&path).await? else {
                continue;
            };

            if entry.is_dir() && self.exclusions.has_descendant(&path) {
                pending.extend(
                    local::list_children(&path)
                        .await?
                        .into_iter()
                        .map(|child| child.path),
                );
                continue;
            }

            local::remove(&path).await?;
            debug!(path = %path.display(), "Deleted local orphan");
            deleted += 1;
        }
        Ok(deleted)
    }

    fn finish(&self, direction: &str, result: Result<SyncReport>, started: Instant) -> Result<SyncReport> {
        match result {
            Ok(mut report) => {
                report.duration = started.elapsed();
                info!(
                    "{} sync finished: {} transferred, {} deleted, {} bytes in {:?}",
                    direction, report.transferred, report.deleted, report.bytes, report.duration
                );
                Ok(report)
            }
            Err(e) => {
                error!("{} sync failed: {}", direction, e);
                Err(e)
            }
        }
    }
}

/// Local folder a download of `remote` lands in.
fn download_target(local_root: &Path, remote: &RemotePath) -> PathBuf {
    match remote.name() {
        Some(name) => local_root.join(name),
        None => local_root.to_path_buf(),
    }
}

fn validate_text(value: &str, what: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn validate_path(value: &Path, what: &str) -> Result<()> {
    if value.as_os_str().is_empty() {
        return Err(Error::InvalidArgument(format!("{} must not be empty", what)));
    }
    Ok(())
}

fn validate_password(password: &Secret) -> Result<()> {
    if password.is_empty() {
        return Err(Error::InvalidArgument("Password must not be empty".to_string()));
    }
    Ok(())
}
