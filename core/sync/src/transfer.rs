//! Transports moving archives between the staging area and the store.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use drivesync_common::{Error, RemotePath, Result};
use drivesync_storage::{RemoteEntry, RemoteStore};

use crate::diff::DownloadItem;
use crate::local;
use crate::progress::ProgressReporter;
use crate::queue::{Payload, Transferred, Transport};
use crate::remote::RemoteTree;
use crate::staging::StagingArea;

/// Packed archive waiting to be uploaded.
#[derive(Debug, Clone)]
pub struct UploadItem {
    /// Archive in the staging area.
    pub archive: PathBuf,
    /// Remote folder the archive goes into.
    pub remote_parent: RemotePath,
    /// Archive size in bytes.
    pub size: u64,
}

impl Payload for UploadItem {
    fn size(&self) -> Option<u64> {
        Some(self.size)
    }
}

impl Payload for DownloadItem {
    fn size(&self) -> Option<u64> {
        self.entry.size
    }
}

/// Downloaded archive waiting to be unpacked.
#[derive(Debug, Clone)]
pub struct StagedArchive {
    /// Archive in the staging area, stamped with the remote modification time.
    pub archive: PathBuf,
    /// Local folder the payload belongs in.
    pub local_folder: PathBuf,
}

fn transfer_failed(name: &str, err: Error) -> Error {
    match err {
        Error::TransferFailed(_) => err,
        other => Error::TransferFailed(format!("{}: {}", name, other)),
    }
}

/// Uploads staged archives, creating remote folders on demand.
pub struct UploadTransport<'a, S: RemoteStore + ?Sized> {
    tree: &'a RemoteTree<'a, S>,
}

impl<'a, S: RemoteStore + ?Sized> UploadTransport<'a, S> {
    /// Create a transport over a run's remote view.
    pub fn new(tree: &'a RemoteTree<'a, S>) -> Self {
        Self { tree }
    }
}

#[async_trait]
impl<'a, S: RemoteStore + ?Sized> Transport<UploadItem> for UploadTransport<'a, S> {
    type Output = RemoteEntry;

    async fn transfer(
        &self,
        item: UploadItem,
        progress: &ProgressReporter,
    ) -> Result<Transferred<RemoteEntry>> {
        let name = item
            .archive
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::InvalidArgument(format!("Bad archive path: {}", item.archive.display()))
            })?;

        let parent_id = self.tree.resolve_or_create(&item.remote_parent).await?;

        let file = fs::File::open(&item.archive).await?;
        let reporter = progress.clone();
        let mut sent = 0u64;
        let stream = ReaderStream::new(file).map(move |chunk| {
            let chunk = chunk?;
            sent += chunk.len() as u64;
            reporter.report(sent);
            Ok::<_, Error>(chunk)
        });

        let entry = self
            .tree
            .store()
            .upload(&name, &parent_id, Box::pin(stream), item.size)
            .await
            .map_err(|e| transfer_failed(&name, e))?;

        fs::remove_file(&item.archive).await?;

        Ok(Transferred {
            output: entry,
            bytes: item.size,
        })
    }
}

/// Downloads remote archives into the staging area.
pub struct DownloadTransport<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    staging: &'a StagingArea,
}

impl<'a, S: RemoteStore + ?Sized> DownloadTransport<'a, S> {
    /// Create a transport writing into `staging`.
    pub fn new(store: &'a S, staging: &'a StagingArea) -> Self {
        Self { store, staging }
    }
}

#[async_trait]
impl<'a, S: RemoteStore + ?Sized> Transport<DownloadItem> for DownloadTransport<'a, S> {
    type Output = StagedArchive;

    async fn transfer(
        &self,
        item: DownloadItem,
        progress: &ProgressReporter,
    ) -> Result<Transferred<StagedArchive>> {
        let name = item.entry.name.as_str();
        let file_name = local::plain_name(name).ok_or_else(|| {
            Error::InvalidArgument(format!("Remote name cannot be stored locally: {}", name))
        })?;
        let archive = self.staging.slot().await?.join(file_name);

        let mut stream = self
            .store
            .download(&item.entry.id)
            .await
            .map_err(|e| transfer_failed(name, e))?;

        let mut file = fs::File::create(&archive).await?;
        let mut received = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| transfer_failed(name, e))?;
            file.write_all(&chunk).await?;
            received += chunk.len() as u64;
            progress.report(received);
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        local::set_modified(&archive, item.entry.modified).await?;

        Ok(Transferred {
            output: StagedArchive {
                archive,
                local_folder: item.local_folder,
            },
            bytes: received,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ProgressHub, SyncEvent};
    use crate::retry::RetryExecutor;
    use chrono::{DateTime, Utc};
    use drivesync_storage::MemoryStore;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_upload_creates_parent_and_removes_archive() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("a.txt.zip");
        std::fs::write(&archive, vec![9u8; 100]).unwrap();

        let store = MemoryStore::new();
        let (retry, cancel) = (RetryExecutor::default(), CancellationToken::new());
        let tree = RemoteTree::new(&store, &retry, &cancel, None);
        let hub = Arc::new(ProgressHub::new());
        let mut rx = hub.subscribe();

        let item = UploadItem {
            archive: archive.clone(),
            remote_parent: RemotePath::parse("/x/y").unwrap(),
            size: 100,
        };
        let done = UploadTransport::new(&tree)
            .transfer(item, &ProgressReporter::new(hub.clone(), 50))
            .await
            .unwrap();

        assert_eq!(done.bytes, 100);
        assert_eq!(store.lookup("x/y/a.txt.zip").unwrap().id, done.output.id);
        assert!(!archive.exists());
        assert_eq!(rx.try_recv().unwrap(), SyncEvent::Progress(150));
    }

    #[tokio::test]
    async fn test_failed_upload_is_transfer_failure() {
        let temp = TempDir::new().unwrap();
        let archive = temp.path().join("bad.zip");
        std::fs::write(&archive, vec![1u8; 10]).unwrap();

        let store = MemoryStore::new();
        store.fail_uploads_named("bad.zip");
        let (retry, cancel) = (RetryExecutor::default(), CancellationToken::new());
        let tree = RemoteTree::new(&store, &retry, &cancel, None);

        let item = UploadItem {
            archive,
            remote_parent: RemotePath::root(),
            size: 10,
        };
        let result = UploadTransport::new(&tree)
            .transfer(item, &ProgressReporter::new(Arc::new(ProgressHub::new()), 0))
            .await;
        assert!(matches!(result, Err(Error::TransferFailed(_))));
    }

    #[tokio::test]
    async fn test_download_stamps_remote_time() {
        let temp = TempDir::new().unwrap();
        let staging = StagingArea::create(temp.path()).await.unwrap();

        let store = MemoryStore::new();
        let modified = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let id = store.add_file("root", "n.txt.zip", vec![5u8; 64], modified);

        let item = DownloadItem {
            entry: store.entry(&id).unwrap(),
            local_folder: temp.path().join("out"),
        };
        let done = DownloadTransport::new(&store, &staging)
            .transfer(item, &ProgressReporter::new(Arc::new(ProgressHub::new()), 0))
            .await
            .unwrap();

        assert_eq!(done.bytes, 64);
        assert_eq!(std::fs::read(&done.output.archive).unwrap(), vec![5u8; 64]);
        let stamped = local::stat(&done.output.archive).await.unwrap().unwrap().modified;
        assert_eq!(stamped, modified);
    }

    #[tokio::test]
    async fn test_download_refuses_names_leaving_the_slot() {
        let temp = TempDir::new().unwrap();
        let staging = StagingArea::create(temp.path().join("staging")).await.unwrap();

        let store = MemoryStore::new();
        let id = store.add_file("root", "../escape.zip", vec![1u8; 8], Utc::now());

        let item = DownloadItem {
            entry: store.entry(&id).unwrap(),
            local_folder: temp.path().join("out"),
        };
        let result = DownloadTransport::new(&store, &staging)
            .transfer(item, &ProgressReporter::new(Arc::new(ProgressHub::new()), 0))
            .await;

        assert!(matches!(result, Err(Error::InvalidArgument(_))));
        assert!(!temp.path().join("staging/escape.zip").exists());
        assert_eq!(store.download_count(), 0);
    }
}
