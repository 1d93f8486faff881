//! Run-scoped view of the remote store.

use std::future::Future;
use std::sync::{Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use drivesync_common::{Error, RemotePath, Result};
use drivesync_storage::{RemoteEntry, RemoteStore};

use crate::index::PathIndex;
use crate::retry::RetryExecutor;

/// Remote tree as seen by one synchronization run.
///
/// Wraps the store with the run's page bound, retry policy and
/// cancellation token, and resolves folder paths through a [`PathIndex`]
/// that lives exactly as long as the run.
pub struct RemoteTree<'a, S: RemoteStore + ?Sized> {
    store: &'a S,
    retry: &'a RetryExecutor,
    cancel: &'a CancellationToken,
    page_limit: Option<u16>,
    index: Mutex<PathIndex>,
}

impl<'a, S: RemoteStore + ?Sized> RemoteTree<'a, S> {
    /// Create a view with an index holding only the store root.
    pub fn new(
        store: &'a S,
        retry: &'a RetryExecutor,
        cancel: &'a CancellationToken,
        page_limit: Option<u16>,
    ) -> Self {
        Self {
            index: Mutex::new(PathIndex::new(store.root_id())),
            store,
            retry,
            cancel,
            page_limit,
        }
    }

    /// The underlying store.
    pub fn store(&self) -> &'a S {
        self.store
    }

    /// List a folder's children.
    ///
    /// # Errors
    /// - `Cancelled` if the run's token fires before the listing completes
    pub async fn list(&self, folder_id: &str) -> Result<Vec<RemoteEntry>> {
        self.guarded("listing", || self.store.list_children(folder_id, self.page_limit))
            .await
    }

    /// Look up a child folder by name.
    pub async fn folder_id(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        self.guarded("folder lookup", || self.store.folder_id(name, parent_id))
            .await
    }

    /// Look up a child file by name.
    pub async fn file_id(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        self.guarded("file lookup", || self.store.file_id(name, parent_id))
            .await
    }

    /// Record a folder discovered while walking the tree.
    pub fn remember(&self, path: &RemotePath, id: &str) {
        self.index().insert(path.clone(), id);
    }

    /// Resolve a folder path, or `None` if some component does not exist.
    pub async fn resolve(&self, path: &RemotePath) -> Result<Option<String>> {
        self.walk(path, false).await
    }

    /// Resolve a folder path, creating missing folders on the way.
    pub async fn resolve_or_create(&self, path: &RemotePath) -> Result<String> {
        self.walk(path, true)
            .await?
            .ok_or_else(|| Error::PathNotFound(path.to_string()))
    }

    async fn walk(&self, path: &RemotePath, create: bool) -> Result<Option<String>> {
        if let Some(id) = self.cached(path) {
            return Ok(Some(id));
        }

        let mut current = RemotePath::root();
        let mut current_id = self.store.root_id().to_string();

        for component in path.components() {
            current = current.join(component)?;
            if let Some(id) = self.cached(&current) {
                current_id = id;
                continue;
            }

            let found = match self.folder_id(component, &current_id).await? {
                Some(id) => id,
                None if create => {
                    let id = self.store.create_folder(component, &current_id).await?;
                    debug!(path = %current, "Created remote folder");
                    id
                }
                None => return Ok(None),
            };
            current_id = self.index().insert(current.clone(), found).to_string();
        }

        Ok(Some(current_id))
    }

    fn cached(&self, path: &RemotePath) -> Option<String> {
        self.index().get(path).map(str::to_string)
    }

    fn index(&self) -> std::sync::MutexGuard<'_, PathIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn guarded<T, F, Fut>(&self, what: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled(format!("{} not started", what)));
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled(format!("{} interrupted", what))),
            result = self.retry.execute(what, operation) => result,
        }
    }
}
