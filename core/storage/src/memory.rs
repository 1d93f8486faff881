//! In-memory remote store for testing.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use uuid::Uuid;

use crate::provider::{ByteStream, EntryKind, RemoteEntry, RemoteStore};
use drivesync_common::{Error, Result};

const ROOT_ID: &str = "root";

/// Chunk size used when streaming downloads back to the caller.
const DOWNLOAD_CHUNK: usize = 4 * 1024;

/// In-memory storage node.
#[derive(Debug, Clone)]
struct Node {
    entry: RemoteEntry,
    data: Vec<u8>,
}

/// In-memory remote store.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop. Uploads and downloads can be made to fail by name
/// to exercise mid-run failure handling.
pub struct MemoryStore {
    nodes: RwLock<HashMap<String, Node>>,
    failing_uploads: RwLock<HashSet<String>>,
    failing_downloads: RwLock<HashSet<String>>,
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    deletes: AtomicUsize,
}

impl MemoryStore {
    /// Create a new store holding only the root folder.
    pub fn new() -> Self {
        let root = RemoteEntry {
            id: ROOT_ID.to_string(),
            name: String::new(),
            kind: EntryKind::Directory,
            modified: Utc::now(),
            parent_id: None,
            size: None,
            mime_type: None,
        };

        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_ID.to_string(),
            Node {
                entry: root,
                data: Vec::new(),
            },
        );

        Self {
            nodes: RwLock::new(nodes),
            failing_uploads: RwLock::new(HashSet::new()),
            failing_downloads: RwLock::new(HashSet::new()),
            uploads: AtomicUsize::new(0),
            downloads: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    /// Add a folder under `parent_id` and return its id.
    pub fn add_folder(&self, parent_id: &str, name: &str) -> String {
        self.insert(parent_id, name, EntryKind::Directory, Vec::new(), Utc::now())
    }

    /// Add a file with an explicit modification time and return its id.
    pub fn add_file(
        &self,
        parent_id: &str,
        name: &str,
        data: Vec<u8>,
        modified: DateTime<Utc>,
    ) -> String {
        self.insert(parent_id, name, EntryKind::File, data, modified)
    }

    /// Overwrite the modification time of an entry.
    pub fn set_modified(&self, id: &str, modified: DateTime<Utc>) {
        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(node) = nodes.get_mut(id) {
            node.entry.modified = modified;
        }
    }

    /// Get an entry by id.
    pub fn entry(&self, id: &str) -> Option<RemoteEntry> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes.get(id).map(|node| node.entry.clone())
    }

    /// Get the content of a file by id.
    pub fn content(&self, id: &str) -> Option<Vec<u8>> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes
            .get(id)
            .filter(|node| node.entry.is_file())
            .map(|node| node.data.clone())
    }

    /// Resolve a `/`-separated path from the root, e.g. `"docs/a.txt.zip"`.
    pub fn lookup(&self, path: &str) -> Option<RemoteEntry> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut current = ROOT_ID.to_string();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = nodes
                .values()
                .find(|node| {
                    node.entry.parent_id.as_deref() == Some(current.as_str())
                        && node.entry.name == segment
                })?
                .entry
                .id
                .clone();
        }
        nodes.get(&current).map(|node| node.entry.clone())
    }

    /// Number of entries (excluding the root).
    pub fn len(&self) -> usize {
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
            - 1
    }

    /// Check if the store holds nothing but its root.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make every upload of a file with this name fail mid-stream.
    pub fn fail_uploads_named(&self, name: &str) {
        self.failing_uploads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Make every download of a file with this name fail mid-stream.
    pub fn fail_downloads_named(&self, name: &str) {
        self.failing_downloads
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());
    }

    /// Number of completed uploads.
    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    /// Number of started downloads.
    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Number of successful deletions.
    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    fn insert(
        &self,
        parent_id: &str,
        name: &str,
        kind: EntryKind,
        data: Vec<u8>,
        modified: DateTime<Utc>,
    ) -> String {
        let id = Uuid::new_v4().to_string();
        let entry = RemoteEntry {
            id: id.clone(),
            name: name.to_string(),
            kind,
            modified,
            parent_id: Some(parent_id.to_string()),
            size: (kind == EntryKind::File).then_some(data.len() as u64),
            mime_type: None,
        };
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Node { entry, data });
        id
    }

    fn require_folder(&self, id: &str) -> Result<()> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        match nodes.get(id) {
            Some(node) if node.entry.is_dir() => Ok(()),
            Some(_) => Err(Error::InvalidArgument(format!("Not a folder: {}", id))),
            None => Err(Error::NotFound(format!("Folder not found: {}", id))),
        }
    }

    fn find_child(&self, name: &str, parent_id: &str, kind: EntryKind) -> Option<String> {
        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        nodes
            .values()
            .find(|node| {
                node.entry.parent_id.as_deref() == Some(parent_id)
                    && node.entry.name == name
                    && node.entry.kind == kind
            })
            .map(|node| node.entry.id.clone())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    fn root_id(&self) -> &str {
        ROOT_ID
    }

    async fn list_children(&self, folder_id: &str, limit: Option<u16>) -> Result<Vec<RemoteEntry>> {
        self.require_folder(folder_id)?;

        let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
        let mut children: Vec<RemoteEntry> = nodes
            .values()
            .filter(|node| node.entry.parent_id.as_deref() == Some(folder_id))
            .map(|node| node.entry.clone())
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));

        if let Some(limit) = limit {
            children.truncate(usize::from(limit));
        }
        Ok(children)
    }

    async fn folder_id(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        Ok(self.find_child(name, parent_id, EntryKind::Directory))
    }

    async fn file_id(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        Ok(self.find_child(name, parent_id, EntryKind::File))
    }

    async fn download(&self, file_id: &str) -> Result<ByteStream> {
        let node = {
            let nodes = self.nodes.read().unwrap_or_else(PoisonError::into_inner);
            nodes
                .get(file_id)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("File not found: {}", file_id)))?
        };

        if node.entry.is_dir() {
            return Err(Error::InvalidArgument(
                "Cannot download a folder".to_string(),
            ));
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failing_downloads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&node.entry.name);

        let mut chunks: Vec<Result<Bytes>> = node
            .data
            .chunks(DOWNLOAD_CHUNK)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();

        if failing {
            chunks.truncate(chunks.len() / 2);
            chunks.push(Err(Error::Network(format!(
                "Injected download failure: {}",
                node.entry.name
            ))));
        }

        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn upload(
        &self,
        name: &str,
        parent_id: &str,
        mut data: ByteStream,
        size: u64,
    ) -> Result<RemoteEntry> {
        self.require_folder(parent_id)?;

        let failing = self
            .failing_uploads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name);

        let mut content = Vec::with_capacity(size as usize);
        while let Some(chunk) = data.next().await {
            content.extend_from_slice(&chunk?);
            if failing && content.len() as u64 * 2 >= size {
                return Err(Error::Network(format!("Injected upload failure: {}", name)));
            }
        }
        if failing {
            return Err(Error::Network(format!("Injected upload failure: {}", name)));
        }

        let id = self.insert(parent_id, name, EntryKind::File, content, Utc::now());
        self.uploads.fetch_add(1, Ordering::SeqCst);

        self.entry(&id)
            .ok_or_else(|| Error::NotFound(format!("Uploaded file vanished: {}", name)))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        self.require_folder(parent_id)?;
        Ok(self.add_folder(parent_id, name))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        if id == ROOT_ID {
            return Err(Error::PermissionDenied("Cannot delete the root".to_string()));
        }

        let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
        if !nodes.contains_key(id) {
            return Err(Error::NotFound(format!("Entry not found: {}", id)));
        }

        let mut doomed = vec![id.to_string()];
        let mut cursor = 0;
        while cursor < doomed.len() {
            let parent = doomed[cursor].clone();
            doomed.extend(
                nodes
                    .values()
                    .filter(|node| node.entry.parent_id.as_deref() == Some(parent.as_str()))
                    .map(|node| node.entry.id.clone()),
            );
            cursor += 1;
        }
        for doomed_id in doomed {
            nodes.remove(&doomed_id);
        }

        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
