//! Remote store trait definition.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

use drivesync_common::{payload_name, Result};

/// Kind discriminator for store entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    File,
    Directory,
}

/// Metadata for an object in the remote store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// Opaque identifier assigned by the store.
    pub id: String,
    /// Name of the object within its parent folder.
    pub name: String,
    /// File or folder.
    pub kind: EntryKind,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Identifier of the containing folder.
    pub parent_id: Option<String>,
    /// Size in bytes (None for folders or when the store does not report it).
    pub size: Option<u64>,
    /// Store-specific content type.
    pub mime_type: Option<String>,
}

impl RemoteEntry {
    /// Check if this is a folder.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    /// Name of the local file this archive stands for, if it is an archive.
    pub fn payload_name(&self) -> Option<&str> {
        if !self.is_file() {
            return None;
        }
        payload_name(&self.name)
    }
}

/// Byte stream type for upload/download operations.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Client contract for a folder-structured remote object store.
///
/// Entries are addressed by opaque identifiers; path resolution is the
/// caller's business. Implementations handle their own authentication and
/// pagination.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the store name (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// Identifier of the store's root folder.
    fn root_id(&self) -> &str;

    /// List the immediate children of a folder.
    ///
    /// `limit` bounds the number of entries returned (1-1000); `None`
    /// follows pagination to the end.
    ///
    /// # Errors
    /// - Folder not found
    /// - Network/authentication errors
    async fn list_children(&self, folder_id: &str, limit: Option<u16>) -> Result<Vec<RemoteEntry>>;

    /// Look up a child folder by name.
    async fn folder_id(&self, name: &str, parent_id: &str) -> Result<Option<String>>;

    /// Look up a child file by name.
    async fn file_id(&self, name: &str, parent_id: &str) -> Result<Option<String>>;

    /// Download file content as a stream.
    ///
    /// The stream ends after the last chunk on success; a failed transfer
    /// yields an `Err` item.
    async fn download(&self, file_id: &str) -> Result<ByteStream>;

    /// Upload a new file into a folder.
    ///
    /// # Postconditions
    /// - A new entry exists under `parent_id`; existing same-named entries are untouched
    /// - Returns the created entry
    async fn upload(
        &self,
        name: &str,
        parent_id: &str,
        data: ByteStream,
        size: u64,
    ) -> Result<RemoteEntry>;

    /// Create a folder and return its identifier.
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String>;

    /// Delete a file or folder (folders are removed with their contents).
    async fn delete(&self, id: &str) -> Result<()>;
}
