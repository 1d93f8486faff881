//! Google Drive remote store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use drivesync_common::Result;

use super::auth::{AuthConfig, AuthManager, TokenManager, Tokens};
use super::client::{DriveClient, DriveFile, SIMPLE_UPLOAD_LIMIT};
use crate::provider::{ByteStream, EntryKind, RemoteEntry, RemoteStore};

/// Google Drive store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GDriveConfig {
    /// OAuth2 client registration.
    pub auth: AuthConfig,
    /// Folder treated as the store root; `"root"` is My Drive.
    #[serde(default = "default_root")]
    pub root_folder_id: String,
}

fn default_root() -> String {
    "root".to_string()
}

/// Google Drive remote store.
pub struct GDriveStore {
    root_id: String,
    client: DriveClient,
    token_manager: Arc<TokenManager>,
}

impl GDriveStore {
    /// Create a store from a client registration and previously obtained tokens.
    ///
    /// # Errors
    /// - Invalid OAuth2 configuration
    pub fn new(config: GDriveConfig, tokens: Tokens) -> Result<Self> {
        let auth_manager = AuthManager::new(config.auth)?;
        let token_manager = Arc::new(TokenManager::new(auth_manager, tokens));
        let client = DriveClient::new(token_manager.clone())?;

        Ok(Self {
            root_id: config.root_folder_id,
            client,
            token_manager,
        })
    }

    /// Current tokens, including any refreshed access token.
    pub async fn tokens(&self) -> Tokens {
        self.token_manager.get_tokens().await
    }
}

/// Convert Drive metadata into a store entry.
///
/// Entries with no reported modification time read as the epoch so they
/// always look stale.
fn to_entry(file: DriveFile) -> RemoteEntry {
    let kind = if file.is_folder() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    RemoteEntry {
        size: file.size_bytes(),
        modified: file.modified_time.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        parent_id: file.parents.into_iter().next(),
        mime_type: Some(file.mime_type),
        id: file.id,
        name: file.name,
        kind,
    }
}

#[async_trait]
impl RemoteStore for GDriveStore {
    fn name(&self) -> &str {
        "gdrive"
    }

    fn root_id(&self) -> &str {
        &self.root_id
    }

    async fn list_children(&self, folder_id: &str, limit: Option<u16>) -> Result<Vec<RemoteEntry>> {
        let files = self.client.list_folder(folder_id, limit).await?;
        Ok(files.into_iter().map(to_entry).collect())
    }

    async fn folder_id(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let found = self.client.find_child(name, parent_id, true).await?;
        Ok(found.map(|file| file.id))
    }

    async fn file_id(&self, name: &str, parent_id: &str) -> Result<Option<String>> {
        let found = self.client.find_child(name, parent_id, false).await?;
        Ok(found.map(|file| file.id))
    }

    async fn download(&self, file_id: &str) -> Result<ByteStream> {
        self.client.download_stream(file_id).await
    }

    async fn upload(
        &self,
        name: &str,
        parent_id: &str,
        data: ByteStream,
        size: u64,
    ) -> Result<RemoteEntry> {
        let file = if size < SIMPLE_UPLOAD_LIMIT {
            let mut buffer = Vec::with_capacity(size as usize);
            let mut data = data;
            while let Some(chunk) = data.next().await {
                buffer.extend_from_slice(&chunk?);
            }
            self.client.upload_simple(name, parent_id, buffer).await?
        } else {
            self.client
                .upload_resumable(name, parent_id, data, size)
                .await?
        };

        tracing::debug!(name, id = %file.id, "Uploaded to Drive");
        Ok(to_entry(file))
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let folder = self.client.create_folder(name, parent_id).await?;
        Ok(folder.id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.client.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gdrive::client::FOLDER_MIME_TYPE;

    fn test_config() -> GDriveConfig {
        GDriveConfig {
            auth: AuthConfig {
                client_id: "test_client_id".to_string(),
                client_secret: "test_secret".to_string(),
                redirect_url: "http://localhost:8080/callback".to_string(),
            },
            root_folder_id: default_root(),
        }
    }

    fn test_tokens() -> Tokens {
        Tokens {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        }
    }

    #[test]
    fn test_config_defaults_root() {
        let json = r#"{"auth": {"client_id": "a", "client_secret": "b"}}"#;
        let config: GDriveConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.root_folder_id, "root");
    }

    #[test]
    fn test_create_store() {
        let store = GDriveStore::new(test_config(), test_tokens()).unwrap();
        assert_eq!(store.name(), "gdrive");
        assert_eq!(store.root_id(), "root");
    }

    #[test]
    fn test_to_entry_file() {
        let modified = Utc::now();
        let entry = to_entry(DriveFile {
            id: "file123".to_string(),
            name: "notes.txt.zip".to_string(),
            mime_type: "application/zip".to_string(),
            size: Some("1024".to_string()),
            modified_time: Some(modified),
            parents: vec!["parent".to_string()],
            trashed: false,
        });

        assert!(entry.is_file());
        assert_eq!(entry.size, Some(1024));
        assert_eq!(entry.modified, modified);
        assert_eq!(entry.parent_id.as_deref(), Some("parent"));
        assert_eq!(entry.payload_name(), Some("notes.txt"));
    }

    #[test]
    fn test_to_entry_folder_without_time() {
        let entry = to_entry(DriveFile {
            id: "folder123".to_string(),
            name: "docs".to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: None,
            modified_time: None,
            parents: vec![],
            trashed: false,
        });

        assert!(entry.is_dir());
        assert_eq!(entry.modified, DateTime::<Utc>::UNIX_EPOCH);
        assert!(entry.parent_id.is_none());
    }
}
