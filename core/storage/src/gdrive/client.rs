//! Google Drive API client.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use reqwest::{header, Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use drivesync_common::{Error, Result};

use super::auth::TokenManager;
use crate::provider::ByteStream;

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Chunk size for resumable uploads (must be a multiple of 256KB).
const CHUNK_SIZE: usize = 256 * 1024;

/// Largest payload sent as a single multipart request.
pub const SIMPLE_UPLOAD_LIMIT: u64 = 5 * 1024 * 1024;

/// Largest page the files.list endpoint serves.
const MAX_PAGE_SIZE: u16 = 1000;

/// Boundary separating the parts of a multipart upload.
const MULTIPART_BOUNDARY: &str = "drivesync_part_boundary";

const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime,parents,trashed";
const LIST_FIELDS: &str = "files(id,name,mimeType,size,modifiedTime,parents,trashed),nextPageToken";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// File size in bytes, sent as a decimal string.
    #[serde(default)]
    pub size: Option<String>,
    /// Modified time.
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
    /// Parent folder IDs.
    #[serde(default)]
    pub parents: Vec<String>,
    /// Trashed status.
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

/// Response from listing files.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileListResponse {
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    token_manager: Arc<TokenManager>,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(token_manager: Arc<TokenManager>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("DriveSync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token_manager,
        })
    }

    /// Attach the bearer token and send.
    async fn send(&self, request: RequestBuilder, context: &str) -> Result<Response> {
        let token = self.token_manager.get_access_token().await?;
        request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| Error::Network(format!("{}: {}", context, e)))
    }

    /// Send and decode a JSON body, mapping error statuses.
    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder, context: &str) -> Result<T> {
        let response = self.send(request, context).await?;
        if !response.status().is_success() {
            return Err(status_error(response, context).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Network(format!("{}: bad response body: {}", context, e)))
    }

    /// Create a folder.
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<DriveFile> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE,
            "parents": [parent_id],
        });
        let request = self
            .http
            .post(format!("{}/files", DRIVE_API_BASE))
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata);

        self.send_json(request, "Create folder").await
    }

    /// List the children of a folder.
    ///
    /// With a `page_size`, only the first page of that size is fetched;
    /// without one, every page is followed.
    pub async fn list_folder(&self, folder_id: &str, page_size: Option<u16>) -> Result<Vec<DriveFile>> {
        let query = format!("'{}' in parents and trashed = false", escape_query(folder_id));
        let size = page_size.unwrap_or(MAX_PAGE_SIZE).to_string();

        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut request = self.http.get(format!("{}/files", DRIVE_API_BASE)).query(&[
                ("q", query.as_str()),
                ("fields", LIST_FIELDS),
                ("pageSize", size.as_str()),
            ]);
            if let Some(token) = &page_token {
                request = request.query(&[("pageToken", token.as_str())]);
            }

            let page: FileListResponse = self.send_json(request, "List folder").await?;
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if page_size.is_none() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(files)
    }

    /// Find a child by name, restricted to folders or to non-folders.
    pub async fn find_child(
        &self,
        name: &str,
        parent_id: &str,
        folder: bool,
    ) -> Result<Option<DriveFile>> {
        let query = format!(
            "name = '{}' and '{}' in parents and mimeType {} '{}' and trashed = false",
            escape_query(name),
            escape_query(parent_id),
            if folder { "=" } else { "!=" },
            FOLDER_MIME_TYPE,
        );
        let request = self.http.get(format!("{}/files", DRIVE_API_BASE)).query(&[
            ("q", query.as_str()),
            ("fields", LIST_FIELDS),
            ("pageSize", "1"),
        ]);

        let page: FileListResponse = self.send_json(request, "Find child").await?;
        Ok(page.files.into_iter().next())
    }

    /// Upload a small file in one multipart request.
    pub async fn upload_simple(
        &self,
        name: &str,
        parent_id: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile> {
        let metadata = serde_json::to_string(&serde_json::json!({
            "name": name,
            "parents": [parent_id],
        }))
        .map_err(|e| Error::Serialization(format!("Upload metadata: {}", e)))?;

        let request = self
            .http
            .post(format!("{}/files", DRIVE_UPLOAD_BASE))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            )
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .body(multipart_body(&metadata, &data));

        self.send_json(request, "Upload").await
    }

    /// Start a resumable upload session and return its URI.
    async fn start_resumable_upload(
        &self,
        name: &str,
        parent_id: &str,
        total_size: u64,
    ) -> Result<String> {
        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id],
        });
        let request = self
            .http
            .post(format!("{}/files", DRIVE_UPLOAD_BASE))
            .header("X-Upload-Content-Length", total_size.to_string())
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .json(&metadata);

        let response = self.send(request, "Start resumable upload").await?;
        if !response.status().is_success() {
            return Err(status_error(response, "Start resumable upload").await);
        }

        response
            .headers()
            .get(header::LOCATION)
            .and_then(|uri| uri.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| Error::Network("Resumable upload returned no session URI".to_string()))
    }

    /// Upload one chunk; returns the file once the session completes.
    async fn upload_chunk(
        &self,
        upload_uri: &str,
        data: Vec<u8>,
        start_byte: u64,
        total_size: u64,
    ) -> Result<Option<DriveFile>> {
        let end_byte = start_byte + data.len() as u64 - 1;
        let content_range = format!("bytes {}-{}/{}", start_byte, end_byte, total_size);

        let response = self
            .http
            .put(upload_uri)
            .header(header::CONTENT_LENGTH, data.len().to_string())
            .header(header::CONTENT_RANGE, content_range)
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload chunk: {}", e)))?;

        let status = response.status();
        if status == StatusCode::OK || status == StatusCode::CREATED {
            response
                .json()
                .await
                .map(Some)
                .map_err(|e| Error::Network(format!("Failed to parse upload response: {}", e)))
        } else if status == StatusCode::PERMANENT_REDIRECT {
            // 308 Resume Incomplete
            Ok(None)
        } else {
            Err(status_error(response, "Chunk upload failed").await)
        }
    }

    /// Upload a large file through a resumable session.
    pub async fn upload_resumable(
        &self,
        name: &str,
        parent_id: &str,
        mut stream: ByteStream,
        total_size: u64,
    ) -> Result<DriveFile> {
        let upload_uri = self
            .start_resumable_upload(name, parent_id, total_size)
            .await?;

        let mut bytes_uploaded = 0u64;
        let mut buffer = Vec::with_capacity(CHUNK_SIZE);

        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk?);

            while buffer.len() >= CHUNK_SIZE {
                let part: Vec<u8> = buffer.drain(..CHUNK_SIZE).collect();
                let len = part.len() as u64;
                if let Some(file) = self
                    .upload_chunk(&upload_uri, part, bytes_uploaded, total_size)
                    .await?
                {
                    return Ok(file);
                }
                bytes_uploaded += len;
            }
        }

        if !buffer.is_empty() {
            if let Some(file) = self
                .upload_chunk(&upload_uri, buffer, bytes_uploaded, total_size)
                .await?
            {
                return Ok(file);
            }
        }

        Err(Error::Network(format!("Upload of {} did not complete", name)))
    }

    /// Download file content as a stream.
    pub async fn download_stream(&self, file_id: &str) -> Result<ByteStream> {
        let request = self
            .http
            .get(format!("{}/files/{}", DRIVE_API_BASE, file_id))
            .query(&[("alt", "media")]);

        let response = self.send(request, "Download").await?;
        if !response.status().is_success() {
            return Err(status_error(response, "Download").await);
        }

        let stream = response.bytes_stream().map(|result: reqwest::Result<Bytes>| {
            result.map_err(|e| Error::Network(format!("Download interrupted: {}", e)))
        });
        Ok(Box::pin(stream))
    }

    /// Delete a file or folder.
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        let request = self
            .http
            .delete(format!("{}/files/{}", DRIVE_API_BASE, file_id));

        let response = self.send(request, "Delete").await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error(response, "Delete").await)
        }
    }
}

/// Assemble a `multipart/related` body of JSON metadata plus the payload.
fn multipart_body(metadata: &str, data: &[u8]) -> Vec<u8> {
    let head = format!(
        "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{metadata}\r\n\
         --{b}\r\nContent-Type: application/zip\r\n\r\n",
        b = MULTIPART_BOUNDARY
    );
    let tail = format!("\r\n--{}--", MULTIPART_BOUNDARY);

    let mut body = Vec::with_capacity(head.len() + data.len() + tail.len());
    body.extend_from_slice(head.as_bytes());
    body.extend_from_slice(data);
    body.extend_from_slice(tail.as_bytes());
    body
}

/// Map a non-success response onto the error taxonomy.
async fn status_error(response: Response, context: &str) -> Error {
    let status = response.status();
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("{}: resource not found", context)),
        StatusCode::UNAUTHORIZED => {
            Error::Authentication(format!("{}: invalid or expired token", context))
        }
        StatusCode::FORBIDDEN => Error::PermissionDenied(format!("{}: access denied", context)),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Error::Network(format!("{}: {} - {}", context, status, body))
        }
    }
}

/// Escape a literal for use inside a single-quoted Drive query string.
pub fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}
