//! Local filesystem collaborator.

use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;

use drivesync_common::{Error, Result};
use drivesync_storage::EntryKind;

/// A file or directory found while enumerating a local folder.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    /// Full path of the entry.
    pub path: PathBuf,
    /// File or directory.
    pub kind: EntryKind,
    /// Last modification time.
    pub modified: DateTime<Utc>,
    /// Size in bytes (zero for directories).
    pub size: u64,
}

impl LocalEntry {
    /// Final path component, if it is valid UTF-8.
    pub fn name(&self) -> Option<&str> {
        self.path.file_name().and_then(|name| name.to_str())
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Enumerate the immediate children of `dir`: files first, then directories,
/// each group sorted by name.
///
/// A missing directory has no children. Entries that are neither files nor
/// directories are skipped.
pub async fn list_children(dir: &Path) -> Result<Vec<LocalEntry>> {
    let mut reader = match fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::Io(e)),
    };

    let mut files = Vec::new();
    let mut dirs = Vec::new();

    while let Some(entry) = reader.next_entry().await? {
        let path = entry.path();
        let metadata = match fs::metadata(&path).await {
            Ok(metadata) => metadata,
            // Dangling symlink or a file removed mid-listing.
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::Io(e)),
        };

        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else if metadata.is_file() {
            EntryKind::File
        } else {
            continue;
        };

        let local = LocalEntry {
            path,
            kind,
            modified: DateTime::<Utc>::from(metadata.modified()?),
            size: if metadata.is_file() { metadata.len() } else { 0 },
        };
        match kind {
            EntryKind::File => files.push(local),
            EntryKind::Directory => dirs.push(local),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    dirs.sort_by(|a, b| a.path.cmp(&b.path));
    files.append(&mut dirs);
    Ok(files)
}

/// `name` as a single plain path component.
///
/// Returns `None` for names that would not stay inside the folder they
/// are joined onto: empty, `.`, `..`, absolute or holding a separator.
pub fn plain_name(name: &str) -> Option<&Path> {
    if name.contains(['/', '\\']) {
        return None;
    }
    let path = Path::new(name);
    let mut components = path.components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Some(path),
        _ => None,
    }
}

/// Describe a single path, or `None` if it does not exist.
pub async fn stat(path: &Path) -> Result<Option<LocalEntry>> {
    let metadata = match fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };

    let kind = if metadata.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    Ok(Some(LocalEntry {
        path: path.to_path_buf(),
        kind,
        modified: DateTime::<Utc>::from(metadata.modified()?),
        size: if metadata.is_file() { metadata.len() } else { 0 },
    }))
}

/// Set the modification time of a file.
pub async fn set_modified(path: &Path, modified: DateTime<Utc>) -> Result<()> {
    let path = path.to_path_buf();
    let mtime = FileTime::from_unix_time(modified.timestamp(), modified.timestamp_subsec_nanos());
    blocking(move || Ok(filetime::set_file_mtime(&path, mtime)?)).await
}

/// Remove a file or a whole directory tree. Missing paths are not an error.
pub async fn remove(path: &Path) -> Result<()> {
    let result = match fs::symlink_metadata(path).await {
        Ok(metadata) if metadata.is_dir() => fs::remove_dir_all(path).await,
        Ok(_) => fs::remove_file(path).await,
        Err(e) => Err(e),
    };
    match result {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(Error::Io(e)),
        _ => Ok(()),
    }
}

/// Run synchronous filesystem work on the blocking pool.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
