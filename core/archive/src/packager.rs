//! Archive packaging contract.

use filetime::FileTime;
use std::path::{Path, PathBuf};

use drivesync_common::Result;

pub use drivesync_common::{archive_name, payload_name};

/// Outcome of the unprotected extraction probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// The archive carried no password; its entry was written here.
    Extracted(PathBuf),
    /// The entry is encrypted. Nothing was left in the destination.
    PasswordRequired,
}

/// Wraps single files into password-protected archives and back.
///
/// Implementations are synchronous; callers on an async runtime should
/// run them on a blocking thread.
pub trait ArchivePackager: Send + Sync {
    /// Package `source` into `<target_dir>/<file name><suffix>`.
    ///
    /// The archive holds exactly one entry named after the file, with no
    /// directory structure, and carries the source's modification time.
    ///
    /// # Errors
    /// - `InvalidArgument` if `source` has no usable file name or the password is empty
    /// - `Io` on read/write failure (no partial archive is left behind)
    fn pack(&self, source: &Path, target_dir: &Path, password: &str) -> Result<PathBuf>;

    /// Try to extract the archive without a password.
    ///
    /// A partially written copy is removed before returning, whatever the outcome.
    fn try_extract_unprotected(&self, archive: &Path, dest_dir: &Path) -> Result<Extraction>;

    /// Extract an encrypted archive.
    ///
    /// # Errors
    /// - `ArchiveCorrupt` on a wrong password or malformed archive
    fn extract_with_password(&self, archive: &Path, password: &str, dest_dir: &Path)
        -> Result<PathBuf>;

    /// Extract the archive, probing for an unprotected archive first.
    ///
    /// The extracted file receives the archive's own modification time.
    fn unpack(&self, archive: &Path, password: &str, dest_dir: &Path) -> Result<PathBuf> {
        let extracted = match self.try_extract_unprotected(archive, dest_dir)? {
            Extraction::Extracted(path) => path,
            Extraction::PasswordRequired => {
                self.extract_with_password(archive, password, dest_dir)?
            }
        };

        copy_mtime(archive, &extracted)?;
        Ok(extracted)
    }
}

/// Copy the modification time of `from` onto `to`.
pub fn copy_mtime(from: &Path, to: &Path) -> Result<()> {
    let metadata = std::fs::metadata(from)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    filetime::set_file_mtime(to, mtime)?;
    Ok(())
}
