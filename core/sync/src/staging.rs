//! Local staging area for transient archives.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use drivesync_common::{Error, Result};

/// Prefix of per-run directories under the staging root.
const RUN_PREFIX: &str = "run-";

/// Per-run scratch directory for archives on their way in or out.
///
/// Every artifact gets its own sub-directory so two sources with the same
/// file name never share a path. The whole run directory is removed when
/// the run ends, or when the area is dropped without being removed (for
/// example when a caller abandons a run future).
#[derive(Debug)]
pub struct StagingArea {
    run_dir: PathBuf,
}

impl StagingArea {
    /// Create a fresh run directory under `root`.
    pub async fn create(root: impl AsRef<Path>) -> Result<Self> {
        let run_dir = root
            .as_ref()
            .join(format!("{}{}", RUN_PREFIX, Uuid::new_v4()));
        fs::create_dir_all(&run_dir).await.map_err(Error::Io)?;
        debug!(dir = %run_dir.display(), "Created staging directory");
        Ok(Self { run_dir })
    }

    /// Directory holding this run's artifacts.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Create an empty, uniquely named slot for one artifact.
    pub async fn slot(&self) -> Result<PathBuf> {
        let slot = self.run_dir.join(Uuid::new_v4().simple().to_string());
        fs::create_dir(&slot).await.map_err(Error::Io)?;
        Ok(slot)
    }

    /// Remove the run directory and everything in it.
    pub async fn remove(self) -> Result<()> {
        match fs::remove_dir_all(&self.run_dir).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(Error::Io(e)),
            _ => Ok(()),
        }
    }

    /// Remove the run directory, logging instead of failing.
    pub async fn discard(self) {
        let dir = self.run_dir.clone();
        if let Err(e) = self.remove().await {
            warn!(dir = %dir.display(), error = %e, "Failed to clean up staging directory");
        }
    }

    /// Remove run directories left under `root` by processes that died mid-run.
    ///
    /// Must not be called while another run uses the same root.
    pub async fn purge_stale(root: impl AsRef<Path>) -> Result<usize> {
        let mut entries = match fs::read_dir(root.as_ref()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut cleaned = 0;
        while let Some(entry) = entries.next_entry().await.map_err(Error::Io)? {
            let is_run = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(RUN_PREFIX));
            if is_run && entry.file_type().await.map_err(Error::Io)?.is_dir() {
                fs::remove_dir_all(entry.path()).await.map_err(Error::Io)?;
                cleaned += 1;
            }
        }

        Ok(cleaned)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.run_dir) {
            Err(e) if e.kind() != ErrorKind::NotFound => {
                warn!(dir = %self.run_dir.display(), error = %e, "Failed to clean up staging directory");
            }
            _ => {}
        }
    }
}
