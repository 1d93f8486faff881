//! Tree comparison between a local folder and a remote folder.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use drivesync_common::{archive_name, RemotePath, Result};
use drivesync_storage::{RemoteEntry, RemoteStore};

use crate::exclusions::ExclusionSet;
use crate::local::{self, LocalEntry};
use crate::remote::RemoteTree;

/// FIFO sequence of deletion targets gathered while diffing.
#[derive(Debug, Clone)]
pub struct OrphanSet<T> {
    items: VecDeque<T>,
}

impl<T> Default for OrphanSet<T> {
    fn default() -> Self {
        Self {
            items: VecDeque::new(),
        }
    }
}

impl<T> OrphanSet<T> {
    /// Append a target.
    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
    }

    /// Remove and return the oldest target.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> IntoIterator for OrphanSet<T> {
    type Item = T;
    type IntoIter = std::collections::vec_deque::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

/// Remote entry slated for deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Store identifier.
    pub id: String,
    /// Root-relative path, for logging.
    pub path: String,
}

impl RemoteTarget {
    /// Target named `name` inside the folder at `parent`.
    ///
    /// The name is taken as the store reports it, so entries whose names
    /// could never be a path component can still be deleted.
    pub fn new(id: String, parent: &RemotePath, name: &str) -> Self {
        let path = if parent.is_root() {
            format!("/{}", name)
        } else {
            format!("{}/{}", parent, name)
        };
        Self { id, path }
    }
}

/// Local file that must be packed and uploaded.
#[derive(Debug, Clone)]
pub struct UploadCandidate {
    /// File to pack.
    pub source: PathBuf,
    /// Remote folder the archive belongs in; created on demand.
    pub remote_parent: RemotePath,
}

/// Remote archive that must be downloaded and unpacked.
#[derive(Debug, Clone)]
pub struct DownloadItem {
    /// The remote archive.
    pub entry: RemoteEntry,
    /// Local folder the payload is unpacked into.
    pub local_folder: PathBuf,
}

/// Outcome of diffing in the upload direction.
#[derive(Debug, Default)]
pub struct UploadPlan {
    /// Files to transfer, in walk order.
    pub candidates: Vec<UploadCandidate>,
    /// Remote entries with no local counterpart, or stale counterparts.
    pub orphans: OrphanSet<RemoteTarget>,
}

/// Outcome of diffing in the download direction.
#[derive(Debug, Default)]
pub struct DownloadPlan {
    /// Archives to transfer, in walk order.
    pub items: Vec<DownloadItem>,
    /// Local entries with no remote counterpart, or stale counterparts.
    pub orphans: OrphanSet<PathBuf>,
}

/// Whether a destination copy stamped `destination` is current against a
/// source stamped `source`. Equal timestamps count as synced.
pub fn is_up_to_date(destination: DateTime<Utc>, source: DateTime<Utc>) -> bool {
    destination >= source
}

/// Local path a remote entry maps to below `local_dir`.
///
/// `None` for files without the archive suffix and for names that cannot
/// be placed inside `local_dir`.
pub(crate) fn local_target(local_dir: &Path, entry: &RemoteEntry) -> Option<PathBuf> {
    let name = if entry.is_dir() {
        entry.name.as_str()
    } else {
        entry.payload_name()?
    };
    match local::plain_name(name) {
        Some(name) => Some(local_dir.join(name)),
        None => {
            warn!(name = %entry.name, "Skipping remote entry with unsafe name");
            None
        }
    }
}

/// Whether `target` is a local folder that must survive because an excluded
/// path lies below it.
pub(crate) fn shields_folder(
    exclusions: &ExclusionSet,
    candidates: &[LocalEntry],
    target: &Path,
) -> bool {
    candidates.iter().any(|c| c.is_dir() && c.path == target) && exclusions.has_descendant(target)
}

/// Remove and return the first element matching `pred`.
pub(crate) fn take<T>(items: &mut Vec<T>, pred: impl Fn(&T) -> bool) -> Option<T> {
    items.iter().position(pred).map(|i| items.remove(i))
}

/// Walks local and remote trees in lock-step.
pub struct TreeDiffer<'a, S: RemoteStore + ?Sized> {
    tree: &'a RemoteTree<'a, S>,
    exclusions: &'a ExclusionSet,
}

impl<'a, S: RemoteStore + ?Sized> TreeDiffer<'a, S> {
    /// Create a differ over a run's remote view.
    pub fn new(tree: &'a RemoteTree<'a, S>, exclusions: &'a ExclusionSet) -> Self {
        Self { tree, exclusions }
    }

    /// Diff `local_dir` against the remote folder at `remote_path`.
    ///
    /// `remote_id` is `None` when the remote folder does not exist yet;
    /// every file below is then a candidate and nothing is orphaned.
    pub fn diff_upload<'f>(
        &'f self,
        local_dir: PathBuf,
        remote_path: RemotePath,
        remote_id: Option<String>,
        plan: &'f mut UploadPlan,
    ) -> BoxFuture<'f, Result<()>> {
        Box::pin(async move {
            let mut candidates = match &remote_id {
                Some(id) => self.tree.list(id).await?,
                None => Vec::new(),
            };

            for child in local::list_children(&local_dir).await? {
                if self.exclusions.contains(&child.path) {
                    continue;
                }
                let Some(name) = child.name().map(str::to_string) else {
                    warn!(path = %child.path.display(), "Skipping file with non UTF-8 name");
                    continue;
                };
                let child_remote = match remote_path.join(&name) {
                    Ok(path) => path,
                    Err(e) => {
                        warn!(path = %child.path.display(), error = %e, "Skipping unsyncable name");
                        continue;
                    }
                };

                if child.is_dir() {
                    let matched = take(&mut candidates, |e| e.is_dir() && e.name == name);
                    if let Some(folder) = &matched {
                        self.tree.remember(&child_remote, &folder.id);
                    }
                    self.diff_upload(child.path, child_remote, matched.map(|e| e.id), plan)
                        .await?;
                } else {
                    self.diff_upload_file(&child, &name, &remote_path, &mut candidates, plan);
                }
            }

            // Leftovers include stale archives that are being replaced.
            for orphan in candidates {
                plan.orphans
                    .push(RemoteTarget::new(orphan.id, &remote_path, &orphan.name));
            }
            Ok(())
        })
    }

    fn diff_upload_file(
        &self,
        child: &LocalEntry,
        name: &str,
        remote_path: &RemotePath,
        candidates: &mut Vec<RemoteEntry>,
        plan: &mut UploadPlan,
    ) {
        let archive = archive_name(name);
        let current = candidates.iter().position(|e| {
            e.is_file() && e.name == archive && is_up_to_date(e.modified, child.modified)
        });

        match current {
            Some(i) => {
                candidates.remove(i);
            }
            None => {
                debug!(path = %child.path.display(), "Upload needed");
                plan.candidates.push(UploadCandidate {
                    source: child.path.clone(),
                    remote_parent: remote_path.clone(),
                });
            }
        }
    }

    /// Diff the remote folder `remote_id` against `local_dir`.
    ///
    /// Only remote files carrying the archive suffix are considered. Remote
    /// archives whose local target is excluded are skipped, so an excluded
    /// file is neither overwritten nor deleted. So are archives that would
    /// replace a local folder holding an excluded path. Remote names that
    /// do not map to a single local component never reach the filesystem.
    pub fn diff_download<'f>(
        &'f self,
        remote_id: String,
        local_dir: PathBuf,
        plan: &'f mut DownloadPlan,
    ) -> BoxFuture<'f, Result<()>> {
        Box::pin(async move {
            let mut candidates = local::list_children(&local_dir).await?;

            for entry in self.tree.list(&remote_id).await? {
                let Some(target) = local_target(&local_dir, &entry) else {
                    continue;
                };

                if entry.is_dir() {
                    take(&mut candidates, |c| c.is_dir() && c.path == target);
                    self.diff_download(entry.id, target, plan).await?;
                    continue;
                }

                if self.exclusions.contains(&target) {
                    take(&mut candidates, |c| c.path == target);
                    continue;
                }
                if shields_folder(self.exclusions, &candidates, &target) {
                    warn!(
                        path = %target.display(),
                        "Skipping archive that would replace a folder holding excluded paths"
                    );
                    continue;
                }

                let current = take(&mut candidates, |c| {
                    c.is_file() && c.path == target && is_up_to_date(c.modified, entry.modified)
                });
                if current.is_none() {
                    debug!(name = %entry.name, "Download needed");
                    plan.items.push(DownloadItem {
                        entry,
                        local_folder: local_dir.clone(),
                    });
                }
            }

            for orphan in candidates {
                plan.orphans.push(orphan.path);
            }
            Ok(())
        })
    }

    /// Plan an upload of specific paths below `local_root`.
    ///
    /// Directories get the normal recursive diff. Files skip the freshness
    /// check and are always re-sent; an existing archive of the same name is
    /// queued for deletion. Excluded paths and paths outside `local_root`
    /// are skipped.
    pub async fn diff_upload_paths(
        &self,
        local_root: &Path,
        remote_dest: &RemotePath,
        paths: &[PathBuf],
        plan: &mut UploadPlan,
    ) -> Result<()> {
        for path in paths {
            if self.exclusions.contains(path) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(local_root) else {
                warn!(path = %path.display(), "Skipping path outside the local root");
                continue;
            };
            let Some(entry) = local::stat(path).await? else {
                warn!(path = %path.display(), "Skipping missing path");
                continue;
            };

            let remote_path = remote_dest.join_all(relative_components(relative)?)?;

            if entry.is_dir() {
                let remote_id = self.tree.resolve(&remote_path).await?;
                self.diff_upload(entry.path, remote_path, remote_id, plan)
                    .await?;
                continue;
            }

            let (Some(remote_parent), Some(name)) = (remote_path.parent(), remote_path.name())
            else {
                continue;
            };
            let archive = archive_name(name);
            if let Some(parent_id) = self.tree.resolve(&remote_parent).await? {
                if let Some(id) = self.tree.file_id(&archive, &parent_id).await? {
                    plan.orphans
                        .push(RemoteTarget::new(id, &remote_parent, &archive));
                }
            }
            plan.candidates.push(UploadCandidate {
                source: entry.path,
                remote_parent,
            });
        }
        Ok(())
    }
}

/// UTF-8 components of a relative path.
fn relative_components(relative: &Path) -> Result<Vec<&str>> {
    relative
        .components()
        .map(|c| {
            c.as_os_str().to_str().ok_or_else(|| {
                drivesync_common::Error::InvalidArgument(format!(
                    "Path is not valid UTF-8: {}",
                    relative.display()
                ))
            })
        })
        .collect()
}
