//! Read-only check answering "would a download change anything?".

use futures::future::BoxFuture;
use std::path::PathBuf;
use tracing::debug;

use drivesync_common::Result;
use drivesync_storage::RemoteStore;

use crate::diff::{is_up_to_date, local_target, shields_folder, take};
use crate::exclusions::ExclusionSet;
use crate::local::{self, LocalEntry};
use crate::remote::RemoteTree;

/// Walks the trees like a download diff, stopping at the first difference.
///
/// Never creates, deletes or modifies anything on either side.
pub struct ChangeDetector<'a, S: RemoteStore + ?Sized> {
    tree: &'a RemoteTree<'a, S>,
    exclusions: &'a ExclusionSet,
}

impl<'a, S: RemoteStore + ?Sized> ChangeDetector<'a, S> {
    /// Create a detector over a run's remote view.
    pub fn new(tree: &'a RemoteTree<'a, S>, exclusions: &'a ExclusionSet) -> Self {
        Self { tree, exclusions }
    }

    /// Check whether syncing `remote_id` down into `local_dir` would
    /// transfer or delete anything.
    pub fn has_changes<'f>(&'f self, remote_id: String, local_dir: PathBuf) -> BoxFuture<'f, Result<bool>> {
        Box::pin(async move {
            let mut candidates = local::list_children(&local_dir).await?;

            for entry in self.tree.list(&remote_id).await? {
                let Some(target) = local_target(&local_dir, &entry) else {
                    continue;
                };

                if entry.is_dir() {
                    take(&mut candidates, |c| c.is_dir() && c.path == target);
                    if self.has_changes(entry.id, target).await? {
                        return Ok(true);
                    }
                    continue;
                }

                if self.exclusions.contains(&target) {
                    take(&mut candidates, |c| c.path == target);
                    continue;
                }
                if shields_folder(self.exclusions, &candidates, &target) {
                    continue;
                }

                let current = take(&mut candidates, |c| {
                    c.is_file() && c.path == target && is_up_to_date(c.modified, entry.modified)
                });
                if current.is_none() {
                    debug!(name = %entry.name, "Remote change found");
                    return Ok(true);
                }
            }

            for orphan in candidates {
                if self.would_delete(orphan).await? {
                    debug!("Local orphan found");
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }

    /// Whether the deletion phase would remove anything for this orphan.
    fn would_delete(&self, entry: LocalEntry) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            if self.exclusions.contains(&entry.path) {
                return Ok(false);
            }
            if entry.is_file() || !self.exclusions.has_descendant(&entry.path) {
                return Ok(true);
            }
            for child in local::list_children(&entry.path).await? {
                if self.would_delete(child).await? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }
}
