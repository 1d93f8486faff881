//! Local paths shielded from deletion.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Set of local paths a sync run must never delete.
///
/// Paths are stored in absolute form so that relative and absolute
/// spellings of the same location match.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    paths: HashSet<PathBuf>,
}

impl ExclusionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a path. Returns false if it was already present.
    pub fn add(&mut self, path: impl AsRef<Path>) -> bool {
        self.paths.insert(normalize(path.as_ref()))
    }

    /// Remove a path. Returns false if it was not present.
    pub fn remove(&mut self, path: impl AsRef<Path>) -> bool {
        self.paths.remove(&normalize(path.as_ref()))
    }

    /// Remove every path.
    pub fn clear(&mut self) {
        self.paths.clear();
    }

    /// Check if the exact path is excluded.
    pub fn contains(&self, path: &Path) -> bool {
        self.paths.contains(&normalize(path))
    }

    /// Check if some excluded path lies strictly below `dir`.
    pub fn has_descendant(&self, dir: &Path) -> bool {
        let dir = normalize(dir);
        self.paths
            .iter()
            .any(|excluded| excluded != &dir && excluded.starts_with(&dir))
    }

    /// Iterate over excluded paths.
    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    /// Number of excluded paths.
    pub fn len(&self) -> usize {
        self.paths.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Absolute form of `path`, falling back to the path itself.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
