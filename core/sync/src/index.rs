//! Resolved remote paths for a single run.

use std::collections::HashMap;

use drivesync_common::RemotePath;

/// Map from root-relative remote folder paths to store identifiers.
///
/// A path, once resolved, keeps its identifier for the lifetime of the
/// index. Each run builds a fresh index.
#[derive(Debug, Clone)]
pub struct PathIndex {
    ids: HashMap<RemotePath, String>,
}

impl PathIndex {
    /// Create an index that knows only the store root.
    pub fn new(root_id: impl Into<String>) -> Self {
        let mut ids = HashMap::new();
        ids.insert(RemotePath::root(), root_id.into());
        Self { ids }
    }

    /// Identifier previously recorded for `path`.
    pub fn get(&self, path: &RemotePath) -> Option<&str> {
        self.ids.get(path).map(String::as_str)
    }

    /// Record an identifier, keeping the first one seen for the path.
    ///
    /// Returns the identifier now associated with the path.
    pub fn insert(&mut self, path: RemotePath, id: impl Into<String>) -> &str {
        self.ids.entry(path).or_insert_with(|| id.into())
    }

    /// Number of resolved paths, including the root.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Always false; the root is known from construction.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
