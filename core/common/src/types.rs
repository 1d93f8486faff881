//! Common types used throughout DriveSync.

use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::Zeroize;

/// Suffix carried by every remote file that holds a packaged payload.
pub const ARCHIVE_SUFFIX: &str = ".zip";

/// Name of the archive that stands for a file called `file_name`.
pub fn archive_name(file_name: &str) -> String {
    format!("{}{}", file_name, ARCHIVE_SUFFIX)
}

/// Name of the file an archive unpacks to, if it carries the suffix.
pub fn payload_name(archive_name: &str) -> Option<&str> {
    archive_name
        .strip_suffix(ARCHIVE_SUFFIX)
        .filter(|stem| !stem.is_empty())
}

/// A folder path in the remote store, relative to the store root.
///
/// Both `/` and `\` are accepted as separators when parsing and empty
/// segments are dropped, so `"/a//b/"` and `"\\a\\b"` name the same folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemotePath {
    components: Vec<String>,
}

impl RemotePath {
    /// Create a root path.
    pub fn root() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    /// Create a path from string components.
    ///
    /// # Errors
    /// - Returns error if any component is empty, `.`, `..` or contains a separator
    pub fn from_components(components: Vec<String>) -> crate::Result<Self> {
        for comp in &components {
            validate_component(comp)?;
        }
        Ok(Self { components })
    }

    /// Parse a path string into a RemotePath.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let components = path
            .split(['/', '\\'])
            .filter(|segment| !segment.is_empty())
            .map(String::from)
            .collect();
        Self::from_components(components)
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Get the parent path, if any.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            None
        } else {
            let mut components = self.components.clone();
            components.pop();
            Some(Self { components })
        }
    }

    /// Get the folder name (last component).
    pub fn name(&self) -> Option<&str> {
        self.components.last().map(|s| s.as_str())
    }

    /// Join this path with a child component.
    pub fn join(&self, child: &str) -> crate::Result<Self> {
        validate_component(child)?;
        let mut components = self.components.clone();
        components.push(child.to_string());
        Ok(Self { components })
    }

    /// Join several child components in order.
    pub fn join_all<'a, I>(&self, children: I) -> crate::Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut path = self.clone();
        for child in children {
            path = path.join(child)?;
        }
        Ok(path)
    }

    /// Get the path components.
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Convert to a string representation.
    pub fn to_string_path(&self) -> String {
        if self.is_root() {
            "/".to_string()
        } else {
            format!("/{}", self.components.join("/"))
        }
    }
}

fn validate_component(comp: &str) -> crate::Result<()> {
    if comp.is_empty() {
        return Err(crate::Error::InvalidArgument(
            "Path component cannot be empty".to_string(),
        ));
    }
    if comp == "." || comp == ".." {
        return Err(crate::Error::InvalidArgument(format!(
            "Path component cannot be a relative reference: {}",
            comp
        )));
    }
    if comp.contains('/') || comp.contains('\\') {
        return Err(crate::Error::InvalidArgument(format!(
            "Path component cannot contain separators: {}",
            comp
        )));
    }
    Ok(())
}

impl fmt::Display for RemotePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_path())
    }
}

/// Archive password that is zeroized on drop and never printed.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the secret for handing to a codec.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret([REDACTED])")
    }
}
