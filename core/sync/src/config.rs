//! Synchronization settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use drivesync_common::{Error, Result};

use crate::retry::RetryConfig;

/// Largest page a listing may request.
pub const MAX_PAGE_SIZE: u16 = 1000;

/// Configuration for a [`crate::SyncEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound on entries fetched per folder listing (1-1000).
    ///
    /// `None` or `Some(0)` follows pagination to the end. A bound fetches
    /// only the first page, which is faster but misses entries in large folders.
    pub page_size: Option<u16>,
    /// Retries for read-only remote calls that fail with a network error.
    pub max_retries: u32,
    /// Directory for transient archives. Defaults to the user cache directory.
    pub staging_dir: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: None,
            max_retries: 3,
            staging_dir: None,
        }
    }
}

impl SyncConfig {
    /// Check the settings are usable.
    ///
    /// # Errors
    /// - `InvalidArgument` if `page_size` exceeds [`MAX_PAGE_SIZE`]
    pub fn validate(&self) -> Result<()> {
        match self.page_size {
            Some(size) if size > MAX_PAGE_SIZE => Err(Error::InvalidArgument(format!(
                "Page size must be between 1 and {} or 0 for unbounded, got {}",
                MAX_PAGE_SIZE, size
            ))),
            _ => Ok(()),
        }
    }

    /// Page bound to hand to the store, `None` when unbounded.
    pub fn page_limit(&self) -> Option<u16> {
        self.page_size.filter(|&size| size > 0)
    }

    /// Root directory under which each run creates its staging directory.
    pub fn staging_root(&self) -> PathBuf {
        self.staging_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("drivesync")
                .join("staging")
        })
    }

    /// Retry policy for read-only remote calls.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(self.max_retries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_bounds() {
        let mut config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.page_limit(), None);

        config.page_size = Some(0);
        assert!(config.validate().is_ok());
        assert_eq!(config.page_limit(), None);

        config.page_size = Some(1000);
        assert!(config.validate().is_ok());
        assert_eq!(config.page_limit(), Some(1000));

        config.page_size = Some(1001);
        assert!(matches!(config.validate(), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_staging_root_override() {
        let config = SyncConfig {
            staging_dir: Some(PathBuf::from("/tmp/stage")),
            ..Default::default()
        };
        assert_eq!(config.staging_root(), PathBuf::from("/tmp/stage"));
        assert!(SyncConfig::default().staging_root().ends_with("drivesync/staging"));
    }

    #[test]
    fn test_partial_config_deserializes() {
        let config: SyncConfig = serde_json::from_str(r#"{"page_size": 200}"#).unwrap();
        assert_eq!(config.page_size, Some(200));
        assert_eq!(config.max_retries, 3);
    }
}
