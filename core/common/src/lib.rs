//! Common utilities and types shared across DriveSync crates.
//!
//! This module provides the error taxonomy used by every layer of the
//! synchronizer and the small value types that cross crate boundaries.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{archive_name, payload_name, RemotePath, Secret, ARCHIVE_SUFFIX};
