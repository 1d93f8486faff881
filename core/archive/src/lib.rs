//! Single-file archive packaging for DriveSync.
//!
//! Every payload that crosses the wire is one local file wrapped in a
//! password-protected zip archive holding exactly one entry. This crate
//! defines the packaging contract the synchronizer depends on and a zip
//! implementation using AES-256 encryption.

pub mod packager;
pub mod zip_packager;

pub use packager::{ArchivePackager, Extraction};
pub use zip_packager::ZipPackager;
