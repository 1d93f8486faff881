//! Remote store abstraction for DriveSync.
//!
//! This module provides the client contract the synchronizer consumes
//! (id-addressed listing, lookup, streamed transfer, folder creation and
//! deletion), an in-memory store for tests and a Google Drive backend.
//!
//! # Design Principles
//! - Id-addressed: path resolution lives in the sync layer, not here
//! - Async operations: All I/O operations are async
//! - Streaming support: Payloads move as byte streams
//! - Unified error semantics: Consistent error types across stores

pub mod gdrive;
pub mod memory;
pub mod provider;

pub use memory::MemoryStore;
pub use drivesync_common::ARCHIVE_SUFFIX;
pub use provider::{ByteStream, EntryKind, RemoteEntry, RemoteStore};
