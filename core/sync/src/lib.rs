//! DriveSync Sync Engine
//!
//! Directional mirroring between a local folder tree and a remote store:
//! - Upload and download runs that diff both trees from scratch
//! - Orphan deletion on the destination side, with exclusions
//! - Per-file password-protected archives staged on local disk
//! - Total-size and monotonic progress events
//! - Read-only change detection

pub mod config;
pub mod detect;
pub mod diff;
pub mod engine;
pub mod exclusions;
pub mod index;
pub mod local;
pub mod progress;
pub mod queue;
pub mod remote;
pub mod retry;
pub mod staging;
pub mod transfer;

// Re-export main types
pub use config::{SyncConfig, MAX_PAGE_SIZE};
pub use detect::ChangeDetector;
pub use diff::{DownloadPlan, OrphanSet, TreeDiffer, UploadPlan};
pub use engine::{SyncEngine, SyncReport};
pub use exclusions::ExclusionSet;
pub use local::LocalEntry;
pub use progress::{ProgressHub, SyncEvent};
pub use queue::{TransferQueue, Transport};
pub use retry::{RetryConfig, RetryExecutor};
pub use staging::StagingArea;
