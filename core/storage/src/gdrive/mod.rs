//! Google Drive remote store for DriveSync.
//!
//! This module provides a store backend using Google Drive with:
//! - OAuth2 authentication with automatic token refresh
//! - Multipart uploads for small archives, resumable uploads for large ones
//! - Paginated listing with an optional page bound

pub mod auth;
pub mod client;
pub mod store;

pub use auth::{AuthConfig, AuthManager, TokenManager, Tokens};
pub use client::DriveClient;
pub use store::{GDriveConfig, GDriveStore};
