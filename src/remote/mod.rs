//! Remote backup storage
//!
//! Backups are stored as opaque files inside one well-known folder of a
//! folder-based object store. [`RemoteStore`] is the seam; [`DriveClient`]
//! talks to Google Drive and [`MemoryRemote`] keeps everything in process.

pub mod auth;
mod drive;
mod memory;

pub use auth::{AuthSession, Credential, OAuthRefresher, TokenRefresher, DEFAULT_REFRESH_WINDOW_SECS};
pub use drive::{DriveClient, DriveConfig, FOLDER_MIME_TYPE};
pub use memory::MemoryRemote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::RemoteError;

/// Reference to a backup file held by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteBackupHandle {
    /// Remote file id
    pub id: String,
    /// File name as stored
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: Option<u64>,
}

impl RemoteBackupHandle {
    /// Human-readable label, e.g. "Jan 15, 2024 at 14:00"
    pub fn display_name(&self) -> String {
        self.created_at.format("%b %-d, %Y at %H:%M").to_string()
    }
}

/// Folder-based object store holding backup files
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Find the folder with exactly this name, creating it if absent
    async fn ensure_folder(&self, name: &str) -> Result<String, RemoteError>;

    /// Store a new file in the folder and return its id. Never overwrites.
    async fn upload(&self, bytes: Vec<u8>, filename: &str, folder_id: &str) -> Result<String, RemoteError>;

    /// List the folder's non-trashed files
    async fn list(&self, folder_id: &str) -> Result<Vec<RemoteBackupHandle>, RemoteError>;

    /// Download a file's contents
    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, RemoteError>;

    /// Delete a file. A missing file is reported as [`RemoteError::NotFound`].
    async fn delete(&self, file_id: &str) -> Result<(), RemoteError>;
}
