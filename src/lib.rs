//! BCBA Sync - Backup, restore and cloud sync for behavior data collection records
//!
//! Snapshots the local record store (students, programs, sessions, behaviors)
//! into a versioned JSON backup document, restores such documents with a
//! chosen merge strategy, and keeps a capped set of backups in a remote folder:
//! store → export → encode → upload → prune, and fetch → decode → import.
//!
//! ## Modules
//!
//! - **Store**: Entity store seam plus an in-memory implementation
//! - **Schema**: Backup document wire format and canonical encoding
//! - **Exporter / Importer**: Snapshot and restore with Merge, Replace or Skip
//! - **Remote**: Remote folder seam, Google Drive client and credential session
//! - **Service**: Upload, list, restore, delete and retention in one place

pub mod clock;
pub mod config;
pub mod error;
pub mod exporter;
pub mod importer;
pub mod remote;
pub mod retention;
pub mod schema;
pub mod service;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use config::SyncConfig;
pub use error::{BackupError, ConfigError, ExportError, ImportError, RemoteError, StoreError};
pub use exporter::Exporter;
pub use importer::{ImportStrategy, ImportSummary, Importer};
pub use retention::{RetentionPolicy, RetentionReport};
pub use service::{BackupService, SyncProgress, SyncStage, UploadOutcome};
pub use store::{ChangeSet, EntityStore, MemoryStore};

// Schema exports
pub use schema::{BackupDocument, BackupMetadata, CURRENT_SCHEMA_VERSION};

// Remote exports
pub use remote::{AuthSession, Credential, DriveClient, MemoryRemote, RemoteBackupHandle, RemoteStore};

/// Library version, recorded as `appVersion` when the host does not supply one
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name used in logs and the CLI
pub const PRODUCER_NAME: &str = "bcba-sync";
