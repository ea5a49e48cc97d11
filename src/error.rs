//! Error types for bcba-sync

use thiserror::Error;

/// Errors raised by an entity store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Session {0} has already ended")]
    AlreadyEnded(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid snapshot JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while exporting the live store
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to read {kind} from store: {source}")]
    StoreRead {
        kind: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Failed to encode backup: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that abort an import
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Backup schema version {found} is newer than supported version {supported}")]
    IncompatibleSchema { found: u32, supported: u32 },

    #[error("Store transaction failed: {0}")]
    Store(#[from] StoreError),

    #[error("Malformed backup document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Errors surfaced by a remote backup store
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Not signed in")]
    NotSignedIn,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Remote file not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level error for backup service operations
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Export(#[from] ExportError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}
