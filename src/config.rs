//! Sync configuration
//!
//! Loaded from TOML; every field has a default so a partial file is fine.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::remote::{DriveConfig, DEFAULT_REFRESH_WINDOW_SECS};
use crate::retention::DEFAULT_RETENTION_CAP;
use crate::schema::DEFAULT_FILE_PREFIX;
use crate::APP_VERSION;

/// Name of the remote folder holding backups
pub const DEFAULT_FOLDER_NAME: &str = "BCBA Tracker Backups";

/// Google OAuth token endpoint
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub folder_name: String,
    pub file_prefix: String,
    /// Remote backups kept after pruning
    pub retention_cap: usize,
    pub device_name: String,
    pub app_version: String,
    /// Refresh credentials this close to expiry
    pub refresh_window_secs: i64,
    pub request_timeout_secs: u64,
    pub drive_api_base: String,
    pub drive_upload_base: String,
    pub token_url: String,
    pub client_id: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let drive = DriveConfig::default();
        Self {
            folder_name: DEFAULT_FOLDER_NAME.to_string(),
            file_prefix: DEFAULT_FILE_PREFIX.to_string(),
            retention_cap: DEFAULT_RETENTION_CAP,
            device_name: "Unknown Device".to_string(),
            app_version: APP_VERSION.to_string(),
            refresh_window_secs: DEFAULT_REFRESH_WINDOW_SECS,
            request_timeout_secs: drive.timeout_secs,
            drive_api_base: drive.api_base,
            drive_upload_base: drive.upload_base,
            token_url: DEFAULT_TOKEN_URL.to_string(),
            client_id: None,
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention_cap == 0 {
            return Err(ConfigError::Invalid("retention_cap must be at least 1".to_string()));
        }
        if self.folder_name.trim().is_empty() {
            return Err(ConfigError::Invalid("folder_name must not be empty".to_string()));
        }
        if self.file_prefix.is_empty() {
            return Err(ConfigError::Invalid("file_prefix must not be empty".to_string()));
        }
        if self.refresh_window_secs < 0 {
            return Err(ConfigError::Invalid("refresh_window_secs must not be negative".to_string()));
        }
        Ok(())
    }

    pub fn refresh_window(&self) -> Duration {
        Duration::seconds(self.refresh_window_secs)
    }

    pub fn drive_config(&self) -> DriveConfig {
        DriveConfig {
            api_base: self.drive_api_base.clone(),
            upload_base: self.drive_upload_base.clone(),
            timeout_secs: self.request_timeout_secs,
        }
    }
}
