//! Backup service
//!
//! This module provides the public API for backing up and restoring.
//! It composes the exporter, importer, remote store and retention policy:
//!
//! upload:  export → encode → provision folder → upload → prune
//! restore: fetch → decode → import

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::clock::Clock;
use crate::config::SyncConfig;
use crate::error::{BackupError, ExportError, ImportError, RemoteError};
use crate::exporter::Exporter;
use crate::importer::{ImportStrategy, ImportSummary, Importer};
use crate::remote::{RemoteBackupHandle, RemoteStore};
use crate::retention::{RetentionPolicy, RetentionReport};
use crate::schema::{backup_filename, decode_document, encode_document, BackupDocument, BackupMetadata};
use crate::store::EntityStore;

/// Stage of a multi-step operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    Exporting,
    Provisioning,
    Uploading,
    Pruning,
    Downloading,
    Importing,
    Done,
}

/// Advisory progress for a running operation
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SyncProgress {
    pub stage: SyncStage,
    /// Overall completion in `0.0..=1.0`
    pub fraction: f64,
}

impl SyncProgress {
    fn new(stage: SyncStage, fraction: f64) -> Self {
        Self { stage, fraction }
    }
}

/// Result of a successful upload
#[derive(Debug, Clone, Serialize)]
pub struct UploadOutcome {
    pub remote_file_id: String,
    pub filename: String,
    /// Metadata of the uploaded document, tagged with `remote_file_id`
    pub metadata: BackupMetadata,
    pub retention: RetentionReport,
}

/// Backup/restore service. Construct once and share by reference.
pub struct BackupService {
    exporter: Exporter,
    importer: Importer,
    remote: Arc<dyn RemoteStore>,
    retention: RetentionPolicy,
    folder_name: String,
    file_prefix: String,
}

impl BackupService {
    pub fn new(store: Arc<dyn EntityStore>, remote: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        Self {
            exporter: Exporter::new(store.clone(), &config.device_name, &config.app_version),
            importer: Importer::new(store),
            remote,
            retention: RetentionPolicy::new(config.retention_cap),
            folder_name: config.folder_name.clone(),
            file_prefix: config.file_prefix.clone(),
        }
    }

    /// Replace the exporter's time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.exporter = self.exporter.with_clock(clock);
        self
    }

    /// Export the store, upload it and prune old backups
    pub async fn upload_backup(
        &self,
        on_progress: &mut (dyn FnMut(SyncProgress) + Send),
    ) -> Result<UploadOutcome, BackupError> {
        let document = self
            .exporter
            .export_with_progress(&mut |fraction: f64| {
                on_progress(SyncProgress::new(SyncStage::Exporting, fraction * 0.5))
            })
            .await?;
        let bytes = encode_document(&document).map_err(ExportError::from)?;
        let filename = backup_filename(&self.file_prefix, document.metadata.created_at);

        on_progress(SyncProgress::new(SyncStage::Provisioning, 0.55));
        let folder_id = self.remote.ensure_folder(&self.folder_name).await?;

        on_progress(SyncProgress::new(SyncStage::Uploading, 0.6));
        let remote_file_id = self.remote.upload(bytes, &filename, &folder_id).await?;
        let uploaded = document.with_drive_file_id(&remote_file_id);

        on_progress(SyncProgress::new(SyncStage::Pruning, 0.9));
        let retention = self.retention.prune(self.remote.as_ref(), &folder_id).await;

        on_progress(SyncProgress::new(SyncStage::Done, 1.0));
        info!(
            remote_file_id = %remote_file_id,
            filename = %filename,
            pruned = retention.deleted.len(),
            "Backup uploaded"
        );

        Ok(UploadOutcome {
            remote_file_id,
            filename,
            metadata: uploaded.metadata,
            retention,
        })
    }

    /// Remote backups, newest first
    pub async fn list_backups(&self) -> Result<Vec<RemoteBackupHandle>, BackupError> {
        let folder_id = self.remote.ensure_folder(&self.folder_name).await?;
        let mut handles = self.remote.list(&folder_id).await?;
        handles.sort_by(|a, b| (b.created_at, &b.name).cmp(&(a.created_at, &a.name)));
        Ok(handles)
    }

    /// Download and decode a remote backup without importing it
    pub async fn fetch_backup(&self, remote_file_id: &str) -> Result<BackupDocument, BackupError> {
        let bytes = self.remote.fetch(remote_file_id).await?;
        let document = decode_document(&bytes).map_err(ImportError::from)?;
        Ok(document.with_drive_file_id(remote_file_id))
    }

    /// Download a remote backup and import it into the store
    pub async fn restore_backup(
        &self,
        remote_file_id: &str,
        strategy: ImportStrategy,
        on_progress: &mut (dyn FnMut(SyncProgress) + Send),
    ) -> Result<ImportSummary, BackupError> {
        on_progress(SyncProgress::new(SyncStage::Downloading, 0.0));
        let document = self.fetch_backup(remote_file_id).await?;

        on_progress(SyncProgress::new(SyncStage::Importing, 0.5));
        let summary = self.importer.import(&document, strategy).await?;

        on_progress(SyncProgress::new(SyncStage::Done, 1.0));
        info!(remote_file_id, strategy = strategy.as_str(), "Backup restored");
        Ok(summary)
    }

    /// Delete a remote backup; an already-missing file counts as deleted
    pub async fn delete_backup(&self, remote_file_id: &str) -> Result<(), BackupError> {
        match self.remote.delete(remote_file_id).await {
            Ok(()) => Ok(()),
            Err(RemoteError::NotFound(_)) => {
                info!(remote_file_id, "Backup already gone");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Run the retention policy on its own
    pub async fn prune(&self) -> Result<RetentionReport, BackupError> {
        let folder_id = self.remote.ensure_folder(&self.folder_name).await?;
        Ok(self.retention.prune(self.remote.as_ref(), &folder_id).await)
    }

    /// Export the store to a local file
    pub async fn export_local(&self, path: &Path) -> Result<BackupMetadata, BackupError> {
        let document = self.exporter.export().await?;
        let bytes = encode_document(&document).map_err(ExportError::from)?;
        tokio::fs::write(path, bytes).await?;
        info!(path = %path.display(), "Backup written");
        Ok(document.metadata)
    }

    /// Import a local backup file into the store
    pub async fn import_local(
        &self,
        path: &Path,
        strategy: ImportStrategy,
    ) -> Result<ImportSummary, BackupError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(self.importer.import_bytes(&bytes, strategy).await?)
    }
}
