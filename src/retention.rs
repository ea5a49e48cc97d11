//! Remote backup retention
//!
//! After each upload the oldest backups beyond the cap are deleted. Pruning is
//! best-effort: failures are logged and never reach the caller.

use serde::Serialize;
use tracing::{info, warn};

use crate::remote::{RemoteBackupHandle, RemoteStore};

/// Default number of remote backups to keep
pub const DEFAULT_RETENTION_CAP: usize = 10;

/// Outcome of one pruning pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    /// Backups remaining after the pass (as far as this pass knows)
    pub kept: usize,
    /// Ids of deleted backups, oldest first
    pub deleted: Vec<String>,
    /// Ids whose deletion failed
    pub failed: Vec<String>,
}

/// Keeps at most `cap` backups in the remote folder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    cap: usize,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION_CAP)
    }
}

impl RetentionPolicy {
    pub fn new(cap: usize) -> Self {
        Self { cap }
    }

    /// Handles beyond the cap, oldest first
    pub fn surplus(&self, mut handles: Vec<RemoteBackupHandle>) -> Vec<RemoteBackupHandle> {
        handles.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        let excess = handles.len().saturating_sub(self.cap);
        handles.truncate(excess);
        handles
    }

    /// Delete the oldest backups in `folder_id` until at most `cap` remain
    pub async fn prune(&self, remote: &dyn RemoteStore, folder_id: &str) -> RetentionReport {
        let handles = match remote.list(folder_id).await {
            Ok(handles) => handles,
            Err(e) => {
                warn!(folder_id, error = %e, "Could not list backups for pruning");
                return RetentionReport::default();
            }
        };

        let total = handles.len();
        let mut report = RetentionReport::default();

        for handle in self.surplus(handles) {
            match remote.delete(&handle.id).await {
                Ok(()) => report.deleted.push(handle.id),
                Err(e) => {
                    warn!(
                        remote_file_id = %handle.id,
                        name = %handle.name,
                        error = %e,
                        "Failed to prune backup"
                    );
                    report.failed.push(handle.id);
                }
            }
        }

        report.kept = total - report.deleted.len();
        if !report.deleted.is_empty() {
            info!(
                folder_id,
                deleted = report.deleted.len(),
                kept = report.kept,
                "Pruned old backups"
            );
        }
        report
    }
}
