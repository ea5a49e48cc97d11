//! In-process remote store
//!
//! Behaves like the Drive backend (folders by name, server-assigned ids and
//! creation times, trashed files hidden from listings) without a network.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RemoteBackupHandle, RemoteStore};
use crate::clock::{Clock, SystemClock};
use crate::error::RemoteError;

#[derive(Debug, Clone)]
struct StoredFile {
    name: String,
    folder_id: String,
    created_at: DateTime<Utc>,
    bytes: Vec<u8>,
    trashed: bool,
}

#[derive(Debug, Default)]
struct RemoteState {
    /// Folder name → folder id
    folders: BTreeMap<String, String>,
    files: BTreeMap<String, StoredFile>,
    next_id: u64,
    last_created: Option<DateTime<Utc>>,
    failing_deletes: HashSet<String>,
}

impl RemoteState {
    fn allocate_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Creation times are strictly increasing, like server-assigned stamps
    fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let stamp = match self.last_created {
            Some(last) if now <= last => last + Duration::seconds(1),
            _ => now,
        };
        self.last_created = Some(stamp);
        stamp
    }
}

/// Remote store kept entirely in memory
pub struct MemoryRemote {
    state: Mutex<RemoteState>,
    signed_in: AtomicBool,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    /// Create an empty, signed-in remote
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RemoteState::default()),
            signed_in: AtomicBool::new(true),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_signed_in(&self, signed_in: bool) {
        self.signed_in.store(signed_in, Ordering::SeqCst);
    }

    /// Make deletes of `file_id` fail with a server error
    pub fn fail_delete(&self, file_id: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_deletes.insert(file_id.to_string());
        }
    }

    /// Move a file to the trash
    pub fn trash(&self, file_id: &str) -> Result<(), RemoteError> {
        let mut state = self.lock()?;
        let file = state
            .files
            .get_mut(file_id)
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))?;
        file.trashed = true;
        Ok(())
    }

    /// Add a file with an explicit creation time
    pub fn insert_file(
        &self,
        folder_id: &str,
        name: &str,
        created_at: DateTime<Utc>,
        bytes: Vec<u8>,
    ) -> Result<String, RemoteError> {
        let mut state = self.lock()?;
        let id = state.allocate_id("file");
        state.files.insert(
            id.clone(),
            StoredFile {
                name: name.to_string(),
                folder_id: folder_id.to_string(),
                created_at,
                bytes,
                trashed: false,
            },
        );
        Ok(id)
    }

    /// Names of the non-trashed files in a folder, oldest first
    pub fn file_names(&self, folder_id: &str) -> Vec<String> {
        let Ok(state) = self.state.lock() else {
            return Vec::new();
        };
        let mut files: Vec<&StoredFile> = state
            .files
            .values()
            .filter(|f| f.folder_id == folder_id && !f.trashed)
            .collect();
        files.sort_by(|a, b| (a.created_at, &a.name).cmp(&(b.created_at, &b.name)));
        files.into_iter().map(|f| f.name.clone()).collect()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RemoteState>, RemoteError> {
        self.state
            .lock()
            .map_err(|_| RemoteError::InvalidResponse("remote state poisoned".to_string()))
    }

    fn require_sign_in(&self) -> Result<(), RemoteError> {
        if self.signed_in.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RemoteError::NotSignedIn)
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn ensure_folder(&self, name: &str) -> Result<String, RemoteError> {
        self.require_sign_in()?;
        let mut state = self.lock()?;
        if let Some(id) = state.folders.get(name) {
            return Ok(id.clone());
        }
        let id = state.allocate_id("folder");
        state.folders.insert(name.to_string(), id.clone());
        Ok(id)
    }

    async fn upload(&self, bytes: Vec<u8>, filename: &str, folder_id: &str) -> Result<String, RemoteError> {
        self.require_sign_in()?;
        let mut state = self.lock()?;
        let created_at = state.stamp(self.clock.now());
        let id = state.allocate_id("file");
        state.files.insert(
            id.clone(),
            StoredFile {
                name: filename.to_string(),
                folder_id: folder_id.to_string(),
                created_at,
                bytes,
                trashed: false,
            },
        );
        Ok(id)
    }

    async fn list(&self, folder_id: &str) -> Result<Vec<RemoteBackupHandle>, RemoteError> {
        self.require_sign_in()?;
        let state = self.lock()?;
        Ok(state
            .files
            .iter()
            .filter(|(_, f)| f.folder_id == folder_id && !f.trashed)
            .map(|(id, f)| RemoteBackupHandle {
                id: id.clone(),
                name: f.name.clone(),
                created_at: f.created_at,
                size_bytes: Some(f.bytes.len() as u64),
            })
            .collect())
    }

    async fn fetch(&self, file_id: &str) -> Result<Vec<u8>, RemoteError> {
        self.require_sign_in()?;
        let state = self.lock()?;
        state
            .files
            .get(file_id)
            .filter(|f| !f.trashed)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }

    async fn delete(&self, file_id: &str) -> Result<(), RemoteError> {
        self.require_sign_in()?;
        let mut state = self.lock()?;
        if state.failing_deletes.contains(file_id) {
            return Err(RemoteError::Server {
                status: 500,
                message: format!("cannot delete {file_id}"),
            });
        }
        state
            .files
            .remove(file_id)
            .map(|_| ())
            .ok_or_else(|| RemoteError::NotFound(file_id.to_string()))
    }
}
