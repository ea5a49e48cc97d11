//! Backup export
//!
//! Walks the live store and flattens it into a [`BackupDocument`]:
//! students → programs → sessions → behaviors, each ordered by creation time.
//! Exporting is read-only and all-or-nothing.

use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::error::{ExportError, StoreError};
use crate::schema::{
    canonicalize, encode_document, BackupDocument, BackupMetadata, BehaviorRecord, ProgramRecord,
    SessionRecord, StudentRecord, CURRENT_SCHEMA_VERSION,
};
use crate::store::EntityStore;
use crate::types::EntityKind;

/// Namespace for content-derived backup ids
const BACKUP_ID_NAMESPACE: Uuid = Uuid::from_u128(0x5f0c_8a8e_2d4b_4c1a_9b7e_3a61_d2c4_e8f1);

/// Upper bound on re-encodes while settling `fileSizeBytes`
const MAX_SIZE_PASSES: usize = 4;

/// Exporter for the live entity store
pub struct Exporter {
    store: Arc<dyn EntityStore>,
    clock: Arc<dyn Clock>,
    device_name: String,
    app_version: String,
}

impl Exporter {
    /// Create an exporter using the system clock
    pub fn new(
        store: Arc<dyn EntityStore>,
        device_name: impl Into<String>,
        app_version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            device_name: device_name.into(),
            app_version: app_version.into(),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Export the store into a backup document
    pub async fn export(&self) -> Result<BackupDocument, ExportError> {
        self.export_with_progress(&mut |_: f64| {}).await
    }

    /// Export the store, reporting advisory progress in `0.0..=1.0`
    pub async fn export_with_progress(
        &self,
        on_progress: &mut (dyn FnMut(f64) + Send),
    ) -> Result<BackupDocument, ExportError> {
        on_progress(0.0);

        let mut students = self
            .store
            .fetch_students()
            .await
            .map_err(read_error(EntityKind::Student))?;
        students.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        on_progress(0.2);

        let mut programs = self
            .store
            .fetch_programs()
            .await
            .map_err(read_error(EntityKind::Program))?;
        programs.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        on_progress(0.4);

        let mut sessions = self
            .store
            .fetch_sessions()
            .await
            .map_err(read_error(EntityKind::Session))?;
        sessions.sort_by(|a, b| (a.start_time, a.id).cmp(&(b.start_time, b.id)));
        on_progress(0.6);

        let mut behaviors = self
            .store
            .fetch_behaviors()
            .await
            .map_err(read_error(EntityKind::Behavior))?;
        behaviors.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        on_progress(0.8);

        let students: Vec<StudentRecord> = students.iter().map(StudentRecord::from).collect();
        let programs: Vec<ProgramRecord> = programs.iter().map(ProgramRecord::from).collect();
        let sessions: Vec<SessionRecord> = sessions.iter().map(SessionRecord::from).collect();
        let behaviors: Vec<BehaviorRecord> = behaviors.iter().map(BehaviorRecord::from).collect();

        let created_at = self.clock.now();
        let id = self.backup_id(&students, &programs, &sessions, &behaviors, &created_at.to_rfc3339())?;

        let mut document = BackupDocument {
            metadata: BackupMetadata {
                id,
                created_at,
                app_version: self.app_version.clone(),
                schema_version: CURRENT_SCHEMA_VERSION,
                device_name: self.device_name.clone(),
                student_count: students.len(),
                program_count: Some(programs.len()),
                session_count: sessions.len(),
                behavior_count: behaviors.len(),
                file_size_bytes: 0,
                drive_file_id: None,
            },
            students,
            programs,
            sessions,
            behaviors,
        };

        // The size field is part of the encoding it measures
        for _ in 0..MAX_SIZE_PASSES {
            let size = encode_document(&document)?.len() as u64;
            if size == document.metadata.file_size_bytes {
                break;
            }
            document.metadata.file_size_bytes = size;
        }

        on_progress(1.0);
        info!(
            backup_id = %document.metadata.id,
            students = document.metadata.student_count,
            sessions = document.metadata.session_count,
            behaviors = document.metadata.behavior_count,
            "Exported backup"
        );

        Ok(document)
    }

    /// Export the store and encode it as canonical JSON bytes
    pub async fn export_to_bytes(&self) -> Result<Vec<u8>, ExportError> {
        let document = self.export().await?;
        let bytes = encode_document(&document)?;
        debug!(bytes = bytes.len(), "Encoded backup");
        Ok(bytes)
    }

    fn backup_id(
        &self,
        students: &[StudentRecord],
        programs: &[ProgramRecord],
        sessions: &[SessionRecord],
        behaviors: &[BehaviorRecord],
        created_at: &str,
    ) -> Result<String, ExportError> {
        let content = canonicalize(serde_json::to_value((students, programs, sessions, behaviors))?);
        let mut seed = serde_json::to_vec(&content)?;
        seed.extend_from_slice(created_at.as_bytes());
        seed.extend_from_slice(self.device_name.as_bytes());
        Ok(Uuid::new_v5(&BACKUP_ID_NAMESPACE, &seed).to_string())
    }
}

fn read_error(kind: EntityKind) -> impl FnOnce(StoreError) -> ExportError {
    move |source| ExportError::StoreRead {
        kind: kind.as_str(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::schema::decode_document;
    use crate::store::MemoryStore;
    use crate::types::{Behavior, EntityStatus, Program, Session, SessionType, Student};
    use chrono::{DateTime, TimeZone, Utc};

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        let ava = Student::new("Ava", "R", "3", at(8));
        let mut ben = Student::new("Ben", "K", "K", at(7));
        ben.status = EntityStatus::Archived;
        let program = Program::new(ava.id, "Manding", "skill", at(8));
        let mut session = Session::new(ava.id, SessionType::Frequency, at(9));
        session.program_id = Some(program.id);
        session.data = Some(br#"{"count":4}"#.to_vec());
        let first = Behavior::new(session.id, "request", at(9));
        let second = Behavior::new(session.id, "elope", at(10));

        store.insert_student(ava).unwrap();
        store.insert_student(ben).unwrap();
        store.insert_program(program).unwrap();
        store.insert_session(session).unwrap();
        store.insert_behavior(second).unwrap();
        store.insert_behavior(first).unwrap();
        store
    }

    fn exporter(store: MemoryStore) -> Exporter {
        Exporter::new(Arc::new(store), "Therapy iPad", "2.3.0")
            .with_clock(Arc::new(FixedClock(at(12))))
    }

    #[tokio::test]
    async fn test_export_counts_and_ordering() {
        let doc = exporter(seeded_store()).export().await.unwrap();

        assert_eq!(doc.metadata.student_count, 2);
        assert_eq!(doc.metadata.program_count, Some(1));
        assert_eq!(doc.metadata.session_count, 1);
        assert_eq!(doc.metadata.behavior_count, 2);
        assert_eq!(doc.metadata.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(doc.metadata.created_at, at(12));
        assert_eq!(doc.metadata.drive_file_id, None);

        // Ordered by creation time, not insertion order
        assert_eq!(doc.students[0].first_name, "Ben");
        assert_eq!(doc.behaviors[0].behavior_type, "request");
        assert_eq!(doc.behaviors[1].behavior_type, "elope");
    }

    #[tokio::test]
    async fn test_export_is_byte_identical_with_fixed_clock() {
        let exporter = exporter(seeded_store());

        let first = exporter.export_to_bytes().await.unwrap();
        let second = exporter.export_to_bytes().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_file_size_matches_encoding() {
        let bytes = exporter(seeded_store()).export_to_bytes().await.unwrap();
        let doc = decode_document(&bytes).unwrap();

        assert_eq!(doc.metadata.file_size_bytes, bytes.len() as u64);
    }

    #[tokio::test]
    async fn test_encoding_has_sorted_keys() {
        let bytes = exporter(seeded_store()).export_to_bytes().await.unwrap();
        let text = String::from_utf8(bytes).unwrap();

        let behaviors = text.find("\"behaviors\"").unwrap();
        let metadata = text.find("\"metadata\"").unwrap();
        let students = text.find("\"students\"").unwrap();
        assert!(behaviors < metadata && metadata < students);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_export() {
        let store = seeded_store().with_failing_fetch(EntityKind::Session);

        let err = exporter(store).export().await.unwrap_err();

        assert!(matches!(err, ExportError::StoreRead { kind: "session", .. }));
    }

    #[tokio::test]
    async fn test_progress_is_monotonic() {
        let exporter = exporter(seeded_store());
        let mut seen = Vec::new();

        exporter
            .export_with_progress(&mut |fraction: f64| seen.push(fraction))
            .await
            .unwrap();

        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&1.0));
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }
}
