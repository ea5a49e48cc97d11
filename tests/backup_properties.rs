//! End-to-end backup and restore properties
//!
//! These tests run the exporter, importer and backup service against the
//! in-memory store and remote, without any network access.

use bcba_sync::clock::FixedClock;
use bcba_sync::config::DEFAULT_FOLDER_NAME;
use bcba_sync::schema::{decode_document, encode_document, BehaviorRecord};
use bcba_sync::types::{Behavior, EntityStatus, Program, Session, SessionType, Student};
use bcba_sync::{
    BackupService, Exporter, ImportError, ImportStrategy, Importer, MemoryRemote, MemoryStore,
    RemoteStore, SyncConfig, SyncProgress,
};
use chrono::{DateTime, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use uuid::Uuid;

fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
}

fn exporter(store: Arc<MemoryStore>) -> Exporter {
    Exporter::new(store, "Classroom iPad", "2.0.0").with_clock(Arc::new(FixedClock(at(20, 12))))
}

/// Student with one program, one ended session and two behaviors
fn populated_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    let student = Student::new("Ava", "R", "3", at(1, 8));
    let program = Program::new(student.id, "Manding", "skill", at(1, 9));
    let mut session = Session::new(student.id, SessionType::Dtt, at(2, 10));
    session.program_id = Some(program.id);
    session.end_time = Some(at(2, 11));
    session.data = Some(vec![0, 159, 146, 150]);
    let first = Behavior::new(session.id, "correct response", at(2, 10));
    let mut second = Behavior::new(session.id, "prompted response", at(2, 10));
    second.prompt_level = Some("gestural".to_string());

    store.insert_student(student).unwrap();
    store.insert_program(program).unwrap();
    store.insert_session(session).unwrap();
    store.insert_behavior(first).unwrap();
    store.insert_behavior(second).unwrap();
    Arc::new(store)
}

#[tokio::test]
async fn test_replace_into_empty_store_round_trips() {
    let source = populated_store();
    let document = exporter(source.clone()).export().await.unwrap();

    let target = Arc::new(MemoryStore::new());
    let summary = Importer::new(target.clone())
        .import(&document, ImportStrategy::Replace)
        .await
        .unwrap();

    assert_eq!(summary.inserted(), 5);
    assert_eq!(summary.dropped(), 0);
    assert_eq!(target.snapshot().unwrap(), source.snapshot().unwrap());
}

#[tokio::test]
async fn test_merge_twice_changes_nothing_the_second_time() {
    let document = exporter(populated_store()).export().await.unwrap();
    let target = Arc::new(MemoryStore::new());
    let importer = Importer::new(target.clone());

    importer.import(&document, ImportStrategy::Merge).await.unwrap();
    let after_first = target.snapshot().unwrap();
    let second = importer.import(&document, ImportStrategy::Merge).await.unwrap();

    assert_eq!(second.inserted(), 0);
    assert_eq!(second.students.skipped + second.behaviors.skipped, 3);
    assert_eq!(target.snapshot().unwrap(), after_first);
}

#[tokio::test]
async fn test_newer_schema_is_rejected_before_any_write() {
    let mut document = exporter(populated_store()).export().await.unwrap();
    document.metadata.schema_version = 2;
    let bytes = encode_document(&document).unwrap();

    let target = populated_store();
    let before = target.snapshot().unwrap();

    for strategy in [ImportStrategy::Merge, ImportStrategy::Replace, ImportStrategy::Skip] {
        let err = Importer::new(target.clone())
            .import_bytes(&bytes, strategy)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ImportError::IncompatibleSchema {
                found: 2,
                supported: 1
            }
        ));
    }

    assert_eq!(target.snapshot().unwrap(), before);
}

#[tokio::test]
async fn test_dangling_behavior_is_dropped_and_the_rest_imported() {
    let mut document = exporter(populated_store()).export().await.unwrap();
    let mut orphan: BehaviorRecord = document.behaviors[0].clone();
    orphan.id = Uuid::new_v4().to_string();
    orphan.session_id = Uuid::new_v4().to_string();
    document.behaviors.push(orphan);

    let target = Arc::new(MemoryStore::new());
    let summary = Importer::new(target.clone())
        .import(&document, ImportStrategy::Merge)
        .await
        .unwrap();

    assert_eq!(summary.behaviors.dropped, 1);
    assert_eq!(summary.behaviors.inserted, 2);
    assert_eq!(target.snapshot().unwrap().behaviors.len(), 2);
}

#[tokio::test]
async fn test_export_bytes_are_deterministic() {
    let store = populated_store();

    let first = exporter(store.clone()).export_to_bytes().await.unwrap();
    let second = exporter(store).export_to_bytes().await.unwrap();

    assert_eq!(first, second);
    let metadata = decode_document(&first).unwrap().metadata;
    assert_eq!(metadata.file_size_bytes, first.len() as u64);
}

#[tokio::test]
async fn test_upload_keeps_only_the_newest_backups() {
    let remote = Arc::new(MemoryRemote::new());
    let folder = remote.ensure_folder(DEFAULT_FOLDER_NAME).await.unwrap();
    for day in 1..=12 {
        let created = Utc.with_ymd_and_hms(2023, 1, day, 9, 0, 0).unwrap();
        remote
            .insert_file(&folder, &format!("bcba_backup_old_{day:02}.json"), created, b"{}".to_vec())
            .unwrap();
    }

    let config = SyncConfig::default();
    let service = BackupService::new(populated_store(), remote.clone(), &config);
    let outcome = service.upload_backup(&mut |_: SyncProgress| {}).await.unwrap();

    let backups = service.list_backups().await.unwrap();
    assert_eq!(backups.len(), config.retention_cap);
    assert_eq!(backups[0].id, outcome.remote_file_id);
    assert_eq!(outcome.retention.deleted.len(), 3);
    assert!(!remote.file_names(&folder).contains(&"bcba_backup_old_03.json".to_string()));
    assert!(remote.file_names(&folder).contains(&"bcba_backup_old_04.json".to_string()));
}

#[tokio::test]
async fn test_replace_scenario_with_archived_student() {
    // A active, B archived, one session for A with two behaviors
    let source = MemoryStore::new();
    let a = Student::new("Ava", "A", "2", at(1, 8));
    let b = Student::new("Ben", "B", "4", at(1, 9));
    let session = Session::new(a.id, SessionType::Frequency, at(3, 10));
    let behaviors = [
        Behavior::new(session.id, "out of seat", at(3, 10)),
        Behavior::new(session.id, "out of seat", at(3, 11)),
    ];
    let (a_id, b_id, session_id) = (a.id, b.id, session.id);
    source.insert_student(a).unwrap();
    source.insert_student(b).unwrap();
    source.archive_student(b_id, at(2, 8)).unwrap();
    source.insert_session(session).unwrap();
    for behavior in behaviors {
        source.insert_behavior(behavior).unwrap();
    }

    let document = exporter(Arc::new(source)).export().await.unwrap();
    assert_eq!(document.metadata.student_count, 2);
    assert_eq!(document.metadata.session_count, 1);
    assert_eq!(document.metadata.behavior_count, 2);

    // Target already holds an unrelated student C
    let target = Arc::new(MemoryStore::new());
    let c = Student::new("Cal", "C", "1", at(1, 7));
    let c_id = c.id;
    target.insert_student(c).unwrap();

    Importer::new(target.clone())
        .import(&document, ImportStrategy::Replace)
        .await
        .unwrap();

    let snapshot = target.snapshot().unwrap();
    let mut student_ids: Vec<Uuid> = snapshot.students.iter().map(|s| s.id).collect();
    student_ids.sort();
    let mut expected = vec![a_id, b_id];
    expected.sort();
    assert_eq!(student_ids, expected);
    assert!(target.student(c_id).unwrap().is_none());

    assert_eq!(target.student(a_id).unwrap().unwrap().status, EntityStatus::Active);
    assert_eq!(target.student(b_id).unwrap().unwrap().status, EntityStatus::Archived);

    let restored_session = target.session(session_id).unwrap().unwrap();
    assert_eq!(restored_session.student_id, a_id);
    assert_eq!(snapshot.behaviors.len(), 2);
    assert!(snapshot.behaviors.iter().all(|b| b.session_id == session_id));
}

#[tokio::test]
async fn test_non_finite_duration_still_restores() {
    let source = MemoryStore::new();
    let student = Student::new("Ivy", "N", "5", at(1, 8));
    let session = Session::new(student.id, SessionType::Duration, at(2, 9));
    let mut behavior = Behavior::new(session.id, "on task", at(2, 9));
    behavior.duration = f64::NAN;
    let behavior_id = behavior.id;
    source.insert_student(student).unwrap();
    source.insert_session(session).unwrap();
    source.insert_behavior(behavior).unwrap();

    let bytes = exporter(Arc::new(source)).export_to_bytes().await.unwrap();
    let target = Arc::new(MemoryStore::new());
    let summary = Importer::new(target.clone())
        .import_bytes(&bytes, ImportStrategy::Replace)
        .await
        .unwrap();

    assert_eq!(summary.behaviors.inserted, 1);
    let restored = target.snapshot().unwrap().behaviors;
    assert_eq!(restored[0].id, behavior_id);
    assert_eq!(restored[0].duration, 0.0);
}
