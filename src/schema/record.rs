//! Backup document schema (version 1)
//!
//! A flattened, denormalized snapshot of the entity graph:
//! - every record is a standalone value
//! - foreign keys are string-encoded UUIDs instead of live references
//! - session payloads travel as base64 text and are never reinterpreted

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::types::{Behavior, EntityKind, EntityStatus, Program, Session, SessionType, Student};

/// Current backup schema version
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Backup-level metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub app_version: String,
    pub schema_version: u32,
    pub device_name: String,
    pub student_count: usize,
    /// Absent in documents written before program counts were recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_count: Option<usize>,
    pub session_count: usize,
    pub behavior_count: usize,
    pub file_size_bytes: u64,
    /// Set only on the copy held after a successful upload
    pub drive_file_id: Option<String>,
}

/// Flattened student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub id: String,
    pub first_name: String,
    pub last_initial: String,
    #[serde(default)]
    pub grade: String,
    pub teacher_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Flattened program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub program_type: String,
    pub target_behaviors: Option<String>,
    pub mastery_criteria: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub student_id: String,
}

/// Flattened session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub session_type: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub notes: Option<String>,
    #[serde(default, with = "base64_data")]
    pub data: Option<Vec<u8>>,
    pub student_id: String,
    pub program_id: Option<String>,
}

/// Flattened behavior observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BehaviorRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub behavior_type: String,
    #[serde(default)]
    pub frequency: i32,
    /// Seconds; a `null` written for a non-finite value reads back as 0
    #[serde(default, deserialize_with = "null_as_zero")]
    pub duration: f64,
    pub antecedent: Option<String>,
    pub consequence: Option<String>,
    pub interval: Option<i32>,
    pub prompt_level: Option<String>,
    pub session_id: String,
}

/// Complete backup document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupDocument {
    pub metadata: BackupMetadata,
    #[serde(default)]
    pub students: Vec<StudentRecord>,
    #[serde(default)]
    pub programs: Vec<ProgramRecord>,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub behaviors: Vec<BehaviorRecord>,
}

impl BackupDocument {
    /// Copy of this document tagged with the remote file it was stored as
    pub fn with_drive_file_id(&self, drive_file_id: impl Into<String>) -> Self {
        let mut copy = self.clone();
        copy.metadata.drive_file_id = Some(drive_file_id.into());
        copy
    }

    /// Total number of entity records carried
    pub fn record_count(&self) -> usize {
        self.students.len() + self.programs.len() + self.sessions.len() + self.behaviors.len()
    }

    /// Whether this build can import the document
    pub fn is_compatible(&self) -> bool {
        self.metadata.schema_version <= CURRENT_SCHEMA_VERSION
    }
}

/// A record that cannot be turned back into an entity
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RecordError {
    #[error("{kind} record has invalid {field} '{value}'")]
    InvalidId {
        kind: EntityKind,
        field: &'static str,
        value: String,
    },
}

fn parse_id(kind: EntityKind, field: &'static str, value: &str) -> Result<Uuid, RecordError> {
    Uuid::parse_str(value).map_err(|_| RecordError::InvalidId {
        kind,
        field,
        value: value.to_string(),
    })
}

fn default_true() -> bool {
    true
}

fn null_as_zero<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(0.0))
}

/// JSON has no NaN or infinity; store those as 0 instead of `null`
fn finite_duration(behavior: &Behavior) -> f64 {
    if behavior.duration.is_finite() {
        behavior.duration
    } else {
        warn!(
            behavior_id = %behavior.id,
            duration = %behavior.duration,
            "Non-finite behavior duration exported as 0"
        );
        0.0
    }
}

// ============================================================================
// Flattening
// ============================================================================

impl From<&Student> for StudentRecord {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id.to_string(),
            first_name: student.first_name.clone(),
            last_initial: student.last_initial.clone(),
            grade: student.grade.clone(),
            teacher_id: student.teacher_id.clone(),
            is_active: student.status.is_active(),
            created_at: student.created_at,
            updated_at: student.updated_at,
        }
    }
}

impl From<&Program> for ProgramRecord {
    fn from(program: &Program) -> Self {
        Self {
            id: program.id.to_string(),
            name: program.name.clone(),
            program_type: program.program_type.clone(),
            target_behaviors: program.target_behaviors.clone(),
            mastery_criteria: program.mastery_criteria.clone(),
            is_active: program.status.is_active(),
            created_at: program.created_at,
            updated_at: program.updated_at,
            student_id: program.student_id.to_string(),
        }
    }
}

impl From<&Session> for SessionRecord {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.to_string(),
            session_type: session.session_type.as_str().to_string(),
            start_time: session.start_time,
            end_time: session.end_time,
            location: session.location.clone(),
            notes: session.notes.clone(),
            data: session.data.clone(),
            student_id: session.student_id.to_string(),
            program_id: session.program_id.map(|id| id.to_string()),
        }
    }
}

impl From<&Behavior> for BehaviorRecord {
    fn from(behavior: &Behavior) -> Self {
        Self {
            id: behavior.id.to_string(),
            timestamp: behavior.timestamp,
            behavior_type: behavior.behavior_type.clone(),
            frequency: behavior.frequency,
            duration: finite_duration(behavior),
            antecedent: behavior.antecedent.clone(),
            consequence: behavior.consequence.clone(),
            interval: behavior.interval,
            prompt_level: behavior.prompt_level.clone(),
            session_id: behavior.session_id.to_string(),
        }
    }
}

// ============================================================================
// Rebuilding
// ============================================================================

impl StudentRecord {
    pub fn to_entity(&self) -> Result<Student, RecordError> {
        Ok(Student {
            id: parse_id(EntityKind::Student, "id", &self.id)?,
            first_name: self.first_name.clone(),
            last_initial: self.last_initial.clone(),
            grade: self.grade.clone(),
            teacher_id: self.teacher_id.clone(),
            status: EntityStatus::from_active(self.is_active),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl ProgramRecord {
    pub fn to_entity(&self) -> Result<Program, RecordError> {
        Ok(Program {
            id: parse_id(EntityKind::Program, "id", &self.id)?,
            student_id: parse_id(EntityKind::Program, "studentId", &self.student_id)?,
            name: self.name.clone(),
            program_type: self.program_type.clone(),
            target_behaviors: self.target_behaviors.clone(),
            mastery_criteria: self.mastery_criteria.clone(),
            status: EntityStatus::from_active(self.is_active),
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl SessionRecord {
    /// Rebuild the session. An unparsable `programId` is treated as absent,
    /// since the program link is optional.
    pub fn to_entity(&self) -> Result<Session, RecordError> {
        Ok(Session {
            id: parse_id(EntityKind::Session, "id", &self.id)?,
            student_id: parse_id(EntityKind::Session, "studentId", &self.student_id)?,
            program_id: self
                .program_id
                .as_deref()
                .and_then(|raw| Uuid::parse_str(raw).ok()),
            session_type: SessionType::parse(&self.session_type),
            start_time: self.start_time,
            end_time: self.end_time,
            location: self.location.clone(),
            notes: self.notes.clone(),
            data: self.data.clone(),
        })
    }
}

impl BehaviorRecord {
    pub fn to_entity(&self) -> Result<Behavior, RecordError> {
        Ok(Behavior {
            id: parse_id(EntityKind::Behavior, "id", &self.id)?,
            session_id: parse_id(EntityKind::Behavior, "sessionId", &self.session_id)?,
            timestamp: self.timestamp,
            behavior_type: self.behavior_type.clone(),
            frequency: self.frequency,
            duration: self.duration,
            antecedent: self.antecedent.clone(),
            consequence: self.consequence.clone(),
            interval: self.interval,
            prompt_level: self.prompt_level.clone(),
        })
    }
}

/// Base64 (standard alphabet, padded) for optional session payload bytes
mod base64_data {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match data {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|text| STANDARD.decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 15, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_session_record_wire_names() {
        let student = Student::new("Ava", "R", "3", at(8));
        let mut session = Session::new(student.id, SessionType::TaskAnalysis, at(9));
        session.data = Some(vec![1, 2, 3]);

        let json = serde_json::to_value(SessionRecord::from(&session)).unwrap();

        assert_eq!(json["type"], "taskAnalysis");
        assert_eq!(json["studentId"], student.id.to_string());
        assert_eq!(json["data"], "AQID");
        assert!(json["programId"].is_null());
        assert!(json["endTime"].is_null());
    }

    #[test]
    fn test_archived_student_flattens_to_inactive() {
        let mut student = Student::new("Ben", "K", "K", at(8));
        student.status = EntityStatus::Archived;

        let record = StudentRecord::from(&student);
        assert!(!record.is_active);
        assert_eq!(record.to_entity().unwrap(), student);
    }

    #[test]
    fn test_invalid_parent_id_is_rejected() {
        let student = Student::new("Cal", "M", "2", at(8));
        let program = Program::new(student.id, "Manding", "skill", at(9));
        let mut record = ProgramRecord::from(&program);
        record.student_id = "not-a-uuid".to_string();

        let err = record.to_entity().unwrap_err();
        assert_eq!(
            err,
            RecordError::InvalidId {
                kind: EntityKind::Program,
                field: "studentId",
                value: "not-a-uuid".to_string(),
            }
        );
    }

    #[test]
    fn test_non_finite_duration_flattens_to_zero() {
        let session_id = Uuid::new_v4();
        for duration in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let mut behavior = Behavior::new(session_id, "elopement", at(9));
            behavior.duration = duration;

            let json = serde_json::to_value(BehaviorRecord::from(&behavior)).unwrap();
            assert_eq!(json["duration"], 0.0);
        }
    }

    #[test]
    fn test_null_duration_reads_as_zero() {
        let json = format!(
            r#"{{
                "id": "{}",
                "timestamp": "2024-01-15T09:00:00Z",
                "type": "elopement",
                "duration": null,
                "sessionId": "{}"
            }}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );

        let record: BehaviorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record.duration, 0.0);
        assert_eq!(record.to_entity().unwrap().duration, 0.0);
    }

    #[test]
    fn test_missing_optional_fields_default() {
        let json = r#"{
            "id": "6f1c1f43-6a57-4c1e-9d53-0c7a2b9f0a11",
            "firstName": "Dee",
            "lastInitial": "P",
            "createdAt": "2024-01-15T08:00:00Z",
            "updatedAt": "2024-01-15T08:00:00Z"
        }"#;

        let record: StudentRecord = serde_json::from_str(json).unwrap();
        assert!(record.is_active);
        assert_eq!(record.grade, "");
        assert_eq!(record.teacher_id, None);
    }

    #[test]
    fn test_invalid_base64_payload_fails_decoding() {
        let json = r#"{
            "id": "6f1c1f43-6a57-4c1e-9d53-0c7a2b9f0a11",
            "type": "frequency",
            "startTime": "2024-01-15T08:00:00Z",
            "data": "%%%",
            "studentId": "0b8e1d8e-3c8f-4f7e-8f4e-3f8d0b2c1a22"
        }"#;

        assert!(serde_json::from_str::<SessionRecord>(json).is_err());
    }

    #[test]
    fn test_with_drive_file_id_leaves_original_untouched() {
        let doc = BackupDocument {
            metadata: BackupMetadata {
                id: "b1".to_string(),
                created_at: at(10),
                app_version: "1.0".to_string(),
                schema_version: CURRENT_SCHEMA_VERSION,
                device_name: "iPad".to_string(),
                student_count: 0,
                program_count: Some(0),
                session_count: 0,
                behavior_count: 0,
                file_size_bytes: 0,
                drive_file_id: None,
            },
            students: vec![],
            programs: vec![],
            sessions: vec![],
            behaviors: vec![],
        };

        let uploaded = doc.with_drive_file_id("drive-123");
        assert_eq!(uploaded.metadata.drive_file_id.as_deref(), Some("drive-123"));
        assert_eq!(doc.metadata.drive_file_id, None);
    }
}
