//! Core entity types for the live store
//!
//! This module defines the relational entities that the backup engine reads and
//! writes: students, programs, sessions and behaviors. Parent links are plain
//! `Uuid` values; the store is responsible for keeping them resolvable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status for soft-deletable entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    #[default]
    Active,
    /// Hidden from day-to-day use but retained (soft delete)
    Archived,
}

impl EntityStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, EntityStatus::Active)
    }

    pub fn from_active(active: bool) -> Self {
        if active {
            EntityStatus::Active
        } else {
            EntityStatus::Archived
        }
    }
}

/// Entity kind, used for logging and error context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Student,
    Program,
    Session,
    Behavior,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Student => "student",
            EntityKind::Program => "program",
            EntityKind::Session => "session",
            EntityKind::Behavior => "behavior",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data-collection method a session was recorded with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionType {
    Frequency,
    Duration,
    Abc,
    Interval,
    Dtt,
    TaskAnalysis,
    /// For recorder types this build does not know about
    #[serde(untagged)]
    Custom(String),
}

impl SessionType {
    pub fn as_str(&self) -> &str {
        match self {
            SessionType::Frequency => "frequency",
            SessionType::Duration => "duration",
            SessionType::Abc => "abc",
            SessionType::Interval => "interval",
            SessionType::Dtt => "dtt",
            SessionType::TaskAnalysis => "taskAnalysis",
            SessionType::Custom(name) => name.as_str(),
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "frequency" => SessionType::Frequency,
            "duration" => SessionType::Duration,
            "abc" => SessionType::Abc,
            "interval" => SessionType::Interval,
            "dtt" => SessionType::Dtt,
            "taskAnalysis" => SessionType::TaskAnalysis,
            other => SessionType::Custom(other.to_string()),
        }
    }
}

/// A student receiving services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub first_name: String,
    /// Only the initial is stored to limit identifying data
    pub last_initial: String,
    pub grade: String,
    pub teacher_id: Option<String>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn new(
        first_name: impl Into<String>,
        last_initial: impl Into<String>,
        grade: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            first_name: first_name.into(),
            last_initial: last_initial.into(),
            grade: grade.into(),
            teacher_id: None,
            status: EntityStatus::Active,
            created_at,
            updated_at: created_at,
        }
    }
}

/// A skill-acquisition or behavior-reduction program for one student
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub id: Uuid,
    pub student_id: Uuid,
    pub name: String,
    pub program_type: String,
    pub target_behaviors: Option<String>,
    pub mastery_criteria: Option<String>,
    pub status: EntityStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Program {
    pub fn new(
        student_id: Uuid,
        name: impl Into<String>,
        program_type: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            name: name.into(),
            program_type: program_type.into(),
            target_behaviors: None,
            mastery_criteria: None,
            status: EntityStatus::Active,
            created_at,
            updated_at: created_at,
        }
    }
}

/// A data-collection session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub student_id: Uuid,
    pub program_id: Option<Uuid>,
    pub session_type: SessionType,
    pub start_time: DateTime<Utc>,
    /// Set once when the session ends
    pub end_time: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub notes: Option<String>,
    /// Recorder-specific payload, carried opaquely
    pub data: Option<Vec<u8>>,
}

impl Session {
    pub fn new(student_id: Uuid, session_type: SessionType, start_time: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            program_id: None,
            session_type,
            start_time,
            end_time: None,
            location: None,
            notes: None,
            data: None,
        }
    }

    pub fn is_ended(&self) -> bool {
        self.end_time.is_some()
    }
}

/// A single behavior observation within a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Behavior {
    pub id: Uuid,
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub behavior_type: String,
    pub frequency: i32,
    /// Seconds
    pub duration: f64,
    pub antecedent: Option<String>,
    pub consequence: Option<String>,
    pub interval: Option<i32>,
    pub prompt_level: Option<String>,
}

impl Behavior {
    pub fn new(session_id: Uuid, behavior_type: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            timestamp,
            behavior_type: behavior_type.into(),
            frequency: 0,
            duration: 0.0,
            antecedent: None,
            consequence: None,
            interval: None,
            prompt_level: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_type_round_trip_names() {
        for ty in [
            SessionType::Frequency,
            SessionType::Duration,
            SessionType::Abc,
            SessionType::Interval,
            SessionType::Dtt,
            SessionType::TaskAnalysis,
        ] {
            assert_eq!(SessionType::parse(ty.as_str()), ty);
        }
    }

    #[test]
    fn test_unknown_session_type_is_custom() {
        let ty = SessionType::parse("latency");
        assert_eq!(ty, SessionType::Custom("latency".to_string()));
        assert_eq!(ty.as_str(), "latency");
    }

    #[test]
    fn test_status_from_active_flag() {
        assert_eq!(EntityStatus::from_active(true), EntityStatus::Active);
        assert_eq!(EntityStatus::from_active(false), EntityStatus::Archived);
        assert!(!EntityStatus::Archived.is_active());
    }
}
