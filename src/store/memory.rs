//! In-memory entity store
//!
//! Holds the four entity tables behind a single lock and can be saved to or
//! loaded from a JSON snapshot. Used by the CLI, the FFI layer and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use uuid::Uuid;

use super::{ChangeSet, EntityStore};
use crate::error::StoreError;
use crate::types::{Behavior, EntityKind, EntityStatus, Program, Session, Student};

/// Serializable copy of a store's contents
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub students: Vec<Student>,
    #[serde(default)]
    pub programs: Vec<Program>,
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    students: BTreeMap<Uuid, Student>,
    programs: BTreeMap<Uuid, Program>,
    sessions: BTreeMap<Uuid, Session>,
    behaviors: BTreeMap<Uuid, Behavior>,
}

impl Tables {
    fn insert_student(&mut self, student: Student) -> Result<(), StoreError> {
        if self.students.contains_key(&student.id) {
            return Err(duplicate(EntityKind::Student, student.id));
        }
        self.students.insert(student.id, student);
        Ok(())
    }

    fn insert_program(&mut self, program: Program) -> Result<(), StoreError> {
        if self.programs.contains_key(&program.id) {
            return Err(duplicate(EntityKind::Program, program.id));
        }
        if !self.students.contains_key(&program.student_id) {
            return Err(dangling(EntityKind::Program, program.id, program.student_id));
        }
        self.programs.insert(program.id, program);
        Ok(())
    }

    fn insert_session(&mut self, session: Session) -> Result<(), StoreError> {
        if self.sessions.contains_key(&session.id) {
            return Err(duplicate(EntityKind::Session, session.id));
        }
        if !self.students.contains_key(&session.student_id) {
            return Err(dangling(EntityKind::Session, session.id, session.student_id));
        }
        if let Some(program_id) = session.program_id {
            if !self.programs.contains_key(&program_id) {
                return Err(dangling(EntityKind::Session, session.id, program_id));
            }
        }
        self.sessions.insert(session.id, session);
        Ok(())
    }

    fn insert_behavior(&mut self, behavior: Behavior) -> Result<(), StoreError> {
        if self.behaviors.contains_key(&behavior.id) {
            return Err(duplicate(EntityKind::Behavior, behavior.id));
        }
        if !self.sessions.contains_key(&behavior.session_id) {
            return Err(dangling(EntityKind::Behavior, behavior.id, behavior.session_id));
        }
        self.behaviors.insert(behavior.id, behavior);
        Ok(())
    }

    fn purge_all(&mut self) {
        // Children first
        self.behaviors.clear();
        self.sessions.clear();
        self.programs.clear();
        self.students.clear();
    }

    fn purge_sessions(&mut self, session_ids: &[Uuid]) {
        for id in session_ids {
            self.sessions.remove(id);
        }
        self.behaviors
            .retain(|_, behavior| !session_ids.contains(&behavior.session_id));
    }
}

fn duplicate(kind: EntityKind, id: Uuid) -> StoreError {
    StoreError::ConstraintViolation(format!("{kind} {id} already exists"))
}

fn dangling(kind: EntityKind, id: Uuid, parent: Uuid) -> StoreError {
    StoreError::ConstraintViolation(format!("{kind} {id} references missing parent {parent}"))
}

fn not_found(kind: EntityKind, id: Uuid) -> StoreError {
    StoreError::NotFound {
        kind: kind.as_str(),
        id: id.to_string(),
    }
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    failing_fetch: Option<EntityKind>,
    failing_apply: bool,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a snapshot, enforcing referential integrity
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Result<Self, StoreError> {
        let mut tables = Tables::default();
        for student in snapshot.students {
            tables.insert_student(student)?;
        }
        for program in snapshot.programs {
            tables.insert_program(program)?;
        }
        for session in snapshot.sessions {
            tables.insert_session(session)?;
        }
        for behavior in snapshot.behaviors {
            tables.insert_behavior(behavior)?;
        }
        Ok(Self {
            tables: RwLock::new(tables),
            ..Self::default()
        })
    }

    /// Load a snapshot file; a missing file yields an empty store
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path)?;
        let snapshot: StoreSnapshot = serde_json::from_str(&json)?;
        Self::from_snapshot(snapshot)
    }

    /// Write the current contents to a snapshot file
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(&self.snapshot()?)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Copy the current contents, ordered by id within each table
    pub fn snapshot(&self) -> Result<StoreSnapshot, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(StoreSnapshot {
            students: tables.students.values().cloned().collect(),
            programs: tables.programs.values().cloned().collect(),
            sessions: tables.sessions.values().cloned().collect(),
            behaviors: tables.behaviors.values().cloned().collect(),
        })
    }

    /// Make every fetch of `kind` fail, for exercising read-failure paths
    pub fn with_failing_fetch(mut self, kind: EntityKind) -> Self {
        self.failing_fetch = Some(kind);
        self
    }

    /// Make every `apply` fail without writing anything
    pub fn with_failing_apply(mut self) -> Self {
        self.failing_apply = true;
        self
    }

    fn write<T>(&self, f: impl FnOnce(&mut Tables) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;
        f(&mut tables)
    }

    fn check_fetch(&self, kind: EntityKind) -> Result<(), StoreError> {
        if self.failing_fetch == Some(kind) {
            return Err(StoreError::Unavailable(format!("{kind} table is unreadable")));
        }
        Ok(())
    }

    pub fn insert_student(&self, student: Student) -> Result<(), StoreError> {
        self.write(|t| t.insert_student(student))
    }

    pub fn insert_program(&self, program: Program) -> Result<(), StoreError> {
        self.write(|t| t.insert_program(program))
    }

    pub fn insert_session(&self, session: Session) -> Result<(), StoreError> {
        self.write(|t| t.insert_session(session))
    }

    pub fn insert_behavior(&self, behavior: Behavior) -> Result<(), StoreError> {
        self.write(|t| t.insert_behavior(behavior))
    }

    /// Soft-delete a student
    pub fn archive_student(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write(|t| {
            let student = t
                .students
                .get_mut(&id)
                .ok_or_else(|| not_found(EntityKind::Student, id))?;
            student.status = EntityStatus::Archived;
            student.updated_at = at;
            Ok(())
        })
    }

    /// Soft-delete a program
    pub fn archive_program(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write(|t| {
            let program = t
                .programs
                .get_mut(&id)
                .ok_or_else(|| not_found(EntityKind::Program, id))?;
            program.status = EntityStatus::Archived;
            program.updated_at = at;
            Ok(())
        })
    }

    /// Irreversibly delete a student with its programs, sessions and behaviors
    pub fn purge_student(&self, id: Uuid) -> Result<(), StoreError> {
        self.write(|t| {
            if t.students.remove(&id).is_none() {
                return Err(not_found(EntityKind::Student, id));
            }
            let session_ids: Vec<Uuid> = t
                .sessions
                .values()
                .filter(|s| s.student_id == id)
                .map(|s| s.id)
                .collect();
            t.purge_sessions(&session_ids);
            t.programs.retain(|_, p| p.student_id != id);
            Ok(())
        })
    }

    /// Irreversibly delete a program; its sessions stay, unlinked
    pub fn purge_program(&self, id: Uuid) -> Result<(), StoreError> {
        self.write(|t| {
            if t.programs.remove(&id).is_none() {
                return Err(not_found(EntityKind::Program, id));
            }
            for session in t.sessions.values_mut() {
                if session.program_id == Some(id) {
                    session.program_id = None;
                }
            }
            Ok(())
        })
    }

    /// Set a session's end time; a session can only end once
    pub fn end_session(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.write(|t| {
            let session = t
                .sessions
                .get_mut(&id)
                .ok_or_else(|| not_found(EntityKind::Session, id))?;
            if session.is_ended() {
                return Err(StoreError::AlreadyEnded(id.to_string()));
            }
            session.end_time = Some(at);
            Ok(())
        })
    }

    /// Attach the recorder payload to a session
    pub fn set_session_data(&self, id: Uuid, data: Vec<u8>) -> Result<(), StoreError> {
        self.write(|t| {
            let session = t
                .sessions
                .get_mut(&id)
                .ok_or_else(|| not_found(EntityKind::Session, id))?;
            session.data = Some(data);
            Ok(())
        })
    }

    pub fn student(&self, id: Uuid) -> Result<Option<Student>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tables.students.get(&id).cloned())
    }

    pub fn session(&self, id: Uuid) -> Result<Option<Session>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tables.sessions.get(&id).cloned())
    }

    /// Students that have not been archived
    pub fn active_students(&self) -> Result<Vec<Student>, StoreError> {
        let tables = self.tables.read().map_err(|_| StoreError::Poisoned)?;
        Ok(tables
            .students
            .values()
            .filter(|s| s.status.is_active())
            .cloned()
            .collect())
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn fetch_students(&self) -> Result<Vec<Student>, StoreError> {
        self.check_fetch(EntityKind::Student)?;
        Ok(self.snapshot()?.students)
    }

    async fn fetch_programs(&self) -> Result<Vec<Program>, StoreError> {
        self.check_fetch(EntityKind::Program)?;
        Ok(self.snapshot()?.programs)
    }

    async fn fetch_sessions(&self) -> Result<Vec<Session>, StoreError> {
        self.check_fetch(EntityKind::Session)?;
        Ok(self.snapshot()?.sessions)
    }

    async fn fetch_behaviors(&self) -> Result<Vec<Behavior>, StoreError> {
        self.check_fetch(EntityKind::Behavior)?;
        Ok(self.snapshot()?.behaviors)
    }

    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError> {
        if self.failing_apply {
            return Err(StoreError::Unavailable("store rejected the transaction".to_string()));
        }

        let mut tables = self.tables.write().map_err(|_| StoreError::Poisoned)?;

        // Stage on a copy so a constraint failure leaves the store untouched
        let mut staged = tables.clone();
        if changes.purge_all {
            staged.purge_all();
        }
        for student in changes.students {
            staged.insert_student(student)?;
        }
        for program in changes.programs {
            staged.insert_program(program)?;
        }
        for session in changes.sessions {
            staged.insert_session(session)?;
        }
        for behavior in changes.behaviors {
            staged.insert_behavior(behavior)?;
        }

        *tables = staged;
        Ok(())
    }
}
