//! Live entity store boundary
//!
//! The backup engine never owns the live store. It reads through
//! [`EntityStore`] and writes a single atomic [`ChangeSet`] per import.

mod memory;

pub use memory::{MemoryStore, StoreSnapshot};

use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{Behavior, EntityKind, Program, Session, Student};

/// Read/write access to the relational entity store
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch every student, including archived ones
    async fn fetch_students(&self) -> Result<Vec<Student>, StoreError>;

    /// Fetch every program, including archived ones
    async fn fetch_programs(&self) -> Result<Vec<Program>, StoreError>;

    async fn fetch_sessions(&self) -> Result<Vec<Session>, StoreError>;

    async fn fetch_behaviors(&self) -> Result<Vec<Behavior>, StoreError>;

    /// Apply a change set as one transaction. Either every change is
    /// committed or none is.
    async fn apply(&self, changes: ChangeSet) -> Result<(), StoreError>;

    /// Ids of every stored entity of one kind
    async fn ids(&self, kind: EntityKind) -> Result<HashSet<Uuid>, StoreError> {
        let ids: HashSet<Uuid> = match kind {
            EntityKind::Student => self.fetch_students().await?.iter().map(|s| s.id).collect(),
            EntityKind::Program => self.fetch_programs().await?.iter().map(|p| p.id).collect(),
            EntityKind::Session => self.fetch_sessions().await?.iter().map(|s| s.id).collect(),
            EntityKind::Behavior => self.fetch_behaviors().await?.iter().map(|b| b.id).collect(),
        };
        Ok(ids)
    }
}

/// A batch of writes applied atomically by [`EntityStore::apply`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    /// Hard-delete everything before inserting (behaviors, sessions,
    /// programs, then students)
    pub purge_all: bool,
    pub students: Vec<Student>,
    pub programs: Vec<Program>,
    pub sessions: Vec<Session>,
    pub behaviors: Vec<Behavior>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        !self.purge_all
            && self.students.is_empty()
            && self.programs.is_empty()
            && self.sessions.is_empty()
            && self.behaviors.is_empty()
    }

    pub fn insert_count(&self) -> usize {
        self.students.len() + self.programs.len() + self.sessions.len() + self.behaviors.len()
    }
}
