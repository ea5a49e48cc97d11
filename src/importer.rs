//! Backup import
//!
//! Reconciles a [`BackupDocument`] into the live store. Records are resolved
//! parents-first (students → programs → sessions → behaviors) so each kind can
//! check its foreign keys against what is already stored plus what this import
//! has accepted so far. Records that cannot be resolved are dropped and logged;
//! the rest is written as one [`ChangeSet`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ImportError;
use crate::schema::{decode_document, BackupDocument, CURRENT_SCHEMA_VERSION};
use crate::store::{ChangeSet, EntityStore};
use crate::types::EntityKind;

/// Conflict policy for an import
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportStrategy {
    /// Keep existing entities, add records whose id is not stored yet
    #[default]
    Merge,
    /// Hard-delete everything, then import the whole document
    Replace,
    /// Same as `Merge`
    Skip,
}

impl ImportStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportStrategy::Merge => "merge",
            ImportStrategy::Replace => "replace",
            ImportStrategy::Skip => "skip",
        }
    }
}

impl FromStr for ImportStrategy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "merge" => Ok(ImportStrategy::Merge),
            "replace" => Ok(ImportStrategy::Replace),
            "skip" => Ok(ImportStrategy::Skip),
            other => Err(format!("unknown import strategy '{other}'")),
        }
    }
}

/// Per-kind import tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KindSummary {
    pub inserted: usize,
    /// Already stored, or repeated within the document
    pub skipped: usize,
    /// Malformed id or unresolvable parent
    pub dropped: usize,
}

/// Outcome of a successful import
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub strategy: ImportStrategy,
    pub students: KindSummary,
    pub programs: KindSummary,
    pub sessions: KindSummary,
    pub behaviors: KindSummary,
    /// Sessions imported without their program link
    pub unlinked_sessions: usize,
}

impl ImportSummary {
    fn new(strategy: ImportStrategy) -> Self {
        Self {
            strategy,
            students: KindSummary::default(),
            programs: KindSummary::default(),
            sessions: KindSummary::default(),
            behaviors: KindSummary::default(),
            unlinked_sessions: 0,
        }
    }

    pub fn inserted(&self) -> usize {
        self.students.inserted + self.programs.inserted + self.sessions.inserted + self.behaviors.inserted
    }

    pub fn dropped(&self) -> usize {
        self.students.dropped + self.programs.dropped + self.sessions.dropped + self.behaviors.dropped
    }
}

/// Ids visible to foreign-key resolution during one import
#[derive(Debug, Default)]
struct KnownIds {
    students: HashSet<Uuid>,
    programs: HashSet<Uuid>,
    sessions: HashSet<Uuid>,
    behaviors: HashSet<Uuid>,
}

impl KnownIds {
    async fn load(store: &dyn EntityStore) -> Result<Self, ImportError> {
        Ok(Self {
            students: store.ids(EntityKind::Student).await?,
            programs: store.ids(EntityKind::Program).await?,
            sessions: store.ids(EntityKind::Session).await?,
            behaviors: store.ids(EntityKind::Behavior).await?,
        })
    }
}

fn drop_record(kind: EntityKind, id: &str, reason: &str, tally: &mut KindSummary) {
    warn!(kind = %kind, id, reason, "Dropped backup record");
    tally.dropped += 1;
}

/// Importer for backup documents
pub struct Importer {
    store: Arc<dyn EntityStore>,
}

impl Importer {
    pub fn new(store: Arc<dyn EntityStore>) -> Self {
        Self { store }
    }

    /// Decode JSON bytes and import them
    pub async fn import_bytes(
        &self,
        bytes: &[u8],
        strategy: ImportStrategy,
    ) -> Result<ImportSummary, ImportError> {
        let document = decode_document(bytes)?;
        self.import(&document, strategy).await
    }

    /// Import a document under the given strategy.
    ///
    /// Fails without touching the store if the document's schema is newer
    /// than [`CURRENT_SCHEMA_VERSION`].
    pub async fn import(
        &self,
        document: &BackupDocument,
        strategy: ImportStrategy,
    ) -> Result<ImportSummary, ImportError> {
        let found = document.metadata.schema_version;
        if found > CURRENT_SCHEMA_VERSION {
            warn!(
                backup_id = %document.metadata.id,
                found,
                supported = CURRENT_SCHEMA_VERSION,
                "Refusing backup from a newer schema"
            );
            return Err(ImportError::IncompatibleSchema {
                found,
                supported: CURRENT_SCHEMA_VERSION,
            });
        }

        let replace = strategy == ImportStrategy::Replace;

        // Replace purges the store first, so only this document's records resolve
        let mut known = if replace {
            KnownIds::default()
        } else {
            KnownIds::load(self.store.as_ref()).await?
        };

        let mut changes = ChangeSet {
            purge_all: replace,
            ..ChangeSet::default()
        };
        let mut summary = ImportSummary::new(strategy);

        for record in &document.students {
            let tally = &mut summary.students;
            let student = match record.to_entity() {
                Ok(student) => student,
                Err(e) => {
                    drop_record(EntityKind::Student, &record.id, &e.to_string(), tally);
                    continue;
                }
            };
            if !known.students.insert(student.id) {
                debug!(kind = "student", id = %student.id, "Skipping existing record");
                tally.skipped += 1;
                continue;
            }
            changes.students.push(student);
            tally.inserted += 1;
        }

        for record in &document.programs {
            let tally = &mut summary.programs;
            let program = match record.to_entity() {
                Ok(program) => program,
                Err(e) => {
                    drop_record(EntityKind::Program, &record.id, &e.to_string(), tally);
                    continue;
                }
            };
            if known.programs.contains(&program.id) {
                debug!(kind = "program", id = %program.id, "Skipping existing record");
                tally.skipped += 1;
                continue;
            }
            if !known.students.contains(&program.student_id) {
                drop_record(EntityKind::Program, &record.id, "student not found", tally);
                continue;
            }
            known.programs.insert(program.id);
            changes.programs.push(program);
            tally.inserted += 1;
        }

        for record in &document.sessions {
            let tally = &mut summary.sessions;
            let mut session = match record.to_entity() {
                Ok(session) => session,
                Err(e) => {
                    drop_record(EntityKind::Session, &record.id, &e.to_string(), tally);
                    continue;
                }
            };
            if known.sessions.contains(&session.id) {
                debug!(kind = "session", id = %session.id, "Skipping existing record");
                tally.skipped += 1;
                continue;
            }
            if !known.students.contains(&session.student_id) {
                drop_record(EntityKind::Session, &record.id, "student not found", tally);
                continue;
            }
            let program_resolves = session
                .program_id
                .map_or(false, |id| known.programs.contains(&id));
            if record.program_id.is_some() && !program_resolves {
                warn!(
                    kind = "session",
                    id = %session.id,
                    program_id = record.program_id.as_deref().unwrap_or_default(),
                    "Program not found, importing session unlinked"
                );
                session.program_id = None;
                summary.unlinked_sessions += 1;
            }
            known.sessions.insert(session.id);
            changes.sessions.push(session);
            tally.inserted += 1;
        }

        for record in &document.behaviors {
            let tally = &mut summary.behaviors;
            let behavior = match record.to_entity() {
                Ok(behavior) => behavior,
                Err(e) => {
                    drop_record(EntityKind::Behavior, &record.id, &e.to_string(), tally);
                    continue;
                }
            };
            if known.behaviors.contains(&behavior.id) {
                debug!(kind = "behavior", id = %behavior.id, "Skipping existing record");
                tally.skipped += 1;
                continue;
            }
            if !known.sessions.contains(&behavior.session_id) {
                drop_record(EntityKind::Behavior, &record.id, "session not found", tally);
                continue;
            }
            known.behaviors.insert(behavior.id);
            changes.behaviors.push(behavior);
            tally.inserted += 1;
        }

        if !changes.is_empty() {
            debug!(
                writes = changes.insert_count(),
                purge_all = changes.purge_all,
                records = document.record_count(),
                "Applying import"
            );
            self.store.apply(changes).await?;
        }

        info!(
            backup_id = %document.metadata.id,
            strategy = strategy.as_str(),
            inserted = summary.inserted(),
            dropped = summary.dropped(),
            "Imported backup"
        );

        Ok(summary)
    }
}
