//! SQLite store backend.
//!
//! Five logical tables (`records`, `foreign_keys`, `baselines`, `diffs`,
//! `notifications`) plus a `key_sequence` table that allocates internal
//! ids monotonically so they are never reused after deletion. Every
//! mutating operation runs inside an explicit transaction; uniqueness
//! constraints back the fk↔ik function invariants at the engine level
//! as well as here.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::model::diff::Diff;
use crate::model::ident::{EntityTag, ForeignKey, InternalKey, SourceTag};

use super::{DiffId, Notification, Store, StoreError, StoredDiff};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    entity  TEXT NOT NULL,
    id      INTEGER NOT NULL,
    PRIMARY KEY (entity, id)
);

CREATE TABLE IF NOT EXISTS key_sequence (
    entity  TEXT PRIMARY KEY,
    next_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS foreign_keys (
    entity  TEXT NOT NULL,
    id      INTEGER NOT NULL,
    source  TEXT NOT NULL,
    fk      TEXT NOT NULL,
    UNIQUE (entity, source, fk),
    UNIQUE (entity, id, source)
);

CREATE TABLE IF NOT EXISTS baselines (
    entity   TEXT NOT NULL,
    id       INTEGER NOT NULL,
    document TEXT NOT NULL,
    PRIMARY KEY (entity, id)
);

CREATE TABLE IF NOT EXISTS diffs (
    diff_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    entity      TEXT NOT NULL,
    id          INTEGER NOT NULL,
    content     TEXT NOT NULL,
    is_conflict INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS notifications (
    note_id INTEGER PRIMARY KEY AUTOINCREMENT,
    entity  TEXT NOT NULL,
    id      INTEGER NOT NULL,
    diff_id INTEGER NOT NULL
);
";

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// A [`Store`] persisted in a SQLite database.
///
/// The connection is opened at construction and held for the store's
/// lifetime; a mutex serialises writers, which also satisfies the
/// per-record write serialisation the engine relies on.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store at `path` and apply the schema.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or the schema
    /// cannot be applied.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::backend(format!("open {}: {e}", path.display())))?;
        Self::from_connection(conn)
    }

    /// Open a private in-memory store. Used by tests.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::backend(format!("open in-memory: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::backend(e.to_string())
    }
}

fn encode_diff(diff: &Diff) -> Result<String, StoreError> {
    serde_json::to_string(diff)
        .map_err(|e| StoreError::backend(format!("could not serialise diff: {e}")))
}

fn decode_diff(content: &str) -> Result<Diff, StoreError> {
    serde_json::from_str(content)
        .map_err(|e| StoreError::decode(format!("diff payload: {e}")))
}

fn decode_entity(raw: &str) -> Result<EntityTag, StoreError> {
    EntityTag::new(raw).map_err(|e| StoreError::decode(format!("entity tag: {e}")))
}

fn record_exists(conn: &Connection, ik: &InternalKey) -> Result<bool, StoreError> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM records WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

impl Store for SqliteStore {
    fn create_internal_key(&self, entity: &EntityTag) -> Result<InternalKey, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO key_sequence (entity, next_id) VALUES (?1, 1)
             ON CONFLICT (entity) DO UPDATE SET next_id = next_id + 1",
            params![entity.as_str()],
        )?;
        let id: i64 = tx.query_row(
            "SELECT next_id FROM key_sequence WHERE entity = ?1",
            params![entity.as_str()],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT INTO records (entity, id) VALUES (?1, ?2)",
            params![entity.as_str(), id],
        )?;
        tx.commit()?;
        Ok(InternalKey::new(entity.clone(), id))
    }

    fn lookup_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError> {
        let conn = self.lock();
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
                params![fk.entity().as_str(), fk.source().as_str(), fk.id()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id.map(|id| InternalKey::new(fk.entity().clone(), id)))
    }

    fn delete_internal_key(&self, ik: &InternalKey) -> Result<usize, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        removed += tx.execute(
            "DELETE FROM baselines WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        removed += tx.execute(
            "DELETE FROM diffs WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        removed += tx.execute(
            "DELETE FROM notifications WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        removed += tx.execute(
            "DELETE FROM foreign_keys WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        removed += tx.execute(
            "DELETE FROM records WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    fn record_foreign_key(&self, ik: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError> {
        if ik.entity() != fk.entity() {
            return Err(StoreError::constraint(format!(
                "foreign key {fk} does not belong to entity {}",
                ik.entity()
            )));
        }
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        if !record_exists(&tx, ik)? {
            return Err(StoreError::constraint(format!(
                "internal key {ik} does not exist"
            )));
        }
        let mapped: Option<i64> = tx
            .query_row(
                "SELECT id FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
                params![fk.entity().as_str(), fk.source().as_str(), fk.id()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = mapped {
            if existing == ik.id() {
                return Ok(());
            }
            return Err(StoreError::constraint(format!(
                "foreign key {fk} is already mapped to {}/{existing}",
                fk.entity()
            )));
        }
        let existing_fk: Option<String> = tx
            .query_row(
                "SELECT fk FROM foreign_keys WHERE entity = ?1 AND id = ?2 AND source = ?3",
                params![ik.entity().as_str(), ik.id(), fk.source().as_str()],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(existing) = existing_fk {
            return Err(StoreError::constraint(format!(
                "{ik} already has foreign key {existing} in source {}",
                fk.source()
            )));
        }
        tx.execute(
            "INSERT INTO foreign_keys (entity, id, source, fk) VALUES (?1, ?2, ?3, ?4)",
            params![
                fk.entity().as_str(),
                ik.id(),
                fk.source().as_str(),
                fk.id()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lookup_foreign_key(
        &self,
        ik: &InternalKey,
        source: &SourceTag,
    ) -> Result<Option<ForeignKey>, StoreError> {
        let conn = self.lock();
        let fk: Option<String> = conn
            .query_row(
                "SELECT fk FROM foreign_keys WHERE entity = ?1 AND id = ?2 AND source = ?3",
                params![ik.entity().as_str(), ik.id(), source.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fk.map(|id| ForeignKey::new(ik.entity().clone(), source.clone(), id)))
    }

    fn delete_foreign_key(&self, fk: &ForeignKey) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM foreign_keys WHERE entity = ?1 AND source = ?2 AND fk = ?3",
            params![fk.entity().as_str(), fk.source().as_str(), fk.id()],
        )?;
        Ok(())
    }

    fn delete_foreign_keys(&self, ik: &InternalKey) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM foreign_keys WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        Ok(())
    }

    fn record_initial_document(&self, ik: &InternalKey, doc: &Value) -> Result<(), StoreError> {
        let body = serde_json::to_string(doc)
            .map_err(|e| StoreError::backend(format!("could not serialise baseline: {e}")))?;
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        if !record_exists(&tx, ik)? {
            return Err(StoreError::constraint(format!(
                "internal key {ik} does not exist"
            )));
        }
        // Atomic replace: delete-then-insert inside one transaction.
        tx.execute(
            "DELETE FROM baselines WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        tx.execute(
            "INSERT INTO baselines (entity, id, document) VALUES (?1, ?2, ?3)",
            params![ik.entity().as_str(), ik.id(), body],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn lookup_initial_document(&self, ik: &InternalKey) -> Result<Option<Value>, StoreError> {
        let conn = self.lock();
        let body: Option<String> = conn
            .query_row(
                "SELECT document FROM baselines WHERE entity = ?1 AND id = ?2",
                params![ik.entity().as_str(), ik.id()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| StoreError::decode(format!("baseline payload: {e}")))
        })
        .transpose()
    }

    fn delete_initial_document(&self, ik: &InternalKey) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute(
            "DELETE FROM baselines WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        Ok(())
    }

    fn record_diffs(
        &self,
        ik: &InternalKey,
        merged: &Diff,
        fragments: &[Diff],
    ) -> Result<DiffId, StoreError> {
        let merged_body = encode_diff(merged)?;
        let fragment_bodies: Vec<String> =
            fragments.iter().map(encode_diff).collect::<Result<_, _>>()?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        if !record_exists(&tx, ik)? {
            return Err(StoreError::constraint(format!(
                "internal key {ik} does not exist"
            )));
        }
        tx.execute(
            "INSERT INTO diffs (entity, id, content, is_conflict) VALUES (?1, ?2, ?3, 0)",
            params![ik.entity().as_str(), ik.id(), merged_body],
        )?;
        let merged_id = tx.last_insert_rowid();
        for body in &fragment_bodies {
            tx.execute(
                "INSERT INTO diffs (entity, id, content, is_conflict) VALUES (?1, ?2, ?3, 1)",
                params![ik.entity().as_str(), ik.id(), body],
            )?;
        }
        if !fragments.is_empty() {
            tx.execute(
                "INSERT INTO notifications (entity, id, diff_id) VALUES (?1, ?2, ?3)",
                params![ik.entity().as_str(), ik.id(), merged_id],
            )?;
        }
        tx.commit()?;
        Ok(DiffId::new(merged_id))
    }

    fn delete_diffs(&self, ik: &InternalKey) -> Result<(), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM diffs WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        tx.execute(
            "DELETE FROM notifications WHERE entity = ?1 AND id = ?2",
            params![ik.entity().as_str(), ik.id()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn pending_notifications(
        &self,
        entity: Option<&EntityTag>,
    ) -> Result<Vec<Notification>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT entity, id, diff_id FROM notifications
             WHERE ?1 IS NULL OR entity = ?1 ORDER BY note_id",
        )?;
        let rows = stmt.query_map(params![entity.map(EntityTag::as_str)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (entity_raw, id, diff_id) = row?;
            out.push(Notification {
                key: InternalKey::new(decode_entity(&entity_raw)?, id),
                diff_id: DiffId::new(diff_id),
            });
        }
        Ok(out)
    }

    fn conflict_fragments(&self, ik: &InternalKey) -> Result<Vec<StoredDiff>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT diff_id, content FROM diffs
             WHERE entity = ?1 AND id = ?2 AND is_conflict = 1 ORDER BY diff_id",
        )?;
        let rows = stmt.query_map(params![ik.entity().as_str(), ik.id()], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (diff_id, content) = row?;
            out.push(StoredDiff {
                id: DiffId::new(diff_id),
                key: ik.clone(),
                diff: decode_diff(&content)?,
                is_conflict: true,
            });
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
