//! The operational store: persistent keys, baselines, diffs, notifications.
//!
//! The store is the reconciler's memory. It maps foreign keys to internal
//! keys, remembers the baseline document each diff is computed against,
//! and keeps every recorded diff — merged and conflict fragments — plus a
//! notification row for each merge that produced conflicts.
//!
//! Two backends implement [`Store`]: [`memory::MemoryStore`] and
//! [`sqlite::SqliteStore`]. Both satisfy the same transactional contract,
//! checked by the shared contract test suite; every write is all-or-nothing
//! and a reader never sees a half-applied update.

pub mod memory;
pub mod sqlite;

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::diff::Diff;
use crate::model::ident::{EntityTag, ForeignKey, InternalKey, SourceTag};

// ---------------------------------------------------------------------------
// DiffId
// ---------------------------------------------------------------------------

/// Store-allocated identity of a recorded diff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiffId(i64);

impl DiffId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for DiffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// StoredDiff / Notification
// ---------------------------------------------------------------------------

/// A diff as persisted: payload plus identity and conflict marker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredDiff {
    /// Store-allocated id.
    pub id: DiffId,
    /// The record this diff belongs to.
    pub key: InternalKey,
    /// The diff payload.
    pub diff: Diff,
    /// `true` for conflict fragments, `false` for the merged diff.
    pub is_conflict: bool,
}

/// A persisted flag that a record has unresolved conflict fragments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notification {
    /// The record with unresolved conflicts.
    pub key: InternalKey,
    /// The merged diff whose merge produced the fragments.
    pub diff_id: DiffId,
}

// ---------------------------------------------------------------------------
// StoreError
// ---------------------------------------------------------------------------

/// Errors from the operational store.
#[derive(Debug)]
pub enum StoreError {
    /// A write would violate a store invariant (duplicate mapping, tag
    /// mismatch, dangling reference).
    Constraint {
        /// Which invariant, and the offending values.
        detail: String,
    },

    /// A persisted payload could not be decoded.
    Decode {
        /// What failed to decode.
        detail: String,
    },

    /// The backing engine failed: transaction, connectivity, or I/O.
    Backend {
        /// Backend-reported detail.
        detail: String,
    },
}

impl StoreError {
    /// Shorthand for a [`StoreError::Constraint`].
    pub fn constraint(detail: impl Into<String>) -> Self {
        Self::Constraint {
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`StoreError::Decode`].
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            detail: detail.into(),
        }
    }

    /// Shorthand for a [`StoreError::Backend`].
    pub fn backend(detail: impl Into<String>) -> Self {
        Self::Backend {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constraint { detail } => write!(f, "store invariant violated: {detail}"),
            Self::Decode { detail } => write!(f, "stored payload is corrupt: {detail}"),
            Self::Backend { detail } => write!(f, "store backend failed: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The operational store contract.
///
/// Object-safe and shareable across threads; implementations serialise
/// concurrent writers internally. Every mutating operation is atomic.
///
/// # Key invariants
///
/// - A foreign key maps to at most one internal key, and an (internal key,
///   source) pair to at most one foreign key.
/// - An internal key's entity tag matches the tags of everything recorded
///   under it.
/// - At most one baseline per record; replacing it is atomic.
/// - Diffs are append-only for a live record; deleting the record purges
///   baselines, diffs, fragments, notifications, and foreign keys.
/// - Internal key ids are never reused, even after deletion.
pub trait Store: Send + Sync {
    /// Allocate and persist a fresh internal key for `entity`.
    fn create_internal_key(&self, entity: &EntityTag) -> Result<InternalKey, StoreError>;

    /// Look up the internal key a foreign key maps to. Pure read;
    /// `None` means the foreign key is unknown.
    fn lookup_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError>;

    /// Delete a record and everything referencing it: baseline, diffs,
    /// conflict fragments, notifications, foreign keys, and the key row.
    /// Returns the number of rows removed. Idempotent.
    fn delete_internal_key(&self, ik: &InternalKey) -> Result<usize, StoreError>;

    /// Insert an (internal key, foreign key) mapping.
    ///
    /// # Errors
    /// Fails with [`StoreError::Constraint`] if the mapping would give the
    /// foreign key a second internal key, the (key, source) pair a second
    /// foreign key, or the tags disagree.
    fn record_foreign_key(&self, ik: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError>;

    /// Look up the foreign key recorded for (internal key, source).
    /// Pure read.
    fn lookup_foreign_key(
        &self,
        ik: &InternalKey,
        source: &SourceTag,
    ) -> Result<Option<ForeignKey>, StoreError>;

    /// Remove one foreign-key mapping. Idempotent.
    fn delete_foreign_key(&self, fk: &ForeignKey) -> Result<(), StoreError>;

    /// Remove every foreign-key mapping for a record. Idempotent.
    fn delete_foreign_keys(&self, ik: &InternalKey) -> Result<(), StoreError>;

    /// Record the baseline document for a record, atomically replacing any
    /// previous baseline.
    fn record_initial_document(&self, ik: &InternalKey, doc: &Value) -> Result<(), StoreError>;

    /// Fetch the baseline document. Pure read.
    fn lookup_initial_document(&self, ik: &InternalKey) -> Result<Option<Value>, StoreError>;

    /// Remove the baseline document. Idempotent.
    fn delete_initial_document(&self, ik: &InternalKey) -> Result<(), StoreError>;

    /// Persist `merged` as the authoritative diff for a reconciliation and
    /// each fragment with the conflict marker set, all under `ik`. When
    /// `fragments` is non-empty, also records a notification referencing
    /// the merged diff. Returns the merged diff's id.
    fn record_diffs(
        &self,
        ik: &InternalKey,
        merged: &Diff,
        fragments: &[Diff],
    ) -> Result<DiffId, StoreError>;

    /// Remove all diffs, fragments, and notifications for a record.
    /// Idempotent.
    fn delete_diffs(&self, ik: &InternalKey) -> Result<(), StoreError>;

    /// Unresolved conflict notifications, oldest first, optionally
    /// restricted to one entity. Pure read.
    fn pending_notifications(
        &self,
        entity: Option<&EntityTag>,
    ) -> Result<Vec<Notification>, StoreError>;

    /// The conflict fragments recorded for a record, in recording order.
    /// Pure read.
    fn conflict_fragments(&self, ik: &InternalKey) -> Result<Vec<StoredDiff>, StoreError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
