//! In-memory store backend.
//!
//! Keeps the same logical tables as the SQLite backend in `BTreeMap`s
//! behind one mutex, which makes every operation trivially atomic. Used
//! by the test suites and for ephemeral runs where persistence across
//! processes is not needed.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;

use crate::model::diff::Diff;
use crate::model::ident::{EntityTag, ForeignKey, InternalKey, SourceTag};

use super::{DiffId, Notification, Store, StoreError, StoredDiff};

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// A [`Store`] kept entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Next id per entity. Monotonic; survives record deletion so ids are
    /// never reused.
    sequences: HashMap<EntityTag, i64>,
    /// Live internal keys.
    records: BTreeSet<(EntityTag, i64)>,
    /// (entity, source, fk id) → internal id. Uniqueness of this map is
    /// the fk→ik function invariant.
    fk_to_ik: BTreeMap<(EntityTag, SourceTag, String), i64>,
    /// (entity, internal id, source) → fk id. Uniqueness of this map is
    /// the (ik, source)→fk function invariant.
    ik_to_fk: BTreeMap<(EntityTag, i64, SourceTag), String>,
    /// (entity, internal id) → baseline document.
    baselines: BTreeMap<(EntityTag, i64), Value>,
    /// diff id → row. BTreeMap keeps recording order.
    diffs: BTreeMap<i64, DiffRow>,
    /// (entity, internal id, diff id) triples, insertion-ordered.
    notifications: Vec<(EntityTag, i64, i64)>,
    next_diff_id: i64,
}

#[derive(Debug)]
struct DiffRow {
    entity: EntityTag,
    id: i64,
    diff: Diff,
    is_conflict: bool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn record_exists(&self, ik: &InternalKey) -> bool {
        self.records.contains(&(ik.entity().clone(), ik.id()))
    }
}

impl Store for MemoryStore {
    fn create_internal_key(&self, entity: &EntityTag) -> Result<InternalKey, StoreError> {
        let mut inner = self.lock();
        let next = inner.sequences.entry(entity.clone()).or_insert(0);
        *next += 1;
        let id = *next;
        inner.records.insert((entity.clone(), id));
        Ok(InternalKey::new(entity.clone(), id))
    }

    fn lookup_internal_key(&self, fk: &ForeignKey) -> Result<Option<InternalKey>, StoreError> {
        let inner = self.lock();
        let key = (
            fk.entity().clone(),
            fk.source().clone(),
            fk.id().to_owned(),
        );
        Ok(inner
            .fk_to_ik
            .get(&key)
            .map(|&id| InternalKey::new(fk.entity().clone(), id)))
    }

    fn delete_internal_key(&self, ik: &InternalKey) -> Result<usize, StoreError> {
        let mut inner = self.lock();
        let entity = ik.entity().clone();
        let id = ik.id();
        let mut removed = 0;

        if inner.baselines.remove(&(entity.clone(), id)).is_some() {
            removed += 1;
        }

        let diff_ids: Vec<i64> = inner
            .diffs
            .iter()
            .filter(|(_, row)| row.entity == entity && row.id == id)
            .map(|(&diff_id, _)| diff_id)
            .collect();
        for diff_id in diff_ids {
            inner.diffs.remove(&diff_id);
            removed += 1;
        }

        let before = inner.notifications.len();
        inner
            .notifications
            .retain(|(e, i, _)| !(*e == entity && *i == id));
        removed += before - inner.notifications.len();

        let fk_keys: Vec<(EntityTag, SourceTag, String)> = inner
            .fk_to_ik
            .iter()
            .filter(|&((e, _, _), ik_id)| *e == entity && *ik_id == id)
            .map(|(k, _)| k.clone())
            .collect();
        for key in fk_keys {
            inner.fk_to_ik.remove(&key);
            removed += 1;
        }
        let ik_keys: Vec<(EntityTag, i64, SourceTag)> = inner
            .ik_to_fk
            .keys()
            .filter(|(e, i, _)| *e == entity && *i == id)
            .cloned()
            .collect();
        for key in ik_keys {
            inner.ik_to_fk.remove(&key);
        }

        if inner.records.remove(&(entity, id)) {
            removed += 1;
        }
        Ok(removed)
    }

    fn record_foreign_key(&self, ik: &InternalKey, fk: &ForeignKey) -> Result<(), StoreError> {
        if ik.entity() != fk.entity() {
            return Err(StoreError::constraint(format!(
                "foreign key {fk} does not belong to entity {}",
                ik.entity()
            )));
        }
        let mut inner = self.lock();
        if !inner.record_exists(ik) {
            return Err(StoreError::constraint(format!(
                "internal key {ik} does not exist"
            )));
        }
        let fk_key = (
            fk.entity().clone(),
            fk.source().clone(),
            fk.id().to_owned(),
        );
        if let Some(&existing) = inner.fk_to_ik.get(&fk_key)
            && existing != ik.id()
        {
            return Err(StoreError::constraint(format!(
                "foreign key {fk} is already mapped to {}/{existing}",
                fk.entity()
            )));
        }
        let ik_key = (ik.entity().clone(), ik.id(), fk.source().clone());
        if let Some(existing) = inner.ik_to_fk.get(&ik_key)
            && existing != fk.id()
        {
            return Err(StoreError::constraint(format!(
                "{ik} already has foreign key {existing} in source {}",
                fk.source()
            )));
        }
        inner.fk_to_ik.insert(fk_key, ik.id());
        inner.ik_to_fk.insert(ik_key, fk.id().to_owned());
        Ok(())
    }

    fn lookup_foreign_key(
        &self,
        ik: &InternalKey,
        source: &SourceTag,
    ) -> Result<Option<ForeignKey>, StoreError> {
        let inner = self.lock();
        let key = (ik.entity().clone(), ik.id(), source.clone());
        Ok(inner.ik_to_fk.get(&key).map(|id| {
            ForeignKey::new(ik.entity().clone(), source.clone(), id.clone())
        }))
    }

    fn delete_foreign_key(&self, fk: &ForeignKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let fk_key = (
            fk.entity().clone(),
            fk.source().clone(),
            fk.id().to_owned(),
        );
        if let Some(id) = inner.fk_to_ik.remove(&fk_key) {
            inner
                .ik_to_fk
                .remove(&(fk.entity().clone(), id, fk.source().clone()));
        }
        Ok(())
    }

    fn delete_foreign_keys(&self, ik: &InternalKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let entity = ik.entity().clone();
        let id = ik.id();
        inner
            .fk_to_ik
            .retain(|(e, _, _), &mut ik_id| !(*e == entity && ik_id == id));
        inner.ik_to_fk.retain(|(e, i, _), _| !(*e == entity && *i == id));
        Ok(())
    }

    fn record_initial_document(&self, ik: &InternalKey, doc: &Value) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if !inner.record_exists(ik) {
            return Err(StoreError::constraint(format!(
                "internal key {ik} does not exist"
            )));
        }
        inner
            .baselines
            .insert((ik.entity().clone(), ik.id()), doc.clone());
        Ok(())
    }

    fn lookup_initial_document(&self, ik: &InternalKey) -> Result<Option<Value>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .baselines
            .get(&(ik.entity().clone(), ik.id()))
            .cloned())
    }

    fn delete_initial_document(&self, ik: &InternalKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        inner.baselines.remove(&(ik.entity().clone(), ik.id()));
        Ok(())
    }

    fn record_diffs(
        &self,
        ik: &InternalKey,
        merged: &Diff,
        fragments: &[Diff],
    ) -> Result<DiffId, StoreError> {
        let mut inner = self.lock();
        if !inner.record_exists(ik) {
            return Err(StoreError::constraint(format!(
                "internal key {ik} does not exist"
            )));
        }
        inner.next_diff_id += 1;
        let merged_id = inner.next_diff_id;
        inner.diffs.insert(
            merged_id,
            DiffRow {
                entity: ik.entity().clone(),
                id: ik.id(),
                diff: merged.clone(),
                is_conflict: false,
            },
        );
        for fragment in fragments {
            inner.next_diff_id += 1;
            let fragment_id = inner.next_diff_id;
            inner.diffs.insert(
                fragment_id,
                DiffRow {
                    entity: ik.entity().clone(),
                    id: ik.id(),
                    diff: fragment.clone(),
                    is_conflict: true,
                },
            );
        }
        if !fragments.is_empty() {
            inner
                .notifications
                .push((ik.entity().clone(), ik.id(), merged_id));
        }
        Ok(DiffId::new(merged_id))
    }

    fn delete_diffs(&self, ik: &InternalKey) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let entity = ik.entity().clone();
        let id = ik.id();
        inner
            .diffs
            .retain(|_, row| !(row.entity == entity && row.id == id));
        inner
            .notifications
            .retain(|(e, i, _)| !(*e == entity && *i == id));
        Ok(())
    }

    fn pending_notifications(
        &self,
        entity: Option<&EntityTag>,
    ) -> Result<Vec<Notification>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .notifications
            .iter()
            .filter(|(e, _, _)| entity.is_none_or(|want| e == want))
            .map(|(e, id, diff_id)| Notification {
                key: InternalKey::new(e.clone(), *id),
                diff_id: DiffId::new(*diff_id),
            })
            .collect())
    }

    fn conflict_fragments(&self, ik: &InternalKey) -> Result<Vec<StoredDiff>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .diffs
            .iter()
            .filter(|(_, row)| {
                row.is_conflict && row.entity == *ik.entity() && row.id == ik.id()
            })
            .map(|(&diff_id, row)| StoredDiff {
                id: DiffId::new(diff_id),
                key: InternalKey::new(row.entity.clone(), row.id),
                diff: row.diff.clone(),
                is_conflict: true,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(s: &str) -> EntityTag {
        EntityTag::new(s).unwrap()
    }

    fn source(s: &str) -> SourceTag {
        SourceTag::new(s).unwrap()
    }

    #[test]
    fn internal_key_ids_are_never_reused() {
        let store = MemoryStore::new();
        let e = entity("user");
        let ik1 = store.create_internal_key(&e).unwrap();
        store.delete_internal_key(&ik1).unwrap();
        let ik2 = store.create_internal_key(&e).unwrap();
        assert_ne!(ik1.id(), ik2.id());
    }

    #[test]
    fn sequences_are_per_entity() {
        let store = MemoryStore::new();
        let ik_user = store.create_internal_key(&entity("user")).unwrap();
        let ik_order = store.create_internal_key(&entity("order")).unwrap();
        assert_eq!(ik_user.id(), 1);
        assert_eq!(ik_order.id(), 1);
    }

    #[test]
    fn record_foreign_key_rejects_second_ik_for_same_fk() {
        let store = MemoryStore::new();
        let e = entity("user");
        let ik1 = store.create_internal_key(&e).unwrap();
        let ik2 = store.create_internal_key(&e).unwrap();
        let fk = ForeignKey::new(e.clone(), source("a"), "x");
        store.record_foreign_key(&ik1, &fk).unwrap();
        assert!(store.record_foreign_key(&ik2, &fk).is_err());
    }

    #[test]
    fn record_foreign_key_rejects_second_fk_for_same_source() {
        let store = MemoryStore::new();
        let e = entity("user");
        let ik = store.create_internal_key(&e).unwrap();
        store
            .record_foreign_key(&ik, &ForeignKey::new(e.clone(), source("a"), "x"))
            .unwrap();
        let err = store
            .record_foreign_key(&ik, &ForeignKey::new(e.clone(), source("a"), "y"))
            .unwrap_err();
        assert!(matches!(err, StoreError::Constraint { .. }));
    }

    #[test]
    fn record_foreign_key_is_idempotent_for_same_mapping() {
        let store = MemoryStore::new();
        let e = entity("user");
        let ik = store.create_internal_key(&e).unwrap();
        let fk = ForeignKey::new(e.clone(), source("a"), "x");
        store.record_foreign_key(&ik, &fk).unwrap();
        store.record_foreign_key(&ik, &fk).unwrap();
    }

    #[test]
    fn record_foreign_key_rejects_entity_mismatch() {
        let store = MemoryStore::new();
        let ik = store.create_internal_key(&entity("user")).unwrap();
        let fk = ForeignKey::new(entity("order"), source("a"), "x");
        assert!(store.record_foreign_key(&ik, &fk).is_err());
    }

    #[test]
    fn record_foreign_key_rejects_missing_record() {
        let store = MemoryStore::new();
        let e = entity("user");
        let ik = InternalKey::new(e.clone(), 999);
        let fk = ForeignKey::new(e, source("a"), "x");
        assert!(store.record_foreign_key(&ik, &fk).is_err());
    }

    #[test]
    fn delete_cascades_and_counts_rows() {
        let store = MemoryStore::new();
        let e = entity("user");
        let ik = store.create_internal_key(&e).unwrap();
        store
            .record_foreign_key(&ik, &ForeignKey::new(e.clone(), source("a"), "x"))
            .unwrap();
        store
            .record_foreign_key(&ik, &ForeignKey::new(e.clone(), source("b"), "y"))
            .unwrap();
        store.record_initial_document(&ik, &json!({})).unwrap();
        let merged = Diff::default();
        let fragment = Diff::default().with_label("source-0");
        store.record_diffs(&ik, &merged, &[fragment]).unwrap();

        // record + 2 fks + baseline + merged diff + fragment + notification
        let removed = store.delete_internal_key(&ik).unwrap();
        assert_eq!(removed, 7);

        assert!(store.lookup_initial_document(&ik).unwrap().is_none());
        assert!(
            store
                .lookup_foreign_key(&ik, &source("a"))
                .unwrap()
                .is_none()
        );
        assert!(store.pending_notifications(None).unwrap().is_empty());
        assert!(store.conflict_fragments(&ik).unwrap().is_empty());
    }

    #[test]
    fn delete_internal_key_is_idempotent() {
        let store = MemoryStore::new();
        let ik = store.create_internal_key(&entity("user")).unwrap();
        assert_eq!(store.delete_internal_key(&ik).unwrap(), 1);
        assert_eq!(store.delete_internal_key(&ik).unwrap(), 0);
    }

    #[test]
    fn baseline_roundtrip_and_replace() {
        let store = MemoryStore::new();
        let ik = store.create_internal_key(&entity("user")).unwrap();
        store
            .record_initial_document(&ik, &json!({"v": 1}))
            .unwrap();
        assert_eq!(
            store.lookup_initial_document(&ik).unwrap(),
            Some(json!({"v": 1}))
        );
        store
            .record_initial_document(&ik, &json!({"v": 2}))
            .unwrap();
        assert_eq!(
            store.lookup_initial_document(&ik).unwrap(),
            Some(json!({"v": 2}))
        );
    }

    #[test]
    fn record_diffs_with_fragments_notifies() {
        let store = MemoryStore::new();
        let ik = store.create_internal_key(&entity("user")).unwrap();
        let id = store
            .record_diffs(&ik, &Diff::default(), &[Diff::default().with_label("source-1")])
            .unwrap();
        let pending = store.pending_notifications(None).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, ik);
        assert_eq!(pending[0].diff_id, id);
    }

    #[test]
    fn record_diffs_without_fragments_does_not_notify() {
        let store = MemoryStore::new();
        let ik = store.create_internal_key(&entity("user")).unwrap();
        store.record_diffs(&ik, &Diff::default(), &[]).unwrap();
        assert!(store.pending_notifications(None).unwrap().is_empty());
    }

    #[test]
    fn pending_notifications_filters_by_entity() {
        let store = MemoryStore::new();
        let ik_user = store.create_internal_key(&entity("user")).unwrap();
        let ik_order = store.create_internal_key(&entity("order")).unwrap();
        let fragment = [Diff::default().with_label("source-0")];
        store.record_diffs(&ik_user, &Diff::default(), &fragment).unwrap();
        store.record_diffs(&ik_order, &Diff::default(), &fragment).unwrap();

        let user_only = store.pending_notifications(Some(&entity("user"))).unwrap();
        assert_eq!(user_only.len(), 1);
        assert_eq!(user_only[0].key, ik_user);
        assert_eq!(store.pending_notifications(None).unwrap().len(), 2);
    }

    #[test]
    fn conflict_fragments_returns_only_fragments() {
        let store = MemoryStore::new();
        let ik = store.create_internal_key(&entity("user")).unwrap();
        let fragment = Diff::default().with_label("source-0");
        store
            .record_diffs(&ik, &Diff::default(), std::slice::from_ref(&fragment))
            .unwrap();
        let stored = store.conflict_fragments(&ik).unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_conflict);
        assert_eq!(stored[0].diff.label.as_deref(), Some("source-0"));
    }

    #[test]
    fn delete_foreign_key_is_idempotent() {
        let store = MemoryStore::new();
        let e = entity("user");
        let fk = ForeignKey::new(e, source("a"), "x");
        store.delete_foreign_key(&fk).unwrap();
    }

    #[test]
    fn delete_foreign_keys_removes_all_sources() {
        let store = MemoryStore::new();
        let e = entity("user");
        let ik = store.create_internal_key(&e).unwrap();
        store
            .record_foreign_key(&ik, &ForeignKey::new(e.clone(), source("a"), "x"))
            .unwrap();
        store
            .record_foreign_key(&ik, &ForeignKey::new(e.clone(), source("b"), "y"))
            .unwrap();
        store.delete_foreign_keys(&ik).unwrap();
        assert!(
            store
                .lookup_foreign_key(&ik, &source("a"))
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .lookup_foreign_key(&ik, &source("b"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn fk_roundtrip() {
        let store = MemoryStore::new();
        let e = entity("user");
        let ik = store.create_internal_key(&e).unwrap();
        let fk = ForeignKey::new(e.clone(), source("a"), "remote-9");
        store.record_foreign_key(&ik, &fk).unwrap();
        assert_eq!(store.lookup_internal_key(&fk).unwrap(), Some(ik.clone()));
        assert_eq!(
            store.lookup_foreign_key(&ik, &source("a")).unwrap(),
            Some(fk)
        );
    }
}
