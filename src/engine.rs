//! The reconciliation engine.
//!
//! Determination is a pure read over the store and the notifying source:
//!
//! | internal key? | document? | operation |
//! |---------------|-----------|-----------|
//! | none          | error     | Problem   |
//! | none          | ok        | Create    |
//! | some          | error     | Delete    |
//! | some          | ok        | Update    |
//!
//! Execution then drives the gateway, the diff/merge layer, and the store.
//! Per-source propagation failures are logged and accumulated, never
//! fatal — a single flaky source must not block the others. Store errors
//! are fatal to the request.
//!
//! A per-record lock table serialises effects on the same internal key;
//! requests touching different records proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{Catalog, EntitySpec};
use crate::error::Error;
use crate::gateway::{Gateway, PerSource};
use crate::model::diff::{Diff, apply, diff};
use crate::model::document::{Document, flatten, unflatten};
use crate::model::ident::{EntityTag, ForeignKey, InternalKey, SourceTag};
use crate::model::merge::{IgnoreConflicts, merge};
use crate::store::{DiffId, Store};

// ---------------------------------------------------------------------------
// Operation
// ---------------------------------------------------------------------------

/// The operation determination settles on for one change notification.
#[derive(Debug)]
pub enum Operation {
    /// The record is new: no mapping, and the source has a document.
    Create {
        /// The notifying source's key.
        fk: ForeignKey,
        /// The document found there.
        doc: Document,
    },
    /// The record is known and the source still has it.
    Update {
        /// The record to reconcile.
        ik: InternalKey,
    },
    /// The record is known but gone from the notifying source.
    Delete {
        /// The record to remove everywhere.
        ik: InternalKey,
    },
    /// Nothing can be done: no mapping and no document.
    Problem {
        /// The key the notification named.
        fk: ForeignKey,
        /// Why the notification is unactionable.
        reason: String,
    },
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// What a processed notification did.
#[derive(Debug)]
pub struct Outcome {
    /// The operation that was executed.
    pub operation: OperationKind,
    /// Per-source propagation failures (non-fatal by design).
    pub failures: Vec<SourceFailure>,
    /// The recorded merged diff, for updates.
    pub diff_id: Option<DiffId>,
    /// Number of conflict fragments recorded.
    pub conflicts: usize,
}

impl Outcome {
    fn bare(operation: OperationKind) -> Self {
        Self {
            operation,
            failures: Vec::new(),
            diff_id: None,
            conflicts: 0,
        }
    }
}

/// The executed operation, with the record it acted on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationKind {
    /// A new record was registered and broadcast.
    Created(InternalKey),
    /// An existing record was reconciled.
    Updated(InternalKey),
    /// A record was removed everywhere.
    Deleted(InternalKey),
    /// The notification was unactionable; nothing was mutated.
    Problem {
        /// The key the notification named.
        key: ForeignKey,
        /// Why it was unactionable.
        reason: String,
    },
}

/// A non-fatal failure while propagating to one source.
#[derive(Debug)]
pub struct SourceFailure {
    /// The source that failed.
    pub source: SourceTag,
    /// What went wrong there.
    pub error: Error,
}

fn collect_failures<T>(results: Vec<PerSource<T>>) -> Vec<SourceFailure> {
    results
        .into_iter()
        .filter_map(|per| match per.result {
            Ok(_) => None,
            Err(error) => Some(SourceFailure {
                source: per.source,
                error,
            }),
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// The reconciliation engine: catalog + store + per-record locks.
pub struct Engine {
    catalog: Catalog,
    store: Arc<dyn Store>,
    locks: LockTable,
}

impl Engine {
    /// Build an engine over a catalog and an operational store.
    #[must_use]
    pub fn new(catalog: Catalog, store: Arc<dyn Store>) -> Self {
        Self {
            catalog,
            store,
            locks: LockTable::default(),
        }
    }

    /// The entity catalog.
    #[must_use]
    pub const fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// The operational store.
    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    /// Process one change notification for a registered (entity, source)
    /// pair.
    ///
    /// # Errors
    /// Returns `Unknown` for an unregistered pair and surfaces store
    /// errors; per-source propagation failures are reported in the
    /// [`Outcome`], not as errors.
    pub fn process(
        &self,
        entity: &EntityTag,
        source: &SourceTag,
        key: &str,
    ) -> Result<Outcome, Error> {
        let spec = self
            .catalog
            .entity(entity)
            .ok_or_else(|| Error::unknown(format!("entity '{entity}'")))?;
        if spec.source(source).is_none() {
            return Err(Error::unknown(format!(
                "source '{source}' of entity '{entity}'"
            )));
        }
        let fk = ForeignKey::new(entity.clone(), source.clone(), key);
        let operation = self.determine(spec, &fk)?;

        match operation {
            Operation::Create { fk, doc } => self.execute_create(spec, &fk, &doc),
            Operation::Update { ik } => {
                let cell = self.locks.cell(&ik);
                let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
                self.execute_update(spec, &ik)
            }
            Operation::Delete { ik } => {
                let cell = self.locks.cell(&ik);
                let outcome = {
                    let _guard = cell.lock().unwrap_or_else(PoisonError::into_inner);
                    self.execute_delete(spec, &ik)
                }?;
                self.locks.forget(&ik);
                Ok(outcome)
            }
            Operation::Problem { fk, reason } => {
                warn!(key = %fk, reason = %reason, "unactionable notification");
                Ok(Outcome::bare(OperationKind::Problem {
                    key: fk,
                    reason,
                }))
            }
        }
    }

    /// Determine which operation a notification calls for.
    ///
    /// Pure with respect to the store and the sources it reads: nothing
    /// is mutated.
    ///
    /// # Errors
    /// Surfaces store failures; source faults feed the decision table
    /// instead of propagating.
    pub fn determine(&self, spec: &EntitySpec, fk: &ForeignKey) -> Result<Operation, Error> {
        let ik = self.store.lookup_internal_key(fk)?;
        let gateway = Gateway::new(spec, self.store.as_ref());
        let fetched = gateway.get(fk.source(), fk);

        Ok(match (ik, fetched) {
            (None, Err(e)) => Operation::Problem {
                fk: fk.clone(),
                reason: format!("unknown key, no document ({e})"),
            },
            (None, Ok(doc)) => Operation::Create {
                fk: fk.clone(),
                doc,
            },
            (Some(ik), Err(e)) => {
                debug!(key = %fk, error = %e, "document gone from notifying source");
                Operation::Delete { ik }
            }
            (Some(ik), Ok(_)) => Operation::Update { ik },
        })
    }

    // -- Create --

    fn execute_create(
        &self,
        spec: &EntitySpec,
        fk: &ForeignKey,
        doc: &Document,
    ) -> Result<Outcome, Error> {
        let gateway = Gateway::new(spec, self.store.as_ref());
        let ik = self.store.create_internal_key(spec.tag())?;
        self.store.record_foreign_key(&ik, fk)?;
        self.store.record_initial_document(&ik, &doc.content)?;

        // Broadcast to every source; the originating one sees an
        // idempotent write. A flaky source must not block the rest.
        let docs: Vec<Document> = spec
            .sources()
            .iter()
            .map(|s| doc.retag(s.tag().clone()))
            .collect();
        let results = gateway.set_all(&ik, &docs)?;
        let failures = collect_failures(results);
        for failure in &failures {
            warn!(
                record = %ik,
                source = %failure.source,
                error = %failure.error,
                "create propagation failed for source"
            );
        }
        info!(record = %ik, key = %fk, "created record");
        Ok(Outcome {
            operation: OperationKind::Created(ik),
            failures,
            diff_id: None,
            conflicts: 0,
        })
    }

    // -- Delete --

    fn execute_delete(&self, spec: &EntitySpec, ik: &InternalKey) -> Result<Outcome, Error> {
        let gateway = Gateway::new(spec, self.store.as_ref());
        let results = gateway.delete_all(ik)?;
        let failures = collect_failures(results);
        for failure in &failures {
            warn!(
                record = %ik,
                source = %failure.source,
                error = %failure.error,
                "delete propagation failed for source"
            );
        }
        let removed = self.store.delete_internal_key(ik)?;
        info!(record = %ik, rows = removed, "deleted record");
        Ok(Outcome {
            operation: OperationKind::Deleted(ik.clone()),
            failures,
            diff_id: None,
            conflicts: 0,
        })
    }

    // -- Update --

    fn execute_update(&self, spec: &EntitySpec, ik: &InternalKey) -> Result<Outcome, Error> {
        let gateway = Gateway::new(spec, self.store.as_ref());

        // 1. Fetch every copy; keep failures for the outcome.
        let fetched = gateway.get_all(ik)?;
        let mut valid: Vec<(usize, Document)> = Vec::new();
        let mut failures: Vec<SourceFailure> = Vec::new();
        for (index, per) in fetched.into_iter().enumerate() {
            match per.result {
                Ok(doc) => valid.push((index, doc)),
                Err(error) => {
                    warn!(
                        record = %ik,
                        source = %per.source,
                        error = %error,
                        "could not fetch copy for update"
                    );
                    failures.push(SourceFailure {
                        source: per.source,
                        error,
                    });
                }
            }
        }

        // 2. Baseline, or the synthesis fallback for records that predate
        //    baselining.
        let base = match self.store.lookup_initial_document(ik)? {
            Some(base) => base,
            None => {
                warn!(
                    record = %ik,
                    "no baseline recorded; synthesising one from surviving copies"
                );
                synthesise(valid.iter().map(|(_, doc)| &doc.content))
            }
        };

        // 3–4. Diff each copy against the baseline, then merge. Labels
        //      carry the declared source index so fragments keep origin.
        let diffs: Vec<Diff> = valid
            .iter()
            .map(|(index, doc)| diff(&base, &doc.content).with_label(format!("source-{index}")))
            .collect();
        let outcome = merge(&IgnoreConflicts, &diffs);

        // 5–6. Sources whose copy could not be read fall back to the
        //      baseline, then everyone gets the unanimous part applied.
        let outputs: Vec<Document> = spec
            .sources()
            .iter()
            .enumerate()
            .map(|(index, source_spec)| {
                let input = valid
                    .iter()
                    .find(|(i, _)| *i == index)
                    .map_or(&base, |(_, doc)| &doc.content);
                Document::new(
                    spec.tag().clone(),
                    source_spec.tag().clone(),
                    apply(&outcome.merged, input),
                )
            })
            .collect();

        // 7. Write back everywhere; partial failure is reported, not fatal.
        let written = gateway.set_all(ik, &outputs)?;
        for failure in collect_failures(written) {
            warn!(
                record = %ik,
                source = %failure.source,
                error = %failure.error,
                "update propagation failed for source"
            );
            failures.push(failure);
        }

        // 8–9. Record the evidence, then advance the baseline by the
        //      unanimous part only, so conflict fragments stay replayable.
        let diff_id = self
            .store
            .record_diffs(ik, &outcome.merged, &outcome.fragments)?;
        self.store
            .record_initial_document(ik, &apply(&outcome.merged, &base))?;

        if outcome.has_conflicts() {
            info!(
                record = %ik,
                diff = %diff_id,
                fragments = outcome.fragments.len(),
                "updated record with conflicts"
            );
        } else {
            info!(record = %ik, diff = %diff_id, "updated record");
        }
        Ok(Outcome {
            operation: OperationKind::Updated(ik.clone()),
            failures,
            diff_id: Some(diff_id),
            conflicts: outcome.fragments.len(),
        })
    }
}

// ---------------------------------------------------------------------------
// Baseline synthesis
// ---------------------------------------------------------------------------

/// Fold surviving copies into a nominal baseline: the leafwise union,
/// first copy (in declared source order) winning ties.
fn synthesise<'a>(docs: impl Iterator<Item = &'a Value>) -> Value {
    let mut union = std::collections::BTreeMap::new();
    for doc in docs {
        for (path, value) in flatten(doc) {
            union.entry(path).or_insert(value);
        }
    }
    unflatten(&union)
}

// ---------------------------------------------------------------------------
// LockTable
// ---------------------------------------------------------------------------

/// Per-record mutual exclusion. Lock cells are created on demand and
/// dropped when the record is deleted.
#[derive(Default)]
struct LockTable {
    cells: Mutex<HashMap<InternalKey, Arc<Mutex<()>>>>,
}

impl LockTable {
    fn cell(&self, ik: &InternalKey) -> Arc<Mutex<()>> {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(ik.clone())
            .or_default()
            .clone()
    }

    fn forget(&self, ik: &InternalKey) {
        self.cells
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(ik);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
