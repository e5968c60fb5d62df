//! The data-source gateway.
//!
//! One uniform `get`/`set`/`delete` surface over every registered
//! (entity, source) pair, plus the all-sources sweeps the engine drives
//! reconciliation through. The gateway is where two guarantees live:
//!
//! - **Tag discipline**: a call whose document or key tags disagree with
//!   the addressed source is rejected with `Incompatible` before the
//!   adapter runs.
//! - **Fault normalisation**: adapter-level faults are wrapped into
//!   [`Error::Source`], so the engine never observes an adapter's own
//!   error type.
//!
//! Partial success in the sweep operations is reported per source, never
//! silently swallowed.

use crate::catalog::{EntitySpec, SourceSpec};
use crate::error::Error;
use crate::model::document::Document;
use crate::model::ident::{ForeignKey, InternalKey, SourceTag, compatible};
use crate::store::Store;

// ---------------------------------------------------------------------------
// PerSource
// ---------------------------------------------------------------------------

/// The result of one source's part in a sweep operation.
#[derive(Debug)]
pub struct PerSource<T> {
    /// The source this result belongs to.
    pub source: SourceTag,
    /// What happened there.
    pub result: Result<T, Error>,
}

impl<T> PerSource<T> {
    /// Returns `true` if this source's part failed.
    #[must_use]
    pub const fn is_err(&self) -> bool {
        self.result.is_err()
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// A view of one entity's sources, with foreign keys translated through
/// the operational store.
pub struct Gateway<'a> {
    entity: &'a EntitySpec,
    store: &'a dyn Store,
}

impl<'a> Gateway<'a> {
    /// Build a gateway over `entity`, translating keys via `store`.
    #[must_use]
    pub const fn new(entity: &'a EntitySpec, store: &'a dyn Store) -> Self {
        Self { entity, store }
    }

    fn source_spec(&self, source: &SourceTag) -> Result<&'a SourceSpec, Error> {
        self.entity.source(source).ok_or_else(|| {
            Error::unknown(format!(
                "source '{source}' of entity '{}'",
                self.entity.tag()
            ))
        })
    }

    // -- single-source operations --

    /// Fetch the document under `fk` from `source`.
    ///
    /// # Errors
    /// `Incompatible` on tag mismatch, `Source` on adapter fault.
    pub fn get(&self, source: &SourceTag, fk: &ForeignKey) -> Result<Document, Error> {
        let spec = self.source_spec(source)?;
        if !compatible(spec, fk) {
            return Err(Error::incompatible(format!(
                "key {fk} handed to source {}/{}",
                self.entity.tag(),
                source
            )));
        }
        let content = spec.adapter().get(fk)?;
        Ok(Document::new(
            self.entity.tag().clone(),
            source.clone(),
            content,
        ))
    }

    /// Write `doc` to `source`. With `fk` absent the source creates the
    /// record; the returned key is the definitive one to record.
    ///
    /// # Errors
    /// `Incompatible` on tag mismatch, `Source` on adapter fault.
    pub fn set(
        &self,
        source: &SourceTag,
        doc: &Document,
        fk: Option<&ForeignKey>,
    ) -> Result<ForeignKey, Error> {
        let spec = self.source_spec(source)?;
        if !compatible(spec, doc) {
            return Err(Error::incompatible(format!(
                "document tagged {}/{} handed to source {}/{}",
                doc.entity,
                doc.source,
                self.entity.tag(),
                source
            )));
        }
        if let Some(fk) = fk
            && !compatible(spec, fk)
        {
            return Err(Error::incompatible(format!(
                "key {fk} handed to source {}/{}",
                self.entity.tag(),
                source
            )));
        }
        let id = spec.adapter().set(&doc.content, fk)?;
        Ok(ForeignKey::new(
            self.entity.tag().clone(),
            source.clone(),
            id,
        ))
    }

    /// Delete the record under `fk` from `source`.
    ///
    /// # Errors
    /// `Incompatible` on tag mismatch, `Source` on adapter fault.
    pub fn delete(&self, source: &SourceTag, fk: &ForeignKey) -> Result<(), Error> {
        let spec = self.source_spec(source)?;
        if !compatible(spec, fk) {
            return Err(Error::incompatible(format!(
                "key {fk} handed to source {}/{}",
                self.entity.tag(),
                source
            )));
        }
        spec.adapter().delete(fk)?;
        Ok(())
    }

    // -- sweep operations --

    /// Fetch the record from every source of the entity, in declared
    /// source order. A source without a recorded foreign key yields an
    /// `Unknown` slot; adapter faults yield `Source` slots.
    ///
    /// # Errors
    /// Only store failures abort the sweep.
    pub fn get_all(&self, ik: &InternalKey) -> Result<Vec<PerSource<Document>>, Error> {
        let mut results = Vec::with_capacity(self.entity.sources().len());
        for spec in self.entity.sources() {
            let source = spec.tag().clone();
            let result = match self.store.lookup_foreign_key(ik, &source)? {
                Some(fk) => self.get(&source, &fk),
                None => Err(Error::unknown(format!(
                    "no foreign key for {ik} in source '{source}'"
                ))),
            };
            results.push(PerSource { source, result });
        }
        Ok(results)
    }

    /// Write one document to each source, pairing `docs` with the
    /// entity's sources in declared order. Sources without a recorded
    /// foreign key get a create; newly returned keys are recorded in the
    /// store. Per-source failures are reported in the result list.
    ///
    /// # Errors
    /// Store failures and a docs/sources length mismatch abort the sweep.
    pub fn set_all(
        &self,
        ik: &InternalKey,
        docs: &[Document],
    ) -> Result<Vec<PerSource<ForeignKey>>, Error> {
        let sources = self.entity.sources();
        if docs.len() != sources.len() {
            return Err(Error::internal(format!(
                "set_all for {ik}: {} documents for {} sources",
                docs.len(),
                sources.len()
            )));
        }
        let mut results = Vec::with_capacity(sources.len());
        for (spec, doc) in sources.iter().zip(docs) {
            let source = spec.tag().clone();
            let known = self.store.lookup_foreign_key(ik, &source)?;
            let result = match self.set(&source, doc, known.as_ref()) {
                Ok(fk) => {
                    if known.is_none() {
                        self.store.record_foreign_key(ik, &fk)?;
                    }
                    Ok(fk)
                }
                Err(e) => Err(e),
            };
            results.push(PerSource { source, result });
        }
        Ok(results)
    }

    /// Delete the record from every source that has a recorded foreign
    /// key; sources without a mapping are skipped as successes.
    ///
    /// # Errors
    /// Only store failures abort the sweep.
    pub fn delete_all(&self, ik: &InternalKey) -> Result<Vec<PerSource<()>>, Error> {
        let mut results = Vec::with_capacity(self.entity.sources().len());
        for spec in self.entity.sources() {
            let source = spec.tag().clone();
            let result = match self.store.lookup_foreign_key(ik, &source)? {
                Some(fk) => self.delete(&source, &fk),
                None => Ok(()),
            };
            results.push(PerSource { source, result });
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
