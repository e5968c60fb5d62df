//! In-memory data-source adapter.
//!
//! Backs a source with a shared `HashMap`. Clones share state, so a test
//! (or an embedding) can keep a handle for seeding and inspection while
//! the catalog owns another. Write faults can be injected for exercising
//! the partial-failure paths.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use crate::model::ident::ForeignKey;

use super::{DataSource, SourceFault};

// ---------------------------------------------------------------------------
// MemoryAdapter
// ---------------------------------------------------------------------------

/// A [`DataSource`] over an in-process map. Cheap to clone; clones share
/// the same underlying records.
#[derive(Clone, Debug, Default)]
pub struct MemoryAdapter {
    state: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<String, Value>,
    next_id: u64,
    fail_writes: bool,
}

impl MemoryAdapter {
    /// Create an empty adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seed a record directly, bypassing the `DataSource` contract.
    pub fn insert(&self, id: impl Into<String>, content: Value) {
        self.lock().records.insert(id.into(), content);
    }

    /// Remove a record directly.
    pub fn remove(&self, id: &str) {
        self.lock().records.remove(id);
    }

    /// The record stored under `id`, if any.
    #[must_use]
    pub fn record(&self, id: &str) -> Option<Value> {
        self.lock().records.get(id).cloned()
    }

    /// Number of records held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    /// Returns `true` if no records are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    /// When set, every subsequent `set` call faults. Used to exercise the
    /// partial-failure paths.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }
}

impl DataSource for MemoryAdapter {
    fn get(&mut self, fk: &ForeignKey) -> Result<Value, SourceFault> {
        self.lock()
            .records
            .get(fk.id())
            .cloned()
            .ok_or_else(|| SourceFault::new(format!("no record under id {:?}", fk.id())))
    }

    fn set(&mut self, content: &Value, fk: Option<&ForeignKey>) -> Result<String, SourceFault> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(SourceFault::new("write fault injected"));
        }
        let id = match fk {
            Some(fk) => fk.id().to_owned(),
            None => {
                state.next_id += 1;
                format!("mem-{}", state.next_id)
            }
        };
        state.records.insert(id.clone(), content.clone());
        Ok(id)
    }

    fn delete(&mut self, fk: &ForeignKey) -> Result<(), SourceFault> {
        // Deleting an absent record is a no-op.
        self.lock().records.remove(fk.id());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
