//! Shared test helpers for concord integration tests.
//!
//! Every scenario uses entity `e` with two memory-adapter sources `a`
//! and `b`; the test keeps adapter handles for seeding and inspection
//! while the catalog owns clones that share the same state. Fixtures can
//! be built over either store backend, so every scenario runs against
//! both.

#![allow(dead_code)]

use std::sync::Arc;

use concord::adapter::memory::MemoryAdapter;
use concord::catalog::{Catalog, EntitySpec};
use concord::dispatch::Dispatcher;
use concord::engine::Engine;
use concord::model::ident::{EntityTag, ForeignKey, InternalKey, SourceTag};
use concord::store::Store;
use concord::store::memory::MemoryStore;
use concord::store::sqlite::SqliteStore;
use serde_json::Value;

pub fn entity(s: &str) -> EntityTag {
    EntityTag::new(s).expect("valid entity tag")
}

pub fn source(s: &str) -> SourceTag {
    SourceTag::new(s).expect("valid source tag")
}

/// Both store backends, labelled for assertion messages.
pub fn each_store() -> Vec<(&'static str, Arc<dyn Store>)> {
    vec![
        ("memory", Arc::new(MemoryStore::new())),
        (
            "sqlite",
            Arc::new(SqliteStore::open_in_memory().expect("in-memory sqlite opens")),
        ),
    ]
}

/// A two-source reconciler over entity `e`.
pub struct Fixture {
    pub dispatcher: Dispatcher,
    pub a: MemoryAdapter,
    pub b: MemoryAdapter,
}

impl Fixture {
    /// Build over a specific store backend.
    pub fn over(store: Arc<dyn Store>) -> Self {
        let a = MemoryAdapter::new();
        let b = MemoryAdapter::new();
        let mut catalog = Catalog::new();
        catalog.register(
            EntitySpec::new(entity("e"))
                .with_source(source("a"), Box::new(a.clone()))
                .with_source(source("b"), Box::new(b.clone())),
        );
        Self {
            dispatcher: Dispatcher::new(Engine::new(catalog, store)),
            a,
            b,
        }
    }

    pub fn engine(&self) -> &Engine {
        self.dispatcher.engine()
    }

    pub fn store(&self) -> &dyn Store {
        self.engine().store()
    }

    /// Register a record with foreign keys `ra`/`rb` and a baseline.
    pub fn seed_record(&self, baseline: &Value) -> InternalKey {
        let store = self.store();
        let ik = store.create_internal_key(&entity("e")).expect("create ik");
        store
            .record_foreign_key(&ik, &ForeignKey::new(entity("e"), source("a"), "ra"))
            .expect("record fk a");
        store
            .record_foreign_key(&ik, &ForeignKey::new(entity("e"), source("b"), "rb"))
            .expect("record fk b");
        store
            .record_initial_document(&ik, baseline)
            .expect("record baseline");
        ik
    }
}
