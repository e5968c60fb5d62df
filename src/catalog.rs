//! The entity/source catalog.
//!
//! At startup the host enumerates every entity it reconciles and, per
//! entity, the ordered list of sources the entity lives in, each backed
//! by a data-source adapter. Dispatch resolves incoming notification
//! triples against this catalog; an (entity, source) pair that is not
//! registered is rejected, never guessed at.
//!
//! Source order matters: `get_all`/`set_all` results and baseline
//! synthesis tie-breaking all follow the declared order.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::adapter::DataSource;
use crate::model::ident::{EntityTag, SourceTag, Tagged};

// ---------------------------------------------------------------------------
// SourceSpec
// ---------------------------------------------------------------------------

/// One registered source of an entity: its tag plus the adapter that
/// talks to it.
///
/// The adapter sits behind a mutex so the catalog can be shared across
/// threads while adapters keep `&mut self` methods.
pub struct SourceSpec {
    entity: EntityTag,
    tag: SourceTag,
    adapter: Mutex<Box<dyn DataSource>>,
}

impl SourceSpec {
    /// Register an adapter as source `tag` of `entity`.
    #[must_use]
    pub fn new(entity: EntityTag, tag: SourceTag, adapter: Box<dyn DataSource>) -> Self {
        Self {
            entity,
            tag,
            adapter: Mutex::new(adapter),
        }
    }

    /// The source tag.
    #[must_use]
    pub const fn tag(&self) -> &SourceTag {
        &self.tag
    }

    /// Exclusive access to the adapter.
    pub fn adapter(&self) -> MutexGuard<'_, Box<dyn DataSource>> {
        self.adapter.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Tagged for SourceSpec {
    fn entity_tag(&self) -> &EntityTag {
        &self.entity
    }
    fn source_tag(&self) -> Option<&SourceTag> {
        Some(&self.tag)
    }
}

impl std::fmt::Debug for SourceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceSpec")
            .field("entity", &self.entity)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// EntitySpec
// ---------------------------------------------------------------------------

/// One registered entity: its tag plus the ordered sources it lives in.
#[derive(Debug)]
pub struct EntitySpec {
    tag: EntityTag,
    sources: Vec<SourceSpec>,
}

impl EntitySpec {
    /// Create an entity with no sources yet.
    #[must_use]
    pub const fn new(tag: EntityTag) -> Self {
        Self {
            tag,
            sources: Vec::new(),
        }
    }

    /// Append a source backed by `adapter`. Order of registration is the
    /// entity's declared source order.
    #[must_use]
    pub fn with_source(mut self, tag: SourceTag, adapter: Box<dyn DataSource>) -> Self {
        self.sources
            .push(SourceSpec::new(self.tag.clone(), tag, adapter));
        self
    }

    /// The entity tag.
    #[must_use]
    pub const fn tag(&self) -> &EntityTag {
        &self.tag
    }

    /// The sources in declared order.
    #[must_use]
    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    /// Find a source by tag.
    #[must_use]
    pub fn source(&self, tag: &SourceTag) -> Option<&SourceSpec> {
        self.sources.iter().find(|s| s.tag() == tag)
    }
}

impl Tagged for EntitySpec {
    fn entity_tag(&self) -> &EntityTag {
        &self.tag
    }
    fn source_tag(&self) -> Option<&SourceTag> {
        None
    }
}

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Every entity the reconciler knows about, keyed by tag.
#[derive(Debug, Default)]
pub struct Catalog {
    entities: BTreeMap<EntityTag, EntitySpec>,
}

impl Catalog {
    /// An empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity. Replaces any previous registration of the
    /// same tag.
    pub fn register(&mut self, spec: EntitySpec) {
        self.entities.insert(spec.tag().clone(), spec);
    }

    /// Find an entity by tag.
    #[must_use]
    pub fn entity(&self, tag: &EntityTag) -> Option<&EntitySpec> {
        self.entities.get(tag)
    }

    /// Iterate over registered entities in tag order.
    pub fn entities(&self) -> impl Iterator<Item = &EntitySpec> {
        self.entities.values()
    }

    /// Number of registered entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` if no entities are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryAdapter;
    use crate::model::ident::compatible;

    fn entity(s: &str) -> EntityTag {
        EntityTag::new(s).unwrap()
    }

    fn source(s: &str) -> SourceTag {
        SourceTag::new(s).unwrap()
    }

    fn user_spec() -> EntitySpec {
        EntitySpec::new(entity("user"))
            .with_source(source("upstream"), Box::new(MemoryAdapter::new()))
            .with_source(source("local"), Box::new(MemoryAdapter::new()))
    }

    #[test]
    fn sources_keep_declared_order() {
        let spec = user_spec();
        let tags: Vec<&str> = spec.sources().iter().map(|s| s.tag().as_str()).collect();
        assert_eq!(tags, vec!["upstream", "local"]);
    }

    #[test]
    fn source_lookup_by_tag() {
        let spec = user_spec();
        assert!(spec.source(&source("local")).is_some());
        assert!(spec.source(&source("ghost")).is_none());
    }

    #[test]
    fn source_spec_is_tagged() {
        let spec = user_spec();
        let upstream = spec.source(&source("upstream")).unwrap();
        assert_eq!(upstream.entity_tag().as_str(), "user");
        let fk = crate::model::ident::ForeignKey::new(entity("user"), source("upstream"), "x");
        assert!(compatible(upstream, &fk));
        let wrong = crate::model::ident::ForeignKey::new(entity("user"), source("local"), "x");
        assert!(!compatible(upstream, &wrong));
    }

    #[test]
    fn catalog_register_and_lookup() {
        let mut catalog = Catalog::new();
        assert!(catalog.is_empty());
        catalog.register(user_spec());
        assert_eq!(catalog.len(), 1);
        assert!(catalog.entity(&entity("user")).is_some());
        assert!(catalog.entity(&entity("order")).is_none());
    }

    #[test]
    fn register_replaces_existing_entity() {
        let mut catalog = Catalog::new();
        catalog.register(user_spec());
        catalog.register(EntitySpec::new(entity("user")));
        assert_eq!(catalog.len(), 1);
        assert!(
            catalog
                .entity(&entity("user"))
                .unwrap()
                .sources()
                .is_empty()
        );
    }

    #[test]
    fn adapter_is_reachable_through_spec() {
        let spec = user_spec();
        let upstream = spec.source(&source("upstream")).unwrap();
        let fk = crate::model::ident::ForeignKey::new(entity("user"), source("upstream"), "x");
        assert!(upstream.adapter().get(&fk).is_err());
    }
}
