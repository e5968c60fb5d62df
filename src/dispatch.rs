//! Notification dispatch.
//!
//! A change notification arrives as a raw `(entity, source, key)` string
//! triple. The dispatcher resolves the triple against the catalog and
//! hands the typed pair to the engine. A triple naming an unregistered —
//! or unparsable — entity or source is logged and *ignored*, not failed:
//! the upstream notifier delivers at-least-once and must not see an error
//! for a notification this instance simply does not handle.

use std::fmt;

use tracing::{info, warn};

use crate::engine::{Engine, Outcome};
use crate::error::Error;
use crate::model::ident::{EntityTag, SourceTag};

// ---------------------------------------------------------------------------
// ChangeNotification
// ---------------------------------------------------------------------------

/// A parsed change notification, as the transport delivers it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeNotification {
    /// The entity tag, as a raw string.
    pub entity: String,
    /// The source tag, as a raw string.
    pub source: String,
    /// The source-side record key.
    pub key: String,
}

impl ChangeNotification {
    /// Build a notification from its parts.
    pub fn new(
        entity: impl Into<String>,
        source: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            source: source.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for ChangeNotification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.entity, self.source, self.key)
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// What dispatching a notification did.
#[derive(Debug)]
pub enum Dispatch {
    /// The notification resolved and the engine processed it.
    Handled(Outcome),
    /// The notification named an unregistered entity or source and was
    /// dropped. Success from the notifier's point of view.
    Ignored {
        /// Why the notification was dropped.
        reason: String,
    },
}

impl Dispatch {
    /// Returns `true` if the notification was dropped.
    #[must_use]
    pub const fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored { .. })
    }
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Resolves incoming notifications against the catalog and runs the
/// engine.
pub struct Dispatcher {
    engine: Engine,
}

impl Dispatcher {
    /// Wrap an engine.
    #[must_use]
    pub const fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// The wrapped engine.
    #[must_use]
    pub const fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Dispatch one notification.
    ///
    /// # Errors
    /// Store and adapter-determination failures surface; unknown or
    /// malformed entity/source tags do not — those return
    /// [`Dispatch::Ignored`].
    pub fn dispatch(&self, notification: &ChangeNotification) -> Result<Dispatch, Error> {
        let Ok(entity) = EntityTag::new(&notification.entity) else {
            return Ok(self.ignore(notification, "malformed entity tag"));
        };
        let Ok(source) = SourceTag::new(&notification.source) else {
            return Ok(self.ignore(notification, "malformed source tag"));
        };

        let Some(spec) = self.engine.catalog().entity(&entity) else {
            return Ok(self.ignore(notification, "entity not registered"));
        };
        if spec.source(&source).is_none() {
            return Ok(self.ignore(notification, "source not registered for entity"));
        }

        info!(notification = %notification, "dispatching notification");
        let outcome = self.engine.process(&entity, &source, &notification.key)?;
        Ok(Dispatch::Handled(outcome))
    }

    fn ignore(&self, notification: &ChangeNotification, why: &str) -> Dispatch {
        warn!(notification = %notification, reason = why, "ignoring notification");
        Dispatch::Ignored {
            reason: format!("{why}: {notification}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory::MemoryAdapter;
    use crate::catalog::{Catalog, EntitySpec};
    use crate::engine::OperationKind;
    use crate::store::memory::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn dispatcher() -> (Dispatcher, MemoryAdapter) {
        let a = MemoryAdapter::new();
        let mut catalog = Catalog::new();
        catalog.register(
            EntitySpec::new(EntityTag::new("user").unwrap())
                .with_source(SourceTag::new("upstream").unwrap(), Box::new(a.clone()))
                .with_source(
                    SourceTag::new("local").unwrap(),
                    Box::new(MemoryAdapter::new()),
                ),
        );
        let engine = Engine::new(catalog, Arc::new(MemoryStore::new()));
        (Dispatcher::new(engine), a)
    }

    #[test]
    fn dispatch_registered_triple_is_handled() {
        let (dispatcher, a) = dispatcher();
        a.insert("r1", json!({"name": "Hubert"}));
        let result = dispatcher
            .dispatch(&ChangeNotification::new("user", "upstream", "r1"))
            .unwrap();
        match result {
            Dispatch::Handled(outcome) => {
                assert!(matches!(outcome.operation, OperationKind::Created(_)));
            }
            Dispatch::Ignored { reason } => panic!("unexpectedly ignored: {reason}"),
        }
    }

    #[test]
    fn unknown_entity_is_ignored_not_error() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher
            .dispatch(&ChangeNotification::new("ghost", "upstream", "r1"))
            .unwrap();
        assert!(result.is_ignored());
    }

    #[test]
    fn unknown_source_is_ignored_not_error() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher
            .dispatch(&ChangeNotification::new("user", "ghost", "r1"))
            .unwrap();
        assert!(result.is_ignored());
    }

    #[test]
    fn malformed_tags_are_ignored_not_error() {
        let (dispatcher, _) = dispatcher();
        for (entity, source) in [("USER!", "upstream"), ("user", "up stream"), ("", "local")] {
            let result = dispatcher
                .dispatch(&ChangeNotification::new(entity, source, "r1"))
                .unwrap();
            assert!(result.is_ignored(), "({entity}, {source}) not ignored");
        }
    }

    #[test]
    fn ignored_reason_names_the_triple() {
        let (dispatcher, _) = dispatcher();
        let result = dispatcher
            .dispatch(&ChangeNotification::new("ghost", "upstream", "k"))
            .unwrap();
        let Dispatch::Ignored { reason } = result else {
            panic!("expected Ignored");
        };
        assert!(reason.contains("ghost"));
        assert!(reason.contains("not registered"));
    }

    #[test]
    fn notification_display() {
        let n = ChangeNotification::new("user", "upstream", "42");
        assert_eq!(format!("{n}"), "(user, upstream, 42)");
    }
}
