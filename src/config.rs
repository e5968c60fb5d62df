//! Reconciler configuration (`concord.toml`).
//!
//! Declares the operational-store backend and the entity → sources
//! catalog, including per-source adapter settings. Missing file → all
//! defaults (no error); unknown fields and malformed values are rejected
//! with line-level detail.
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "concord.db"
//!
//! [[entity]]
//! name = "user"
//!
//! [[entity.source]]
//! name = "upstream"
//! kind = "directory"
//! root = "/srv/upstream/users"
//!
//! [[entity.source]]
//! name = "local"
//! kind = "command"
//! get = "usertool show ${fk}"
//! create = "usertool add"
//! set = "usertool replace ${fk}"
//! delete = "usertool remove ${fk}"
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::adapter::DataSource;
use crate::adapter::command::{CommandAdapter, CommandTemplates};
use crate::adapter::directory::DirectoryAdapter;
use crate::adapter::memory::MemoryAdapter;
use crate::catalog::{Catalog, EntitySpec};
use crate::model::ident::{EntityTag, SourceTag};
use crate::store::Store;
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level reconciler configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConcordConfig {
    /// Operational-store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// The entity catalog.
    #[serde(default, rename = "entity")]
    pub entities: Vec<EntityConfig>,
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Operational-store backend selection.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Which backend to use.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Database path for the sqlite backend (default: `concord.db`).
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("concord.db")
}

/// The operational-store backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    /// SQLite database on disk.
    #[default]
    Sqlite,
    /// Process-local memory; state is lost on exit.
    Memory,
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite => write!(f, "sqlite"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

// ---------------------------------------------------------------------------
// EntityConfig / SourceConfig
// ---------------------------------------------------------------------------

/// One entity and the ordered sources it lives in.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntityConfig {
    /// The entity tag.
    pub name: String,

    /// The sources, in declared order.
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceConfig>,
}

/// One source of an entity.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SourceConfig {
    /// The source tag.
    pub name: String,

    /// Which adapter backs this source, plus its settings.
    #[serde(flatten)]
    pub adapter: AdapterConfig,
}

/// Adapter selection and settings.
///
/// Flattened into [`SourceConfig`], so `deny_unknown_fields` cannot apply
/// here; unknown adapter settings are ignored.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AdapterConfig {
    /// In-process map. Useful for trials; state is lost on exit.
    Memory,

    /// One JSON file per record under `root`.
    Directory {
        /// The directory records live in.
        root: PathBuf,
    },

    /// External tool with `${fk}` argument holes.
    Command {
        /// Fetch template; document JSON on stdout.
        get: String,
        /// Create template; document JSON on stdin, new id on stdout.
        create: String,
        /// Update template; document JSON on stdin.
        set: String,
        /// Delete template.
        delete: String,
    },
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading or applying a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConcordConfig {
    /// Load configuration from a TOML file.
    ///
    /// - If the file does not exist, returns all defaults (not an error).
    /// - If the file exists but contains invalid TOML or unknown fields,
    ///   returns a [`ConfigError`] with line-level detail.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or
    /// parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }

    /// Open the configured operational store.
    ///
    /// # Errors
    /// Returns `ConfigError` if the backend cannot be opened.
    pub fn open_store(&self) -> Result<Arc<dyn Store>, ConfigError> {
        match self.store.backend {
            StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
            StoreBackend::Sqlite => {
                let store = SqliteStore::open(&self.store.path).map_err(|e| ConfigError {
                    path: Some(self.store.path.clone()),
                    message: format!("could not open store: {e}"),
                })?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Build the entity catalog, constructing one adapter per declared
    /// source.
    ///
    /// # Errors
    /// Returns `ConfigError` on an invalid tag, a duplicate declaration,
    /// or an adapter that fails to initialise.
    pub fn build_catalog(&self) -> Result<Catalog, ConfigError> {
        let mut catalog = Catalog::new();
        for entity_cfg in &self.entities {
            let entity = EntityTag::new(&entity_cfg.name).map_err(|e| ConfigError {
                path: None,
                message: e.to_string(),
            })?;
            if catalog.entity(&entity).is_some() {
                return Err(ConfigError {
                    path: None,
                    message: format!("entity '{entity}' is declared twice"),
                });
            }
            let mut spec = EntitySpec::new(entity.clone());
            for source_cfg in &entity_cfg.sources {
                let source = SourceTag::new(&source_cfg.name).map_err(|e| ConfigError {
                    path: None,
                    message: e.to_string(),
                })?;
                if spec.source(&source).is_some() {
                    return Err(ConfigError {
                        path: None,
                        message: format!(
                            "source '{source}' of entity '{entity}' is declared twice"
                        ),
                    });
                }
                let adapter = build_adapter(&source_cfg.adapter).map_err(|message| {
                    ConfigError {
                        path: None,
                        message: format!("source '{source}' of entity '{entity}': {message}"),
                    }
                })?;
                spec = spec.with_source(source, adapter);
            }
            catalog.register(spec);
        }
        Ok(catalog)
    }
}

fn build_adapter(config: &AdapterConfig) -> Result<Box<dyn DataSource>, String> {
    match config {
        AdapterConfig::Memory => Ok(Box::new(MemoryAdapter::new())),
        AdapterConfig::Directory { root } => {
            let adapter = DirectoryAdapter::open(root).map_err(|e| e.to_string())?;
            Ok(Box::new(adapter))
        }
        AdapterConfig::Command {
            get,
            create,
            set,
            delete,
        } => Ok(Box::new(CommandAdapter::new(CommandTemplates {
            get: get.clone(),
            create: create.clone(),
            set: set.clone(),
            delete: delete.clone(),
        }))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
