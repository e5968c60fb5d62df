//! Directory data-source adapter.
//!
//! Stores one record per file, `<root>/<id>.json`. Creates generate a
//! random hex id. Ids are restricted to a filename-safe character set so
//! a malicious source-side id can never escape the root directory.

use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use rand::Rng;
use serde_json::Value;

use crate::model::ident::ForeignKey;

use super::{DataSource, SourceFault};

// ---------------------------------------------------------------------------
// DirectoryAdapter
// ---------------------------------------------------------------------------

/// A [`DataSource`] over a directory of JSON files.
#[derive(Debug)]
pub struct DirectoryAdapter {
    root: PathBuf,
}

impl DirectoryAdapter {
    /// Open an adapter rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    /// Faults if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SourceFault> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| {
            SourceFault::new(format!("could not create {}: {e}", root.display()))
        })?;
        Ok(Self { root })
    }

    /// The directory records are stored in.
    #[must_use]
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    fn record_path(&self, id: &str) -> Result<PathBuf, SourceFault> {
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(SourceFault::new(format!(
                "id {id:?} is not a valid directory record id"
            )));
        }
        Ok(self.root.join(format!("{id}.json")))
    }

    fn fresh_id() -> String {
        let mut rng = rand::rng();
        (0..16)
            .map(|_| {
                let nibble: u8 = rng.random_range(0..16);
                char::from_digit(u32::from(nibble), 16).unwrap_or('0')
            })
            .collect()
    }
}

impl DataSource for DirectoryAdapter {
    fn get(&mut self, fk: &ForeignKey) -> Result<Value, SourceFault> {
        let path = self.record_path(fk.id())?;
        let raw = fs::read_to_string(&path).map_err(|e| {
            SourceFault::new(format!("could not read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            SourceFault::new(format!("{} is not valid JSON: {e}", path.display()))
        })
    }

    fn set(&mut self, content: &Value, fk: Option<&ForeignKey>) -> Result<String, SourceFault> {
        let id = match fk {
            Some(fk) => fk.id().to_owned(),
            None => Self::fresh_id(),
        };
        let path = self.record_path(&id)?;
        let body = serde_json::to_string_pretty(content)
            .map_err(|e| SourceFault::new(format!("could not serialise record: {e}")))?;
        fs::write(&path, body).map_err(|e| {
            SourceFault::new(format!("could not write {}: {e}", path.display()))
        })?;
        Ok(id)
    }

    fn delete(&mut self, fk: &ForeignKey) -> Result<(), SourceFault> {
        let path = self.record_path(fk.id())?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            // Already absent: deletes are idempotent.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SourceFault::new(format!(
                "could not delete {}: {e}",
                path.display()
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ident::{EntityTag, SourceTag};
    use serde_json::json;

    fn fk(id: &str) -> ForeignKey {
        ForeignKey::new(
            EntityTag::new("user").unwrap(),
            SourceTag::new("disk").unwrap(),
            id,
        )
    }

    fn adapter() -> (tempfile::TempDir, DirectoryAdapter) {
        let dir = tempfile::tempdir().unwrap();
        let adapter = DirectoryAdapter::open(dir.path().join("records")).unwrap();
        (dir, adapter)
    }

    #[test]
    fn set_then_get_roundtrips() {
        let (_dir, mut adapter) = adapter();
        let id = adapter.set(&json!({"name": "Hubert"}), None).unwrap();
        let doc = adapter.get(&fk(&id)).unwrap();
        assert_eq!(doc, json!({"name": "Hubert"}));
    }

    #[test]
    fn create_generates_distinct_ids() {
        let (_dir, mut adapter) = adapter();
        let id1 = adapter.set(&json!(1), None).unwrap();
        let id2 = adapter.set(&json!(2), None).unwrap();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 16);
        assert!(id1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn update_overwrites_existing_file() {
        let (_dir, mut adapter) = adapter();
        let id = adapter.set(&json!({"v": 1}), None).unwrap();
        adapter.set(&json!({"v": 2}), Some(&fk(&id))).unwrap();
        assert_eq!(adapter.get(&fk(&id)).unwrap(), json!({"v": 2}));
    }

    #[test]
    fn get_missing_faults() {
        let (_dir, mut adapter) = adapter();
        assert!(adapter.get(&fk("0000000000000000")).is_err());
    }

    #[test]
    fn get_invalid_json_faults() {
        let (_dir, mut adapter) = adapter();
        std::fs::write(adapter.root().join("bad.json"), "not json").unwrap();
        let err = adapter.get(&fk("bad")).unwrap_err();
        assert!(err.message.contains("not valid JSON"));
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, mut adapter) = adapter();
        let id = adapter.set(&json!(1), None).unwrap();
        adapter.delete(&fk(&id)).unwrap();
        adapter.delete(&fk(&id)).unwrap();
        assert!(adapter.get(&fk(&id)).is_err());
    }

    #[test]
    fn path_escaping_ids_rejected() {
        let (_dir, mut adapter) = adapter();
        for bad in ["../evil", "a/b", "", "a.b"] {
            assert!(adapter.get(&fk(bad)).is_err(), "id {bad:?} accepted");
        }
    }
}
