//! Documents and document paths.
//!
//! A document is an opaque JSON value treated as a labelled tree. Paths
//! are finite sequences of field names; a *leaf* is any value that is not
//! a non-empty object — scalars, arrays (treated opaquely), and the empty
//! object. [`flatten`] projects a document onto its sorted leaf map, which
//! is the representation the diff and merge layers work over.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ident::{EntityTag, SourceTag, Tagged};

// ---------------------------------------------------------------------------
// DocPath
// ---------------------------------------------------------------------------

/// A path into a document: an ordered sequence of field names.
///
/// The empty path addresses the document root. Paths order
/// lexicographically by segment, which puts a parent immediately before
/// its children — the order the apply step relies on.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocPath(Vec<String>);

impl DocPath {
    /// The root path (empty).
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Build a path from segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Return this path extended by one segment.
    #[must_use]
    pub fn child(&self, segment: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(segment.to_owned());
        Self(segments)
    }

    /// The path's segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns `true` if this is the root path.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "$")
        } else {
            f.write_str(&self.0.join("."))
        }
    }
}

impl<S: Into<String>> FromIterator<S> for DocPath {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// An opaque JSON document tagged with the entity and source it belongs to.
///
/// The tags never travel inside `content`; they exist so the gateway can
/// reject a document handed to the wrong adapter.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// The entity this document is a record of.
    pub entity: EntityTag,
    /// The source this copy lives in (or is destined for).
    pub source: SourceTag,
    /// The document body.
    pub content: Value,
}

impl Document {
    /// Create a document from its parts.
    #[must_use]
    pub const fn new(entity: EntityTag, source: SourceTag, content: Value) -> Self {
        Self {
            entity,
            source,
            content,
        }
    }

    /// The same content re-tagged for a different source of the same entity.
    #[must_use]
    pub fn retag(&self, source: SourceTag) -> Self {
        Self {
            entity: self.entity.clone(),
            source,
            content: self.content.clone(),
        }
    }
}

impl Tagged for Document {
    fn entity_tag(&self) -> &EntityTag {
        &self.entity
    }
    fn source_tag(&self) -> Option<&SourceTag> {
        Some(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Leaf flattening
// ---------------------------------------------------------------------------

/// Returns `true` if `value` is a leaf: anything but a non-empty object.
#[must_use]
pub fn is_leaf(value: &Value) -> bool {
    !matches!(value, Value::Object(map) if !map.is_empty())
}

/// Project a document body onto its sorted map of leaf paths → values.
///
/// Non-empty objects are interior nodes; everything else (scalars, arrays,
/// the empty object) is a leaf. An entirely empty document flattens to a
/// single root leaf `{}`.
#[must_use]
pub fn flatten(value: &Value) -> BTreeMap<DocPath, Value> {
    let mut leaves = BTreeMap::new();
    flatten_into(&DocPath::root(), value, &mut leaves);
    leaves
}

fn flatten_into(path: &DocPath, value: &Value, out: &mut BTreeMap<DocPath, Value>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                flatten_into(&path.child(key), child, out);
            }
        }
        leaf => {
            out.insert(path.clone(), leaf.clone());
        }
    }
}

/// Rebuild a document body from a leaf map.
///
/// Inverse of [`flatten`] for maps produced by it. Leaves are written in
/// path order; when paths overlap (one leaf path is a prefix of another),
/// the longer path wins structurally, matching the apply step's
/// intermediate-object creation.
#[must_use]
pub fn unflatten(leaves: &BTreeMap<DocPath, Value>) -> Value {
    let mut doc = Value::Object(Map::new());
    for (path, value) in leaves {
        write_leaf(&mut doc, path.segments(), value);
    }
    doc
}

/// Write `value` at `path`, creating intermediate objects as needed and
/// overwriting non-object intermediates.
pub fn write_leaf(doc: &mut Value, path: &[String], value: &Value) {
    match path {
        [] => *doc = value.clone(),
        [head, rest @ ..] => {
            if !doc.is_object() {
                *doc = Value::Object(Map::new());
            }
            if let Value::Object(map) = doc {
                let child = map.entry(head.clone()).or_insert(Value::Null);
                write_leaf(child, rest, value);
            }
        }
    }
}

/// Remove the leaf at `path`, pruning object parents that become empty.
///
/// Returns `true` if a leaf was removed. Removing a missing path is a
/// no-op. Removing the root resets the document to the empty object.
pub fn remove_leaf(doc: &mut Value, path: &[String]) -> bool {
    match path {
        [] => {
            *doc = Value::Object(Map::new());
            true
        }
        [leaf] => doc
            .as_object_mut()
            .is_some_and(|map| map.remove(leaf.as_str()).is_some()),
        [head, rest @ ..] => {
            let Some(map) = doc.as_object_mut() else {
                return false;
            };
            let Some(child) = map.get_mut(head.as_str()) else {
                return false;
            };
            let removed = remove_leaf(child, rest);
            if removed && child.as_object().is_some_and(Map::is_empty) {
                map.remove(head.as_str());
            }
            removed
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(segments: &[&str]) -> DocPath {
        DocPath::new(segments.iter().copied())
    }

    // -- DocPath --

    #[test]
    fn root_path_is_empty() {
        assert!(DocPath::root().is_root());
        assert_eq!(DocPath::root().segments().len(), 0);
    }

    #[test]
    fn child_extends() {
        let p = DocPath::root().child("a").child("b");
        assert_eq!(p.segments(), &["a".to_owned(), "b".to_owned()]);
    }

    #[test]
    fn path_display_dotted() {
        assert_eq!(format!("{}", path(&["a", "b", "c"])), "a.b.c");
    }

    #[test]
    fn root_path_display() {
        assert_eq!(format!("{}", DocPath::root()), "$");
    }

    #[test]
    fn path_orders_parent_before_child() {
        let parent = path(&["x"]);
        let child = path(&["x", "y"]);
        assert!(parent < child);
    }

    #[test]
    fn path_orders_lexicographically() {
        assert!(path(&["a", "z"]) < path(&["b"]));
        assert!(DocPath::root() < path(&["a"]));
    }

    #[test]
    fn path_serde_is_array() {
        let p = path(&["a", "b"]);
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#"["a","b"]"#);
        let decoded: DocPath = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, p);
    }

    // -- is_leaf --

    #[test]
    fn scalars_are_leaves() {
        assert!(is_leaf(&json!(1)));
        assert!(is_leaf(&json!("s")));
        assert!(is_leaf(&json!(true)));
        assert!(is_leaf(&json!(null)));
    }

    #[test]
    fn arrays_are_leaves() {
        assert!(is_leaf(&json!([1, 2, 3])));
    }

    #[test]
    fn empty_object_is_leaf() {
        assert!(is_leaf(&json!({})));
    }

    #[test]
    fn nonempty_object_is_interior() {
        assert!(!is_leaf(&json!({"a": 1})));
    }

    // -- flatten --

    #[test]
    fn flatten_flat_object() {
        let leaves = flatten(&json!({"b": 2, "a": 1}));
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[&path(&["a"])], json!(1));
        assert_eq!(leaves[&path(&["b"])], json!(2));
    }

    #[test]
    fn flatten_nested() {
        let leaves = flatten(&json!({"a": {"b": {"c": 1}}, "d": "x"}));
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[&path(&["a", "b", "c"])], json!(1));
        assert_eq!(leaves[&path(&["d"])], json!("x"));
    }

    #[test]
    fn flatten_empty_doc_is_root_leaf() {
        let leaves = flatten(&json!({}));
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[&DocPath::root()], json!({}));
    }

    #[test]
    fn flatten_scalar_root() {
        let leaves = flatten(&json!(5));
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[&DocPath::root()], json!(5));
    }

    #[test]
    fn flatten_keeps_arrays_opaque() {
        let leaves = flatten(&json!({"xs": [1, {"y": 2}]}));
        assert_eq!(leaves.len(), 1);
        assert_eq!(leaves[&path(&["xs"])], json!([1, {"y": 2}]));
    }

    #[test]
    fn flatten_iteration_is_sorted() {
        let leaves = flatten(&json!({"b": 1, "a": {"z": 2, "a": 3}}));
        let paths: Vec<String> = leaves.keys().map(ToString::to_string).collect();
        assert_eq!(paths, vec!["a.a", "a.z", "b"]);
    }

    // -- unflatten / write_leaf / remove_leaf --

    #[test]
    fn unflatten_inverts_flatten() {
        let doc = json!({"a": {"b": 1, "c": [1, 2]}, "d": null});
        assert_eq!(unflatten(&flatten(&doc)), doc);
    }

    #[test]
    fn unflatten_empty_map_is_empty_object() {
        assert_eq!(unflatten(&BTreeMap::new()), json!({}));
    }

    #[test]
    fn write_leaf_creates_intermediates() {
        let mut doc = json!({});
        write_leaf(&mut doc, &["a".to_owned(), "b".to_owned()], &json!(1));
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    #[test]
    fn write_leaf_overwrites_scalar_intermediate() {
        let mut doc = json!({"a": 5});
        write_leaf(&mut doc, &["a".to_owned(), "b".to_owned()], &json!(1));
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }

    #[test]
    fn write_leaf_at_root_replaces_doc() {
        let mut doc = json!({"a": 1});
        write_leaf(&mut doc, &[], &json!({"b": 2}));
        assert_eq!(doc, json!({"b": 2}));
    }

    #[test]
    fn remove_leaf_prunes_empty_parents() {
        let mut doc = json!({"a": {"b": {"c": 1}}, "d": 2});
        assert!(remove_leaf(
            &mut doc,
            &["a".to_owned(), "b".to_owned(), "c".to_owned()]
        ));
        assert_eq!(doc, json!({"d": 2}));
    }

    #[test]
    fn remove_leaf_keeps_nonempty_parents() {
        let mut doc = json!({"a": {"b": 1, "c": 2}});
        assert!(remove_leaf(&mut doc, &["a".to_owned(), "b".to_owned()]));
        assert_eq!(doc, json!({"a": {"c": 2}}));
    }

    #[test]
    fn remove_missing_leaf_is_noop() {
        let mut doc = json!({"a": 1});
        assert!(!remove_leaf(&mut doc, &["b".to_owned()]));
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn remove_leaf_through_scalar_is_noop() {
        let mut doc = json!({"a": 1});
        assert!(!remove_leaf(&mut doc, &["a".to_owned(), "b".to_owned()]));
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn remove_root_resets_to_empty_object() {
        let mut doc = json!({"a": 1});
        assert!(remove_leaf(&mut doc, &[]));
        assert_eq!(doc, json!({}));
    }

    // -- Document --

    #[test]
    fn document_retag_keeps_content() {
        let doc = Document::new(
            EntityTag::new("user").unwrap(),
            SourceTag::new("upstream").unwrap(),
            json!({"name": "Hubert"}),
        );
        let other = doc.retag(SourceTag::new("local").unwrap());
        assert_eq!(other.entity, doc.entity);
        assert_eq!(other.source.as_str(), "local");
        assert_eq!(other.content, doc.content);
    }

    #[test]
    fn document_is_tagged() {
        let doc = Document::new(
            EntityTag::new("user").unwrap(),
            SourceTag::new("upstream").unwrap(),
            json!({}),
        );
        assert_eq!(doc.entity_tag().as_str(), "user");
        assert_eq!(doc.source_tag().map(SourceTag::as_str), Some("upstream"));
    }
}
