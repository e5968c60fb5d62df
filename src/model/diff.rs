//! Structured diffs: ordered lists of path-keyed operations.
//!
//! [`diff`] computes the operations that transform one document body into
//! another by walking both leaf maps in lock-step over sorted paths.
//! [`apply`] executes a diff left-to-right and is total: inserting creates
//! intermediate objects, deleting a missing path is a no-op.
//!
//! Op order is by lexicographic path and is part of the contract — both
//! apply and merge depend on it for determinism.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{DocPath, flatten, remove_leaf, write_leaf};

// ---------------------------------------------------------------------------
// DiffOp
// ---------------------------------------------------------------------------

/// A single diff operation on one leaf path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DiffOp {
    /// Add or overwrite the leaf at `path`.
    Insert {
        /// The leaf path to write.
        path: DocPath,
        /// The value to write.
        value: Value,
    },
    /// Remove the leaf at `path`. Removing a missing leaf is a no-op.
    Delete {
        /// The leaf path to remove.
        path: DocPath,
    },
}

impl DiffOp {
    /// The path this op touches.
    #[must_use]
    pub const fn path(&self) -> &DocPath {
        match self {
            Self::Insert { path, .. } | Self::Delete { path } => path,
        }
    }
}

impl fmt::Display for DiffOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Insert { path, value } => write!(f, "+{path} = {value}"),
            Self::Delete { path } => write!(f, "-{path}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// An ordered list of [`DiffOp`]s, optionally labelled.
///
/// Labels identify the originating source when a merge splits conflicting
/// ops into fragments; the merged diff itself carries no label.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// Origin label, set on conflict fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Operations sorted by path.
    pub ops: Vec<DiffOp>,
}

impl Diff {
    /// Create a diff, sorting ops by path.
    #[must_use]
    pub fn new(mut ops: Vec<DiffOp>) -> Self {
        ops.sort_by(|a, b| a.path().cmp(b.path()));
        Self { label: None, ops }
    }

    /// Attach an origin label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Returns `true` if the diff has no operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

impl fmt::Display for Diff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(label) = &self.label {
            write!(f, "[{label}] ")?;
        }
        let mut first = true;
        for op in &self.ops {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{op}")?;
            first = false;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// diff
// ---------------------------------------------------------------------------

/// Compute the operations that transform `base` into `target`.
///
/// Both bodies are projected onto their leaf maps and walked in lock-step
/// over the sorted union of paths: absent→present yields an Insert,
/// present→absent a Delete, a changed value an overwriting Insert, and an
/// unchanged value nothing.
#[must_use]
pub fn diff(base: &Value, target: &Value) -> Diff {
    let before = flatten(base);
    let after = flatten(target);
    let paths: BTreeSet<&DocPath> = before.keys().chain(after.keys()).collect();

    let mut ops = Vec::new();
    for path in paths {
        match (before.get(path), after.get(path)) {
            (None, Some(value)) => ops.push(DiffOp::Insert {
                path: path.clone(),
                value: value.clone(),
            }),
            (Some(_), None) => ops.push(DiffOp::Delete { path: path.clone() }),
            (Some(old), Some(new)) if old != new => ops.push(DiffOp::Insert {
                path: path.clone(),
                value: new.clone(),
            }),
            _ => {}
        }
    }
    // Already path-sorted: the union set iterates in order.
    Diff { label: None, ops }
}

// ---------------------------------------------------------------------------
// apply
// ---------------------------------------------------------------------------

/// Apply a diff to a document body, returning the transformed body.
///
/// Ops execute left-to-right. Total: no input document or diff can make
/// it fail. Deletes prune object parents that become empty, so
/// `apply(diff(a, b), a) == b` for every pair of bodies.
#[must_use]
pub fn apply(diff: &Diff, doc: &Value) -> Value {
    let mut out = doc.clone();
    for op in &diff.ops {
        match op {
            DiffOp::Insert { path, value } => write_leaf(&mut out, path.segments(), value),
            DiffOp::Delete { path } => {
                remove_leaf(&mut out, path.segments());
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
