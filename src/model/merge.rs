//! N-way diff merge with conflict fragmentation.
//!
//! [`merge`] folds any number of diffs into one *merged* diff (the
//! unanimous part) and a list of *conflict fragments* (the parts the
//! policy rejected). Ops are grouped by path; a path every contributing
//! source agrees on produces one op in the merged diff, a disagreement is
//! put to the [`MergePolicy`]. Fragments are stored verbatim, one per
//! originating source, so conflict storage preserves origin and a human
//! can resolve them later.

use std::collections::BTreeMap;

use super::diff::{Diff, DiffOp};
use super::document::DocPath;

// ---------------------------------------------------------------------------
// MergePolicy
// ---------------------------------------------------------------------------

/// One source's candidate op at a contested path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    /// Index of the contributing diff in the merge input.
    pub source: usize,
    /// The op that source proposed.
    pub op: DiffOp,
}

/// A policy's verdict on a set of disagreeing ops at one path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    /// Include this op in the merged diff; the rest go to fragments.
    Take(DiffOp),
    /// Reject every candidate into fragments; the merged diff is empty at
    /// this path.
    Reject,
}

/// Decides what happens when sources disagree at a path.
///
/// The policy is only consulted on disagreement — unanimous ops are
/// included once without a policy round-trip.
pub trait MergePolicy {
    /// Stable policy name, recorded for diagnostics.
    fn name(&self) -> &'static str;

    /// Resolve a set of disagreeing candidate ops at `path`.
    ///
    /// `candidates` contains at least two ops, not all equal.
    fn resolve(&self, path: &DocPath, candidates: &[Candidate]) -> Resolution;
}

/// The required built-in policy: on conflict, reject *all* candidate ops
/// into the fragment list.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IgnoreConflicts;

impl MergePolicy for IgnoreConflicts {
    fn name(&self) -> &'static str {
        "ignore-conflicts"
    }

    fn resolve(&self, _path: &DocPath, _candidates: &[Candidate]) -> Resolution {
        Resolution::Reject
    }
}

// ---------------------------------------------------------------------------
// merge
// ---------------------------------------------------------------------------

/// The result of merging diffs: the unanimous part plus rejected fragments.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The agreed-upon diff, ops sorted by path.
    pub merged: Diff,
    /// One fragment per source that contributed rejected ops, in source
    /// order, each labelled with its origin.
    pub fragments: Vec<Diff>,
}

impl MergeOutcome {
    /// Returns `true` if the merge produced conflict fragments.
    #[must_use]
    pub fn has_conflicts(&self) -> bool {
        !self.fragments.is_empty()
    }
}

/// Merge diffs under a policy.
///
/// Stable: merging a single diff returns its ops unchanged with no
/// fragments, and identical inputs merge to the input. The merged diff
/// never carries a label, whatever the inputs were labelled.
#[must_use]
pub fn merge(policy: &dyn MergePolicy, diffs: &[Diff]) -> MergeOutcome {
    if let [only] = diffs {
        return MergeOutcome {
            merged: Diff {
                label: None,
                ops: only.ops.clone(),
            },
            fragments: Vec::new(),
        };
    }

    // Group candidate ops by path, preserving source order within a path.
    let mut by_path: BTreeMap<&DocPath, Vec<Candidate>> = BTreeMap::new();
    for (source, diff) in diffs.iter().enumerate() {
        for op in &diff.ops {
            by_path.entry(op.path()).or_default().push(Candidate {
                source,
                op: op.clone(),
            });
        }
    }

    let mut merged_ops = Vec::new();
    let mut rejected: BTreeMap<usize, Vec<DiffOp>> = BTreeMap::new();

    for (path, candidates) in &by_path {
        let unanimous = candidates
            .iter()
            .all(|c| c.op == candidates[0].op);
        if unanimous {
            merged_ops.push(candidates[0].op.clone());
            continue;
        }
        match policy.resolve(path, candidates) {
            Resolution::Take(op) => {
                for candidate in candidates {
                    if candidate.op != op {
                        rejected
                            .entry(candidate.source)
                            .or_default()
                            .push(candidate.op.clone());
                    }
                }
                merged_ops.push(op);
            }
            Resolution::Reject => {
                for candidate in candidates {
                    rejected
                        .entry(candidate.source)
                        .or_default()
                        .push(candidate.op.clone());
                }
            }
        }
    }

    let fragments = rejected
        .into_iter()
        .map(|(source, ops)| {
            let label = diffs[source]
                .label
                .clone()
                .unwrap_or_else(|| format!("source-{source}"));
            Diff::new(ops).with_label(label)
        })
        .collect();

    MergeOutcome {
        merged: Diff::new(merged_ops),
        fragments,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::diff::diff;
    use serde_json::json;

    fn path(segments: &[&str]) -> DocPath {
        DocPath::new(segments.iter().copied())
    }

    fn insert(p: &[&str], v: serde_json::Value) -> DiffOp {
        DiffOp::Insert {
            path: path(p),
            value: v,
        }
    }

    fn delete(p: &[&str]) -> DiffOp {
        DiffOp::Delete { path: path(p) }
    }

    // -- laws --

    #[test]
    fn law_single_diff_merges_to_itself() {
        let d = Diff::new(vec![insert(&["a"], json!(1)), delete(&["b"])]).with_label("x");
        let outcome = merge(&IgnoreConflicts, std::slice::from_ref(&d));
        assert_eq!(outcome.merged.ops, d.ops);
        assert!(
            outcome.merged.label.is_none(),
            "the merged diff never carries a label"
        );
        assert!(outcome.fragments.is_empty());
    }

    #[test]
    fn law_identical_inputs_merge_to_input() {
        let d = Diff::new(vec![insert(&["a"], json!(1))]);
        let outcome = merge(&IgnoreConflicts, &[d.clone(), d.clone(), d.clone()]);
        assert_eq!(outcome.merged.ops, d.ops);
        assert!(outcome.fragments.is_empty());
    }

    #[test]
    fn law_empty_input_merges_empty() {
        let outcome = merge(&IgnoreConflicts, &[]);
        assert!(outcome.merged.is_empty());
        assert!(outcome.fragments.is_empty());
    }

    // -- agreement --

    #[test]
    fn disjoint_paths_all_merge() {
        let a = Diff::new(vec![insert(&["name"], json!("x"))]);
        let b = Diff::new(vec![insert(&["address"], json!("y"))]);
        let outcome = merge(&IgnoreConflicts, &[a, b]);
        assert_eq!(outcome.merged.len(), 2);
        assert!(!outcome.has_conflicts());
    }

    #[test]
    fn one_sided_change_is_not_a_conflict() {
        let a = Diff::new(vec![insert(&["address"], json!("123 Pony"))]);
        let b = Diff::new(vec![]);
        let outcome = merge(&IgnoreConflicts, &[a, b]);
        assert_eq!(
            outcome.merged.ops,
            vec![insert(&["address"], json!("123 Pony"))]
        );
        assert!(!outcome.has_conflicts());
    }

    #[test]
    fn agreeing_ops_included_once() {
        let a = Diff::new(vec![insert(&["name"], json!("z"))]);
        let b = Diff::new(vec![insert(&["name"], json!("z"))]);
        let outcome = merge(&IgnoreConflicts, &[a, b]);
        assert_eq!(outcome.merged.len(), 1);
        assert!(!outcome.has_conflicts());
    }

    // -- conflicts under IgnoreConflicts --

    #[test]
    fn conflicting_inserts_reject_both() {
        let a = Diff::new(vec![insert(&["name"], json!("X"))]);
        let b = Diff::new(vec![insert(&["name"], json!("Y"))]);
        let outcome = merge(&IgnoreConflicts, &[a, b]);
        assert!(outcome.merged.is_empty());
        assert_eq!(outcome.fragments.len(), 2);
        assert_eq!(outcome.fragments[0].label.as_deref(), Some("source-0"));
        assert_eq!(outcome.fragments[1].label.as_deref(), Some("source-1"));
        assert_eq!(outcome.fragments[0].ops, vec![insert(&["name"], json!("X"))]);
        assert_eq!(outcome.fragments[1].ops, vec![insert(&["name"], json!("Y"))]);
    }

    #[test]
    fn insert_vs_delete_is_a_conflict() {
        let a = Diff::new(vec![insert(&["name"], json!("X"))]);
        let b = Diff::new(vec![delete(&["name"])]);
        let outcome = merge(&IgnoreConflicts, &[a, b]);
        assert!(outcome.merged.is_empty());
        assert_eq!(outcome.fragments.len(), 2);
    }

    #[test]
    fn conflict_on_one_path_does_not_poison_others() {
        let a = Diff::new(vec![insert(&["name"], json!("X")), insert(&["age"], json!(1))]);
        let b = Diff::new(vec![insert(&["name"], json!("Y")), insert(&["age"], json!(1))]);
        let outcome = merge(&IgnoreConflicts, &[a, b]);
        assert_eq!(outcome.merged.ops, vec![insert(&["age"], json!(1))]);
        assert_eq!(outcome.fragments.len(), 2);
        assert_eq!(outcome.fragments[0].ops, vec![insert(&["name"], json!("X"))]);
    }

    #[test]
    fn fragments_keep_existing_labels() {
        let a = Diff::new(vec![insert(&["n"], json!(1))]).with_label("upstream");
        let b = Diff::new(vec![insert(&["n"], json!(2))]).with_label("local");
        let outcome = merge(&IgnoreConflicts, &[a, b]);
        assert_eq!(outcome.fragments[0].label.as_deref(), Some("upstream"));
        assert_eq!(outcome.fragments[1].label.as_deref(), Some("local"));
    }

    #[test]
    fn three_way_partial_agreement_still_conflicts() {
        // Two sources agree, a third disagrees: not unanimous, so under
        // ignore-conflicts every candidate is rejected.
        let a = Diff::new(vec![insert(&["n"], json!(1))]);
        let b = Diff::new(vec![insert(&["n"], json!(1))]);
        let c = Diff::new(vec![insert(&["n"], json!(2))]);
        let outcome = merge(&IgnoreConflicts, &[a, b, c]);
        assert!(outcome.merged.is_empty());
        assert_eq!(outcome.fragments.len(), 3);
    }

    #[test]
    fn merged_ops_sorted_by_path() {
        let a = Diff::new(vec![insert(&["z"], json!(1))]);
        let b = Diff::new(vec![insert(&["a"], json!(2))]);
        let outcome = merge(&IgnoreConflicts, &[a, b]);
        let paths: Vec<String> = outcome
            .merged
            .ops
            .iter()
            .map(|op| op.path().to_string())
            .collect();
        assert_eq!(paths, vec!["a", "z"]);
    }

    // -- a Take policy exercises the non-reject arm --

    struct FirstWins;

    impl MergePolicy for FirstWins {
        fn name(&self) -> &'static str {
            "first-wins"
        }
        fn resolve(&self, _path: &DocPath, candidates: &[Candidate]) -> Resolution {
            Resolution::Take(candidates[0].op.clone())
        }
    }

    #[test]
    fn take_policy_keeps_winner_and_fragments_losers() {
        let a = Diff::new(vec![insert(&["n"], json!("first"))]);
        let b = Diff::new(vec![insert(&["n"], json!("second"))]);
        let outcome = merge(&FirstWins, &[a, b]);
        assert_eq!(outcome.merged.ops, vec![insert(&["n"], json!("first"))]);
        assert_eq!(outcome.fragments.len(), 1);
        assert_eq!(outcome.fragments[0].label.as_deref(), Some("source-1"));
    }

    // -- applying the unanimous part never loses agreed data --

    #[test]
    fn merged_part_applies_to_each_source_document() {
        use crate::model::diff::apply;

        let base = json!({});
        let doc_a = json!({"name": "X", "address": "123 Pony"});
        let doc_b = json!({"name": "Y", "address": "123 Pony"});
        let diffs = vec![diff(&base, &doc_a), diff(&base, &doc_b)];
        let outcome = merge(&IgnoreConflicts, &diffs);

        // The agreed part (address) lands in both; the contested part
        // (name) is left as each source had it.
        assert_eq!(
            apply(&outcome.merged, &doc_a),
            json!({"name": "X", "address": "123 Pony"})
        );
        assert_eq!(
            apply(&outcome.merged, &doc_b),
            json!({"name": "Y", "address": "123 Pony"})
        );
    }

    #[test]
    fn policy_name() {
        assert_eq!(IgnoreConflicts.name(), "ignore-conflicts");
    }
}
