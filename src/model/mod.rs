//! Core data model: identifiers, documents, diffs, and merge.

pub mod diff;
pub mod document;
pub mod ident;
pub mod merge;
