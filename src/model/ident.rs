//! Identifier model: entity/source tags, internal keys, foreign keys.
//!
//! Every value that flows through the reconciliation pipeline is tagged
//! with the entity (record kind) it belongs to and, where relevant, the
//! source (external location) it came from. Tag agreement is checked at
//! the gateway boundary via [`compatible`]; a mismatch is an error, never
//! a silent cross-wiring of records.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EntityTag
// ---------------------------------------------------------------------------

/// A validated entity tag — the name of a record *kind* (e.g. `"user"`).
///
/// Tags must be lowercase alphanumeric with hyphens, 1–64 characters.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityTag(String);

impl EntityTag {
    /// Create a new `EntityTag`, validating format.
    ///
    /// # Errors
    /// Returns an error if the tag is empty, too long, or contains invalid
    /// characters.
    pub fn new(s: &str) -> Result<Self, TagError> {
        validate_tag(TagKind::Entity, s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the tag as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityTag {
    type Err = TagError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EntityTag {
    type Error = TagError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_tag(TagKind::Entity, &s)?;
        Ok(Self(s))
    }
}

impl From<EntityTag> for String {
    fn from(tag: EntityTag) -> Self {
        tag.0
    }
}

// ---------------------------------------------------------------------------
// SourceTag
// ---------------------------------------------------------------------------

/// A validated source tag — the name of a *location* an entity lives in
/// (e.g. `"upstream"`, `"local"`). An (entity, source) pair identifies one
/// data-source adapter.
///
/// Same lexical rules as [`EntityTag`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceTag(String);

impl SourceTag {
    /// Create a new `SourceTag`, validating format.
    ///
    /// # Errors
    /// Returns an error if the tag is empty, too long, or contains invalid
    /// characters.
    pub fn new(s: &str) -> Result<Self, TagError> {
        validate_tag(TagKind::Source, s)?;
        Ok(Self(s.to_owned()))
    }

    /// Return the tag as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SourceTag {
    type Err = TagError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SourceTag {
    type Error = TagError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        validate_tag(TagKind::Source, &s)?;
        Ok(Self(s))
    }
}

impl From<SourceTag> for String {
    fn from(tag: SourceTag) -> Self {
        tag.0
    }
}

// ---------------------------------------------------------------------------
// Tag validation
// ---------------------------------------------------------------------------

/// The maximum length of an entity or source tag.
pub const MAX_TAG_LEN: usize = 64;

fn validate_tag(kind: TagKind, s: &str) -> Result<(), TagError> {
    if s.is_empty() {
        return Err(TagError {
            kind,
            value: s.to_owned(),
            reason: "tag must not be empty".to_owned(),
        });
    }
    if s.len() > MAX_TAG_LEN {
        return Err(TagError {
            kind,
            value: s.to_owned(),
            reason: format!("tag must be at most {MAX_TAG_LEN} characters, got {}", s.len()),
        });
    }
    if s.starts_with('-') || s.ends_with('-') {
        return Err(TagError {
            kind,
            value: s.to_owned(),
            reason: "tag must not start or end with a hyphen".to_owned(),
        });
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(TagError {
            kind,
            value: s.to_owned(),
            reason: "tag must contain only lowercase letters (a-z), digits (0-9), and hyphens (-)"
                .to_owned(),
        });
    }
    Ok(())
}

/// The kind of tag that failed validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagKind {
    /// An [`EntityTag`] validation error.
    Entity,
    /// A [`SourceTag`] validation error.
    Source,
}

impl fmt::Display for TagKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity => write!(f, "entity tag"),
            Self::Source => write!(f, "source tag"),
        }
    }
}

/// A validation error for entity/source tags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TagError {
    /// What kind of tag was being validated.
    pub kind: TagKind,
    /// The invalid value.
    pub value: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for TagError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?} — {}", self.kind, self.value, self.reason)
    }
}

impl std::error::Error for TagError {}

// ---------------------------------------------------------------------------
// InternalKey
// ---------------------------------------------------------------------------

/// A concord-owned identity for one logical record within an entity.
///
/// Allocated exactly once per logical record by the operational store;
/// ids are never reused after deletion.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InternalKey {
    entity: EntityTag,
    id: i64,
}

impl InternalKey {
    /// Create an internal key from its parts.
    #[must_use]
    pub const fn new(entity: EntityTag, id: i64) -> Self {
        Self { entity, id }
    }

    /// The entity this key belongs to.
    #[must_use]
    pub const fn entity(&self) -> &EntityTag {
        &self.entity
    }

    /// The opaque numeric id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }
}

impl fmt::Display for InternalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity, self.id)
    }
}

// ---------------------------------------------------------------------------
// ForeignKey
// ---------------------------------------------------------------------------

/// The key that identifies a logical record inside a specific source.
///
/// Multiple foreign keys may map to the same [`InternalKey`] — at most one
/// per source.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ForeignKey {
    entity: EntityTag,
    source: SourceTag,
    id: String,
}

impl ForeignKey {
    /// Create a foreign key from its parts.
    pub fn new(entity: EntityTag, source: SourceTag, id: impl Into<String>) -> Self {
        Self {
            entity,
            source,
            id: id.into(),
        }
    }

    /// The entity this key belongs to.
    #[must_use]
    pub const fn entity(&self) -> &EntityTag {
        &self.entity
    }

    /// The source this key identifies the record in.
    #[must_use]
    pub const fn source(&self) -> &SourceTag {
        &self.source
    }

    /// The opaque source-side id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ForeignKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.entity, self.source, self.id)
    }
}

// ---------------------------------------------------------------------------
// Compatibility
// ---------------------------------------------------------------------------

/// A value carrying entity (and possibly source) tags.
///
/// Implemented by keys, documents, and source handles so that any two of
/// them can be checked for agreement before an operation proceeds.
pub trait Tagged {
    /// The entity tag this value is bound to.
    fn entity_tag(&self) -> &EntityTag;

    /// The source tag, for values bound to a specific source.
    /// `None` for values that span all sources of an entity.
    fn source_tag(&self) -> Option<&SourceTag>;
}

impl Tagged for InternalKey {
    fn entity_tag(&self) -> &EntityTag {
        &self.entity
    }
    fn source_tag(&self) -> Option<&SourceTag> {
        None
    }
}

impl Tagged for ForeignKey {
    fn entity_tag(&self) -> &EntityTag {
        &self.entity
    }
    fn source_tag(&self) -> Option<&SourceTag> {
        Some(&self.source)
    }
}

/// Returns `true` if two tagged values may take part in the same operation:
/// entity tags must be equal, and source tags must be equal whenever both
/// sides carry one.
pub fn compatible<A, B>(a: &A, b: &B) -> bool
where
    A: Tagged + ?Sized,
    B: Tagged + ?Sized,
{
    if a.entity_tag() != b.entity_tag() {
        return false;
    }
    match (a.source_tag(), b.source_tag()) {
        (Some(sa), Some(sb)) => sa == sb,
        _ => true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
