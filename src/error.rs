//! Unified error type for reconciliation operations.
//!
//! Defines [`Error`], the error surface of the engine, gateway, and
//! dispatcher. Errors are expressed in concord's own terms — adapter-level
//! faults are normalised into [`Error::Source`] by the gateway before the
//! engine ever sees them.

use std::fmt;

use crate::store::StoreError;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Unified error type for reconciliation operations.
#[derive(Debug)]
pub enum Error {
    /// An entity or source is not registered in the catalog, or a key has
    /// no mapping in the operational store.
    Unknown {
        /// What was looked up and not found.
        what: String,
    },

    /// A data-source adapter failed: I/O, exit status, or malformed output.
    Source {
        /// Human-readable description of the fault.
        message: String,
        /// Process exit code, when the adapter shells out.
        exit_code: Option<i32>,
    },

    /// Entity/source tags disagree between a data source and a key or
    /// document handed to it.
    Incompatible {
        /// Which tags disagreed and where.
        detail: String,
    },

    /// JSON from an adapter or the store could not be parsed.
    Decode {
        /// What failed to parse.
        detail: String,
    },

    /// The operational store failed a transaction or lost connectivity.
    Store(StoreError),

    /// An internal invariant was violated. Unrecoverable for the request
    /// (but not the process).
    Internal {
        /// The invariant that broke.
        detail: String,
    },
}

impl Error {
    /// Shorthand for an [`Error::Unknown`].
    pub fn unknown(what: impl Into<String>) -> Self {
        Self::Unknown { what: what.into() }
    }

    /// Shorthand for an [`Error::Incompatible`].
    pub fn incompatible(detail: impl Into<String>) -> Self {
        Self::Incompatible {
            detail: detail.into(),
        }
    }

    /// Shorthand for an [`Error::Decode`].
    pub fn decode(detail: impl Into<String>) -> Self {
        Self::Decode {
            detail: detail.into(),
        }
    }

    /// Shorthand for an [`Error::Internal`].
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
        }
    }

    /// Returns `true` for [`Error::Unknown`].
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown { .. })
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown { what } => write!(f, "unknown: {what}"),
            Self::Source { message, exit_code } => {
                write!(f, "data source failed: {message}")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code {code})")?;
                }
                Ok(())
            }
            Self::Incompatible { detail } => {
                write!(f, "incompatible entity/source tags: {detail}")
            }
            Self::Decode { detail } => write!(f, "could not decode JSON: {detail}"),
            Self::Store(e) => write!(f, "operational store error: {e}"),
            Self::Internal { detail } => {
                write!(
                    f,
                    "internal invariant violated: {detail}\n  \
                     This is a bug in concord — please report it."
                )
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

impl From<crate::adapter::SourceFault> for Error {
    fn from(fault: crate::adapter::SourceFault) -> Self {
        Self::Source {
            message: fault.message,
            exit_code: fault.exit_code,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
