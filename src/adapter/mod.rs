//! Data-source adapters.
//!
//! An adapter is the code that actually talks to one external location of
//! an entity — a directory of JSON files, an external command, or an
//! in-process map. Adapters know nothing about entity/source tags or the
//! operational store; they move raw JSON bodies under source-side string
//! ids. The gateway layers tag checking and fault normalisation on top.

pub mod command;
pub mod directory;
pub mod memory;

use std::fmt;

use serde_json::Value;

use crate::model::ident::ForeignKey;

// ---------------------------------------------------------------------------
// SourceFault
// ---------------------------------------------------------------------------

/// An adapter-level failure: I/O, exit status, or malformed output.
///
/// Faults never cross the gateway boundary as-is; the gateway wraps them
/// into the engine's error type.
#[derive(Debug)]
pub struct SourceFault {
    /// Human-readable description of what went wrong.
    pub message: String,
    /// Process exit code, for adapters that shell out.
    pub exit_code: Option<i32>,
}

impl SourceFault {
    /// A fault with no exit code.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            exit_code: None,
        }
    }

    /// A fault from a finished process.
    pub fn exited(message: impl Into<String>, code: Option<i32>) -> Self {
        Self {
            message: message.into(),
            exit_code: code,
        }
    }
}

impl fmt::Display for SourceFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for SourceFault {}

impl From<std::io::Error> for SourceFault {
    fn from(e: std::io::Error) -> Self {
        Self::new(format!("I/O error: {e}"))
    }
}

// ---------------------------------------------------------------------------
// DataSource
// ---------------------------------------------------------------------------

/// The contract every data-source adapter implements.
///
/// One adapter instance serves one (entity, source) pair. Construction is
/// the `initialise` step of the adapter lifecycle; dropping the adapter is
/// `finalise` — any handles an implementation opens per call are closed on
/// all exit paths, including faults.
pub trait DataSource: Send {
    /// Fetch the document body stored under `fk`.
    ///
    /// # Errors
    /// Faults if the record is absent or unreadable.
    fn get(&mut self, fk: &ForeignKey) -> Result<Value, SourceFault>;

    /// Write `content`. With `fk` absent this creates a new record; with
    /// `fk` present it updates in place. Returns the definitive
    /// source-side id — callers record it when it is new.
    ///
    /// # Errors
    /// Faults if the write is rejected or fails.
    fn set(&mut self, content: &Value, fk: Option<&ForeignKey>) -> Result<String, SourceFault>;

    /// Delete the record under `fk`. Deleting an already-absent record is
    /// not required to fault.
    ///
    /// # Errors
    /// Faults if the delete fails.
    fn delete(&mut self, fk: &ForeignKey) -> Result<(), SourceFault>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
