//! Error taxonomy (spec §7, §10).
//!
//! Per-function failures are typed and accumulated by the driver; resource
//! exhaustion in the register allocator is a bug in the embedding backend
//! and panics rather than returning a `CompileError` — a correct program
//! never requests more simultaneous live values than there are registers.

use thiserror::Error;

/// A failure compiling a single function. Other functions in the module are
/// unaffected and compilation continues (spec §7 "Propagation").
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    /// The adaptor's pre-pass or the target backend hit an IR construct this
    /// generator does not implement.
    #[error("function `{func}` uses an unsupported construct: {reason}")]
    UnsupportedConstruct { func: String, reason: String },

    /// A value or argument's parts-of-type layout does not match its
    /// in-memory layout at a function or call boundary.
    #[error("function `{func}` has a layout-incompatible type at an ABI boundary: {reason}")]
    IncompatibleLayout { func: String, reason: String },
}

impl CompileError {
    pub fn func_name(&self) -> &str {
        match self {
            CompileError::UnsupportedConstruct { func, .. } => func,
            CompileError::IncompatibleLayout { func, .. } => func,
        }
    }
}

/// Outcome of compiling a whole module in lenient mode: failed functions are
/// skipped, not fatal, but no partial object is produced once any function
/// has failed (spec §7, "User-visible failure behaviour").
#[derive(Debug, Default)]
pub struct CompileReport {
    pub object: Option<Vec<u8>>,
    pub failed: Vec<CompileError>,
}

impl CompileReport {
    pub fn success(object: Vec<u8>) -> Self {
        Self { object: Some(object), failed: Vec::new() }
    }

    pub fn failure(failed: Vec<CompileError>) -> Self {
        Self { object: None, failed }
    }

    pub fn is_success(&self) -> bool {
        self.object.is_some() && self.failed.is_empty()
    }
}
