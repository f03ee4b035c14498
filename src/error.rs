//! Crate-wide error type.
//!
//! Every fallible public operation returns [`Result`]. Errors carry a
//! coarse [`ErrorKind`] plus a human-readable message; internal kernels
//! assume validated inputs and only `debug_assert!` their invariants.

use std::fmt;
use std::fmt::{Display, Formatter};

/// Broad classification of engine errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A required input was missing.
    ArgumentRequired,
    /// A numeric input was outside its legal range.
    ArgumentOutOfRange,
    /// A parameter referenced a catalog the engine does not own, or a key
    /// of the wrong type for the catalog it named.
    CatalogMismatch,
    /// A second filter on a one-to-one catalog, or a second sort/facet
    /// parameter on any catalog, within one query.
    DuplicateParameter,
    /// An item was added under a primary key that is already live.
    DuplicatePrimaryKey,
    /// A write landed before the tail of a compressed vector.
    ForwardOnlyViolation,
    /// The operation is not defined for the operand forms involved.
    UnsupportedOperation,
    /// A one-shot query was executed twice.
    AlreadyExecuted,
    /// Unsafe kernels were requested but not compiled in.
    UnsafeUnavailable,
}

/// An engine error: a kind plus context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
}

impl Error {
    pub fn new<S: AsRef<str>>(kind: ErrorKind, message: S) -> Self {
        Error {
            kind,
            message: message.as_ref().to_string(),
        }
    }

    pub fn argument_required<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::ArgumentRequired, message)
    }

    pub fn argument_out_of_range<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::ArgumentOutOfRange, message)
    }

    pub fn catalog_mismatch<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::CatalogMismatch, message)
    }

    pub fn duplicate_parameter<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::DuplicateParameter, message)
    }

    pub fn duplicate_primary_key<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::DuplicatePrimaryKey, message)
    }

    pub fn forward_only<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::ForwardOnlyViolation, message)
    }

    pub fn unsupported<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::UnsupportedOperation, message)
    }

    pub fn already_executed<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::AlreadyExecuted, message)
    }

    pub fn unsafe_unavailable<S: AsRef<str>>(message: S) -> Self {
        Self::new(ErrorKind::UnsafeUnavailable, message)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "faceted {:?} error: {}", self.kind, &self.message)
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_message() {
        let err = Error::forward_only("write at word 3 behind tail 7");
        let text = err.to_string();
        assert!(text.contains("ForwardOnlyViolation"));
        assert!(text.contains("word 3"));
    }

    #[test]
    fn test_kind_equality() {
        let a = Error::unsupported("x");
        assert_eq!(a.kind, ErrorKind::UnsupportedOperation);
        assert_ne!(a.kind, ErrorKind::AlreadyExecuted);
    }
}
