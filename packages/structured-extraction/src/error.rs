//! Typed errors for schema preparation and stream accumulation.
//!
//! Only [`SchemaError`] and terminal validation failures are ever surfaced to
//! callers. Cycles, partial-validation misses and flatten key conflicts
//! degrade to "best current data" instead.

use std::fmt;

use thiserror::Error;

/// Errors raised while normalizing, augmenting or compiling a schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// `$ref` points at a definition that does not exist
    #[error("unresolved reference: {reference}")]
    UnresolvedReference { reference: String },

    /// `$ref` is not of the `#/definitions/<name>` or `#/$defs/<name>` form
    #[error("unsupported reference: {reference}")]
    UnsupportedReference { reference: String },

    /// `allOf` must have exactly one member
    #[error("allOf must have exactly one member, found {count}")]
    AllOfArity { count: usize },

    /// Strict compilation hit a `$ref` that is not part of a tolerated cycle
    #[error("reference was not expanded before strict compilation: {reference}")]
    UnexpandedReference { reference: String },

    /// Structurally malformed schema
    #[error("invalid schema: {reason}")]
    InvalidSchema { reason: String },
}

impl SchemaError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidSchema {
            reason: reason.into(),
        }
    }
}

/// A single mismatch between a value and a structural type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path of the offending value (`""` for the root)
    pub path: String,

    /// What was wrong
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            write!(f, "<root>: {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// All issues found while validating a value against a structural type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("validation failed for {type_name}: {}", format_issues(.issues))]
pub struct ValidationError {
    pub type_name: String,
    pub issues: Vec<ValidationIssue>,
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced while consuming an extraction stream.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Schema could not be prepared
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Final data did not satisfy the full structural type
    #[error("choice {choice} failed terminal validation: {source}")]
    TerminalValidation {
        choice: usize,
        #[source]
        source: ValidationError,
    },

    /// A chunk on the wire could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// The caller's byte stream reported an error
    #[error("transport error: {0}")]
    Transport(String),
}

/// Result type alias for schema operations.
pub type SchemaResult<T> = std::result::Result<T, SchemaError>;

/// Result type alias for extraction operations.
pub type Result<T> = std::result::Result<T, ExtractionError>;
