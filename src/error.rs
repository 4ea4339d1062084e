use rusqlite::Error as RusqliteError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Which part of a fetch request a field name came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Filter,
    Query,
    Sort,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldKind::Filter => "Filter",
            FieldKind::Query => "Query",
            FieldKind::Sort => "Sort",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum DataKitError {
    #[error("[Security] {kind} field '{field}' is not allowed.")]
    NotAllowed { kind: FieldKind, field: String },

    #[error("[Security] {kind} value for '{field}' must be a primitive.")]
    NotPrimitive { kind: FieldKind, field: String },

    #[error("Invalid input: missing limit or page")]
    MissingPagination,

    #[error("Unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("Invalid request at '{path}': {message}")]
    Schema { path: String, message: String },

    #[error("Unsupported query operator: {0}")]
    UnsupportedOperator(String),

    #[error("Invalid field name: '{0}'")]
    InvalidField(String),

    #[error("Collection not found: '{0}'")]
    CollectionNotFound(String),

    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

impl DataKitError {
    pub fn schema(path: impl Into<String>, message: impl Into<String>) -> Self {
        DataKitError::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    /// True when the request itself was at fault (validation, whitelisting,
    /// unsupported actions). Backend and infrastructure failures return false.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DataKitError::NotAllowed { .. }
                | DataKitError::NotPrimitive { .. }
                | DataKitError::MissingPagination
                | DataKitError::UnsupportedAction(_)
                | DataKitError::Schema { .. }
                | DataKitError::InvalidField(_)
        )
    }
}
