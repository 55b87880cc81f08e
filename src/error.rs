//! Error taxonomy for a pipeline run
//!
//! `Discovery` and `Connection` abort the whole run. Everything else is scoped
//! to the file being processed: the file's transaction is rolled back, the
//! error is recorded and the run moves on to the next file.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Cannot discover source files under {}: {source}", root.display())]
    Discovery {
        root: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to connect to database: {0}")]
    Connection(#[source] sqlx::Error),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transform failed: {0}")]
    Transform(#[from] TransformError),

    #[error("Load into '{table}' failed: {source}")]
    Load {
        table: String,
        #[source]
        source: sqlx::Error,
    },
}

impl EtlError {
    pub(crate) fn load(table: impl Into<String>, source: sqlx::Error) -> Self {
        EtlError::Load {
            table: table.into(),
            source,
        }
    }

    /// True for errors that must stop the run instead of skipping a file
    pub fn is_fatal(&self) -> bool {
        matches!(self, EtlError::Discovery { .. } | EtlError::Connection(_))
    }
}

/// A source document that cannot be turned into rows
#[derive(Error, Debug)]
pub enum TransformError {
    #[error("Invalid JSON on line {line}: {source}")]
    Json {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Missing required field '{field}' on line {line}")]
    MissingField { field: &'static str, line: usize },

    #[error("Timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    #[error("Invalid user id '{0}'")]
    InvalidUserId(String),

    #[error("Field '{field}' is not a number: {value}")]
    InvalidNumber { field: &'static str, value: String },
}
