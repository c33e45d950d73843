use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("I/O error on {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("table not found: {0}")]
    TableNotFound(String),
    #[error("column not found: {0}")]
    ColumnNotFound(String),
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),
    #[error("predicate can never be satisfied: {0}")]
    UnsatisfiablePredicate(String),
    #[error("malformed index {index}: {source}")]
    MalformedIndex {
        index: String,
        #[source]
        source: io::Error,
    },
    #[error("planning error: {0}")]
    PlanningError(String),
    #[error("parse error: {0}")]
    ParsingError(String),
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Attaches the file or table an I/O failure concerns.
pub trait IoContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T, ExecutionError>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, ExecutionError>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T, ExecutionError> {
        self.map_err(|source| ExecutionError::Io {
            context: context.into(),
            source,
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T, ExecutionError> {
        self.map_err(|source| ExecutionError::Io {
            context: f(),
            source,
        })
    }
}

/// Maps an index read failure, singling out corrupt pages.
pub(crate) fn index_error(index: &str, source: io::Error) -> ExecutionError {
    if source.kind() == io::ErrorKind::InvalidData {
        ExecutionError::MalformedIndex {
            index: index.to_string(),
            source,
        }
    } else {
        ExecutionError::Io {
            context: format!("index {index}"),
            source,
        }
    }
}
