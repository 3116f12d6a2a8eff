//! Error taxonomy for lookups.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LookupError>;

#[derive(Debug, Error)]
pub enum LookupError {
    /// Missing or invalid configuration; aborts setup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The backing store failed; `context` names the key or operation.
    #[error("Database error ({context}): {source}")]
    Backend {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("I/O error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// A fetched value does not have the shape the mode requires.
    #[error("Data error: {0}")]
    DataShape(String),

    #[error("Not implemented: {0}")]
    Unimplemented(String),

    /// Cooperative cancellation, not a failure of the data or the store.
    #[error("{0} has been interrupted")]
    Interrupted(String),
}

impl LookupError {
    pub fn backend(context: impl Into<String>, source: rusqlite::Error) -> Self {
        LookupError::Backend {
            context: context.into(),
            source,
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LookupError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, LookupError::Interrupted(_))
    }
}
