use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported dimension '{dimension}' for data source {data_source}")]
    UnsupportedDimension {
        dimension: String,
        data_source: String,
    },

    #[error("Malformed filter: {0}")]
    MalformedFilter(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    /// Raw rows did not have the shape the normalizer was promised.
    #[error("Result contract violation: {0}")]
    ContractViolation(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn unsupported(dimension: impl fmt::Display, data_source: impl fmt::Display) -> Self {
        Error::UnsupportedDimension {
            dimension: dimension.to_string(),
            data_source: data_source.to_string(),
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.to_string())
    }
}

impl From<rusqlite_migration::Error> for Error {
    fn from(e: rusqlite_migration::Error) -> Self {
        Error::Migration(e.to_string())
    }
}

impl<E: fmt::Display> From<tokio_rusqlite::Error<E>> for Error {
    fn from(e: tokio_rusqlite::Error<E>) -> Self {
        Error::Database(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
