//! Unified error types for snapcache.
//!
//! Runtime errors are isolated per source: refresh failures surface through
//! `updateError` events, lookup failures through `getError` events plus the
//! returned `Err`. Only [`Error::Config`] is fatal, and only at startup.

use tokio_rusqlite::rusqlite;

use crate::config::ConfigError;

/// Unified error type for the cache core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A service definition is missing a required field or is malformed.
    #[error("CONFIG_ERROR: {0}")]
    Config(#[from] ConfigError),

    /// Fetching a source failed (network, non-2xx/3xx status, bad body).
    #[error("FETCH_ERROR: {source_name}: {cause}")]
    Fetch { source_name: String, cause: Box<Error> },

    /// The remote answered with a status outside 2xx/3xx.
    #[error("HTTP_ERROR: {status} >> {reason}")]
    Http { status: u16, reason: String },

    /// The request never produced a response.
    #[error("TRANSPORT_ERROR: {0}")]
    Transport(String),

    /// The response body could not be decoded as JSON.
    #[error("DECODE_ERROR: {0}")]
    Decode(String),

    /// The payload could not be turned into records and indexes.
    #[error("INDEX_ERROR: {source_name}: {reason}")]
    Index { source_name: String, reason: String },

    /// The snapshot could not be committed to the store.
    #[error("COMMIT_ERROR: {source_name}: {cause}")]
    Commit { source_name: String, cause: Box<Error> },

    /// No snapshot has been committed for the source.
    #[error("SOURCE_NOT_FOUND: {0}")]
    SourceNotFound(String),

    /// The source name is not part of the configuration.
    #[error("UNKNOWN_SOURCE: {0}")]
    UnknownSource(String),

    /// No value stored under the key.
    #[error("NOT_FOUND: {0}")]
    NotFound(String),

    /// The durable tier failed while reading or decoding a value.
    #[error("STORAGE_READ_ERROR: {key}: {cause}")]
    StorageRead { key: String, cause: String },

    /// The durable tier rejected a write.
    #[error("STORAGE_WRITE_ERROR: {key}: {cause}")]
    StorageWrite { key: String, cause: String },

    /// The store has been closed.
    #[error("STORE_CLOSED")]
    StoreClosed,

    /// Database operation failed.
    #[error("DATABASE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("DATABASE_ERROR: migration failed: {0}")]
    MigrationFailed(String),
}

impl Error {
    /// True when the error means "nothing stored", as opposed to a failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::SourceNotFound(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::StoreClosed,
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}
