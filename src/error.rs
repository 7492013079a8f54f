//! Error taxonomy for the session store.
//!
//! Read-path failures (`InvalidSignature`, `Expired`, `CorruptPayload`, backend errors while
//! loading) are logged and degrade to a fresh session. Write-path failures are returned to the
//! caller.

use deadpool_redis::{PoolError, redis::RedisError};
use tower_sessions_core::session_store;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No pooled connection became available before the wait timeout.
    #[error("Connection pool exhausted")]
    PoolExhausted,

    /// The remote store could not be reached or rejected a command.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Stored bytes could not be decoded into a session payload.
    #[error("Corrupt session payload: {0}")]
    CorruptPayload(String),

    #[error("Session payload too large ({len} > {max} bytes)")]
    PayloadTooLarge { len: usize, max: usize },

    /// No key pair in the chain verifies the cookie value.
    #[error("Invalid cookie signature")]
    InvalidSignature,

    #[error("Cookie timestamp has expired")]
    Expired,

    /// A save or delete could not be written to the remote store.
    #[error("Session store unavailable: {0}")]
    StoreUnavailable(#[source] Box<Error>),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Cookie encryption failed")]
    Encryption,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn unavailable(err: Error) -> Self {
        match err {
            Error::StoreUnavailable(_) => err,
            other => Error::StoreUnavailable(Box::new(other)),
        }
    }
}

impl From<RedisError> for Error {
    fn from(err: RedisError) -> Self {
        Error::Connection(err.to_string())
    }
}

impl From<PoolError> for Error {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(_) => Error::PoolExhausted,
            PoolError::Backend(err) => Error::Connection(err.to_string()),
            other => Error::Connection(other.to_string()),
        }
    }
}

impl From<Error> for session_store::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::PayloadTooLarge { .. } | Error::Encryption => {
                session_store::Error::Encode(err.to_string())
            }
            Error::CorruptPayload(_) => session_store::Error::Decode(err.to_string()),
            other => session_store::Error::Backend(other.to_string()),
        }
    }
}
