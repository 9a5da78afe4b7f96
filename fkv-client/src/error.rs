//! # Client Errors
//!
//! One error enum for every layer of the client: transport, RESP framing,
//! master discovery, and the typed cache operations.

use thiserror::Error;

/// Result type for the client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network or IO failure while dialing, reading, or writing.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// RESP2 framing or parse error.
    #[error("protocol error")]
    Protocol,

    /// Server returned an error reply.
    #[error("server error: {message}")]
    Server { message: String },

    /// Response type did not match the expected command response.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Address could not be resolved into a socket address.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// The ROLE reply was missing, malformed, or too short.
    #[error("role probe failed: {0}")]
    RoleProbe(String),

    /// Every roster candidate was tried and none reported master.
    #[error("no master available")]
    NoMasterAvailable,

    /// The endpoint refused a write because it is no longer the master.
    #[error("endpoint is read-only: {0}")]
    ReadOnly(String),

    /// A write was rejected or the expiry update did not report success.
    #[error("write failed: {0}")]
    Write(String),

    /// The key did not exist.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The key holds no value to decode.
    #[error("no cache value for key: {0}")]
    EmptyValue(String),

    /// A value could not be encoded, or stored bytes could not be decoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The caller passed an argument the operation cannot honour.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The pool was shut down.
    #[error("connection pool closed")]
    PoolClosed,

    /// The process-wide cache has not been initialized.
    #[error("cache not initialized")]
    NotInitialized,

    /// The process-wide cache is already initialized.
    #[error("cache already initialized")]
    AlreadyInitialized,

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Builds a server error from a raw RESP error payload.
    pub(crate) fn server(message: &[u8]) -> Self {
        let message = String::from_utf8_lossy(message).into_owned();
        if message.starts_with("READONLY") {
            ClientError::ReadOnly(message)
        } else {
            ClientError::Server { message }
        }
    }

    /// True when the error means the connection can no longer be trusted.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Protocol | ClientError::ReadOnly(_)
        )
    }
}
