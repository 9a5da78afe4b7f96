use fkv_client::ClientError;
use thiserror::Error;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cache error: {0}")]
    Cache(#[from] ClientError),

    /// Token is not a UUID, so it cannot name a session.
    #[error("invalid session token: {0}")]
    InvalidToken(String),
}
