//! # FailoverKV Sessions
//!
//! Login sessions kept in the failover cache. A session is a MessagePack
//! record stored under `session_<uuid>` for a year; the uuid doubles as the
//! `authtoken` cookie value.

mod cookie;
mod error;
mod store;

pub use cookie::{clear_session_cookie, session_cookie, token_from_cookie_header, COOKIE_NAME};
pub use error::{SessionError, SessionResult};
pub use store::{SessionInfo, SessionStore, KEY_PREFIX, SESSION_TTL_SECS};
