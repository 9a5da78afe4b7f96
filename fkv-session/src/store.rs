use fkv_client::{
    msgpack_decode, msgpack_encode, CacheClient, CacheValue, ClientError, ClientResult, Dialer,
    TcpDialer,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{SessionError, SessionResult};

pub const KEY_PREFIX: &str = "session_";

/// Sessions live for 365 days.
pub const SESSION_TTL_SECS: u64 = 3600 * 24 * 365;

/// Record stored for a logged-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub uid: i64,
}

impl CacheValue for SessionInfo {
    fn encode(&self) -> ClientResult<Vec<u8>> {
        msgpack_encode(self)
    }

    fn decode(bytes: &[u8]) -> ClientResult<Self> {
        msgpack_decode(bytes)
    }
}

/// Session operations on top of a cache client.
pub struct SessionStore<D: Dialer = TcpDialer> {
    cache: CacheClient<D>,
}

impl SessionStore<TcpDialer> {
    /// Uses the process-wide cache installed by `fkv_client::init`.
    pub fn from_global() -> SessionResult<Self> {
        Ok(SessionStore::new(fkv_client::global()?))
    }
}

impl<D: Dialer> SessionStore<D> {
    pub fn new(cache: CacheClient<D>) -> Self {
        SessionStore { cache }
    }

    /// Stores `data` under a new token and returns the token.
    pub fn create<T: CacheValue>(&self, data: &T) -> SessionResult<String> {
        let token = Uuid::new_v4().to_string();
        self.cache
            .set_encoded(&session_key(&token), data, SESSION_TTL_SECS)?;
        debug!(token = %token, "session created");
        Ok(token)
    }

    /// Starts a session for `uid`.
    pub fn login(&self, uid: i64) -> SessionResult<String> {
        self.create(&SessionInfo { uid })
    }

    /// Resolves a token to its user.
    ///
    /// Malformed tokens, unknown or expired sessions, undecodable records and
    /// cache failures all mean "not logged in".
    pub fn user_id(&self, token: &str) -> Option<i64> {
        if Uuid::parse_str(token).is_err() {
            return None;
        }
        match self.cache.get_encoded::<SessionInfo>(&session_key(token)) {
            Ok(info) => Some(info.uid),
            Err(ClientError::EmptyValue(_)) => None,
            Err(err) => {
                debug!(error = %err, "session lookup failed");
                None
            }
        }
    }

    /// Like `user_id`, reading the token from a `Cookie` header.
    pub fn user_from_cookie_header(&self, header: Option<&str>) -> Option<i64> {
        let token = crate::cookie::token_from_cookie_header(header?)?;
        self.user_id(token)
    }

    /// Removes one session. An already-gone session is not an error.
    pub fn logout(&self, token: &str) -> SessionResult<()> {
        if Uuid::parse_str(token).is_err() {
            return Err(SessionError::InvalidToken(token.to_string()));
        }
        match self.cache.delete(&session_key(token)) {
            Ok(()) | Err(ClientError::NotFound(_)) => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes every session that belongs to `uid`; returns how many.
    pub fn logout_all(&self, uid: i64) -> SessionResult<usize> {
        let pattern = format!("{}*", KEY_PREFIX);
        let mut removed = 0;
        for key in self.cache.list_keys(&pattern)? {
            let info = match self.cache.get_encoded::<SessionInfo>(&key) {
                Ok(info) => info,
                Err(ClientError::EmptyValue(_)) => continue,
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping unreadable session");
                    continue;
                }
            };
            if info.uid != uid {
                continue;
            }
            match self.cache.delete(&key) {
                Ok(()) => removed += 1,
                Err(ClientError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        debug!(uid, removed, "user sessions removed");
        Ok(removed)
    }
}

fn session_key(token: &str) -> String {
    format!("{}{}", KEY_PREFIX, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_info_uses_named_msgpack_fields() {
        let bytes = SessionInfo { uid: 9 }.encode().unwrap();
        // fixmap(1), fixstr "uid", positive fixint 9
        assert_eq!(bytes, vec![0x81, 0xa3, b'u', b'i', b'd', 0x09]);
        assert_eq!(SessionInfo::decode(&bytes).unwrap(), SessionInfo { uid: 9 });
    }

    #[test]
    fn ttl_is_one_year() {
        assert_eq!(SESSION_TTL_SECS, 31_536_000);
    }
}
