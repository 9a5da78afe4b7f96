//! `Set-Cookie` values and `Cookie` header parsing for the session token.

use crate::store::SESSION_TTL_SECS;

pub const COOKIE_NAME: &str = "authtoken";

/// `Set-Cookie` value carrying a freshly issued token.
pub fn session_cookie(token: &str) -> String {
    format!(
        "{}={}; Path=/; Max-Age={}",
        COOKIE_NAME, token, SESSION_TTL_SECS
    )
}

/// `Set-Cookie` value that makes the browser drop the token.
pub fn clear_session_cookie() -> String {
    format!(
        "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
        COOKIE_NAME
    )
}

/// Finds the session token in a `Cookie` request header.
pub fn token_from_cookie_header(header: &str) -> Option<&str> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == COOKIE_NAME)
        .map(|(_, value)| value.trim_matches('"'))
        .filter(|value| !value.is_empty())
}
