//! # Cache Client API
//!
//! Purpose: Expose the typed cache operations on top of the failover pool.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `CacheClient` hides pooling, discovery, and RESP.
//! 2. **Scoped Borrowing**: Every operation holds exactly one pooled
//!    connection and releases it on every path through the RAII guard.
//! 3. **No Blind Retries**: Operation errors are surfaced to the caller as-is.

use std::collections::HashSet;

use serde::Serialize;

use crate::codec::CacheValue;
use crate::config::CacheConfig;
use crate::connection::{Dialer, TcpDialer};
use crate::discovery::Roster;
use crate::error::{ClientError, ClientResult};
use crate::pool::{ConnectionPool, PoolConfig};
use crate::pubsub::Subscription;
use crate::resp::RespValue;

/// Keys requested per `SCAN` round trip.
const SCAN_BATCH: &[u8] = b"500";

/// Typed cache operations over a failover-aware pool.
pub struct CacheClient<D: Dialer = TcpDialer> {
    pool: ConnectionPool<D>,
}

impl<D: Dialer> Clone for CacheClient<D> {
    fn clone(&self) -> Self {
        CacheClient {
            pool: self.pool.clone(),
        }
    }
}

impl CacheClient<TcpDialer> {
    /// Builds the pool from configuration and runs the initial discovery.
    ///
    /// Fails with `NoMasterAvailable` when no roster entry reports master.
    pub fn connect(config: &CacheConfig) -> ClientResult<Self> {
        let dialer = TcpDialer::new(config.dial_options());
        Self::with_dialer(dialer, config.roster()?, config.pool_config())
    }
}

impl<D: Dialer> CacheClient<D> {
    /// Creates a client over a custom dialer and bootstraps the pool.
    pub fn with_dialer(dialer: D, roster: Roster, config: PoolConfig) -> ClientResult<Self> {
        let pool = ConnectionPool::new(dialer, roster, config);
        pool.bootstrap()?;
        Ok(CacheClient { pool })
    }

    pub fn pool(&self) -> &ConnectionPool<D> {
        &self.pool
    }

    /// Address currently believed to be master.
    pub fn last_known_master(&self) -> Option<String> {
        self.pool.last_known_master().map(|record| record.addr.clone())
    }

    /// Stores `value` under `key`; a positive `ttl_secs` also sets an expiry.
    ///
    /// With `ttl_secs == 0` the key never expires.
    pub fn set(&self, key: &str, value: &[u8], ttl_secs: u64) -> ClientResult<()> {
        let mut conn = self.pool.acquire()?;
        match conn.exec(&[b"SET", key.as_bytes(), value])? {
            reply if reply.is_ok() => {}
            RespValue::Error(message) => return Err(write_error(&message)),
            other => return Err(ClientError::Write(format!("SET {} replied {:?}", key, other))),
        }

        if ttl_secs == 0 {
            return Ok(());
        }
        let seconds = ttl_secs.to_string();
        match conn.exec(&[b"EXPIRE", key.as_bytes(), seconds.as_bytes()])? {
            RespValue::Integer(1) => Ok(()),
            RespValue::Error(message) => Err(write_error(&message)),
            other => Err(ClientError::Write(format!(
                "unable to set expiry on {}: {:?}",
                key, other
            ))),
        }
    }

    /// Fetches a value by key.
    ///
    /// Returns `Ok(None)` when the key is missing.
    pub fn get(&self, key: &str) -> ClientResult<Option<Vec<u8>>> {
        let mut conn = self.pool.acquire()?;
        match conn.exec(&[b"GET", key.as_bytes()])? {
            RespValue::Bulk(data) => Ok(data),
            RespValue::Error(message) => Err(ClientError::server(&message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key; a missing key is `NotFound`.
    pub fn delete(&self, key: &str) -> ClientResult<()> {
        let mut conn = self.pool.acquire()?;
        match conn.exec(&[b"DEL", key.as_bytes()])? {
            RespValue::Integer(count) if count > 0 => Ok(()),
            RespValue::Integer(_) => Err(ClientError::NotFound(key.to_string())),
            RespValue::Error(message) => Err(ClientError::server(&message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Resets the expiry of an existing key without rewriting its value.
    pub fn prolong(&self, key: &str, ttl_secs: u64) -> ClientResult<()> {
        // EXPIRE with 0 deletes the key instead of prolonging it.
        if ttl_secs == 0 {
            return Err(ClientError::InvalidArgument(
                "prolong needs a positive ttl".to_string(),
            ));
        }
        let seconds = ttl_secs.to_string();
        let mut conn = self.pool.acquire()?;
        match conn.exec(&[b"EXPIRE", key.as_bytes(), seconds.as_bytes()])? {
            RespValue::Integer(1) => Ok(()),
            RespValue::Integer(_) => Err(ClientError::NotFound(key.to_string())),
            RespValue::Error(message) => Err(ClientError::server(&message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Encodes `value` with its own codec and stores it.
    pub fn set_encoded<T: CacheValue>(&self, key: &str, value: &T, ttl_secs: u64) -> ClientResult<()> {
        let bytes = value.encode()?;
        self.set(key, &bytes, ttl_secs)
    }

    /// Fetches and decodes a value; a missing key is `EmptyValue`.
    pub fn get_encoded<T: CacheValue>(&self, key: &str) -> ClientResult<T> {
        match self.get(key)? {
            Some(bytes) => T::decode(&bytes),
            None => Err(ClientError::EmptyValue(key.to_string())),
        }
    }

    /// Publishes `value` as JSON; returns how many subscribers received it.
    pub fn publish<T: Serialize + ?Sized>(&self, channel: &str, value: &T) -> ClientResult<u64> {
        let content =
            serde_json::to_vec(value).map_err(|err| ClientError::Encoding(err.to_string()))?;
        let mut conn = self.pool.acquire()?;
        match conn.exec(&[b"PUBLISH", channel.as_bytes(), content.as_slice()])? {
            RespValue::Integer(receivers) => Ok(receivers.max(0) as u64),
            RespValue::Error(message) => Err(ClientError::server(&message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Subscribes to `channel` on a dedicated, unpooled connection.
    pub fn subscribe(&self, channel: &str) -> ClientResult<Subscription<D::Link>> {
        let link = self.pool.dedicated()?;
        Subscription::open(link, channel)
    }

    /// Lists keys matching a glob `pattern` using cursor-based `SCAN`.
    pub fn list_keys(&self, pattern: &str) -> ClientResult<Vec<String>> {
        let mut conn = self.pool.acquire()?;
        let mut cursor = b"0".to_vec();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        loop {
            let reply = conn.exec(&[
                b"SCAN",
                cursor.as_slice(),
                b"MATCH",
                pattern.as_bytes(),
                b"COUNT",
                SCAN_BATCH,
            ])?;
            let (next, batch) = parse_scan(reply)?;
            for key in batch {
                // SCAN may return a key more than once.
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
            if next == b"0" {
                return Ok(keys);
            }
            cursor = next;
        }
    }

    /// Round-trips a `PING`; used by external health checks.
    pub fn is_alive(&self) -> ClientResult<()> {
        let mut conn = self.pool.acquire()?;
        match conn.exec(&[b"PING"])? {
            RespValue::Simple(text) if text.as_slice() == b"PONG" => Ok(()),
            RespValue::Error(message) => Err(ClientError::server(&message)),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Closes pooled connections; later operations fail with `PoolClosed`.
    pub fn shutdown(&self) {
        self.pool.shutdown();
    }
}

fn write_error(message: &[u8]) -> ClientError {
    match ClientError::server(message) {
        ClientError::Server { message } => ClientError::Write(message),
        readonly => readonly,
    }
}

fn parse_scan(reply: RespValue) -> ClientResult<(Vec<u8>, Vec<String>)> {
    let items = match reply {
        RespValue::Array(items) if items.len() == 2 => items,
        RespValue::Error(message) => return Err(ClientError::server(&message)),
        _ => return Err(ClientError::UnexpectedResponse),
    };
    let mut items = items.into_iter();
    let cursor = items
        .next()
        .and_then(|value| value.as_bytes().map(<[u8]>::to_vec))
        .ok_or(ClientError::UnexpectedResponse)?;
    let keys = match items.next() {
        Some(RespValue::Array(keys)) => keys
            .into_iter()
            .map(scan_key)
            .collect::<ClientResult<Vec<_>>>()?,
        _ => return Err(ClientError::UnexpectedResponse),
    };
    Ok((cursor, keys))
}

fn scan_key(key: RespValue) -> ClientResult<String> {
    match key {
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => String::from_utf8(data)
            .map_err(|err| ClientError::Encoding(format!("non UTF-8 key from SCAN: {}", err))),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> RespValue {
        RespValue::Bulk(Some(text.as_bytes().to_vec()))
    }

    #[test]
    fn parses_scan_page() {
        let reply = RespValue::Array(vec![
            bulk("17"),
            RespValue::Array(vec![bulk("session_a"), bulk("session_b")]),
        ]);
        let (cursor, keys) = parse_scan(reply).unwrap();
        assert_eq!(cursor, b"17");
        assert_eq!(keys, vec!["session_a", "session_b"]);
    }

    #[test]
    fn non_utf8_scan_key_is_an_encoding_error() {
        let reply = RespValue::Array(vec![
            bulk("0"),
            RespValue::Array(vec![bulk("ok"), RespValue::Bulk(Some(vec![0xff, 0xfe]))]),
        ]);
        assert!(matches!(parse_scan(reply), Err(ClientError::Encoding(_))));
    }

    #[test]
    fn malformed_scan_is_rejected() {
        assert!(parse_scan(RespValue::Array(vec![bulk("0")])).is_err());
        assert!(parse_scan(RespValue::Integer(0)).is_err());
    }

    #[test]
    fn rejected_writes_become_write_errors() {
        assert!(matches!(write_error(b"OOM command not allowed"), ClientError::Write(_)));
        assert!(matches!(write_error(b"READONLY replica"), ClientError::ReadOnly(_)));
    }
}
