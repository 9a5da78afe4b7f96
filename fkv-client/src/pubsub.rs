//! # Pub/Sub
//!
//! A subscription owns a dedicated connection: once `SUBSCRIBE` is sent the
//! link can only receive pushes, so it never goes back to the pool.

use std::iter::FusedIterator;

use serde::de::DeserializeOwned;
use tracing::debug;

use crate::connection::{Connection, Link, DEFAULT_TIMEOUT};
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

/// One message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: Vec<u8>,
}

impl Message {
    /// Decodes a payload written by `CacheClient::publish`.
    pub fn json<T: DeserializeOwned>(&self) -> ClientResult<T> {
        serde_json::from_slice(&self.payload).map_err(|err| ClientError::Encoding(err.to_string()))
    }
}

/// Blocking, unbounded stream of channel messages.
///
/// Iteration ends after the first transport error; dropping the
/// subscription closes its connection.
pub struct Subscription<L: Link = Connection> {
    link: Option<L>,
    channel: String,
}

impl<L: Link> Subscription<L> {
    pub(crate) fn open(mut link: L, channel: &str) -> ClientResult<Self> {
        if let Err(err) = subscribe(&mut link, channel) {
            link.terminate();
            return Err(err);
        }
        debug!(channel, addr = link.addr(), "subscribed");
        Ok(Subscription {
            link: Some(link),
            channel: channel.to_string(),
        })
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Closes the dedicated connection.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(mut link) = self.link.take() {
            let _ = link.set_read_timeout(Some(DEFAULT_TIMEOUT));
            link.terminate();
        }
    }
}

fn subscribe<L: Link>(link: &mut L, channel: &str) -> ClientResult<()> {
    link.set_read_timeout(None)?;
    link.send(&[b"SUBSCRIBE", channel.as_bytes()])?;
    match link.recv()? {
        RespValue::Array(items) if items.first().and_then(RespValue::as_str) == Some("subscribe") => {
            Ok(())
        }
        RespValue::Error(message) => Err(ClientError::server(&message)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

impl<L: Link> Iterator for Subscription<L> {
    type Item = ClientResult<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let link = self.link.as_mut()?;
            match link.recv() {
                Ok(RespValue::Array(items)) => {
                    if let Some(message) = parse_message(items) {
                        return Some(Ok(message));
                    }
                }
                // Anything other than a push array is skipped.
                Ok(_) => {}
                Err(err) => {
                    self.shutdown();
                    return Some(Err(err));
                }
            }
        }
    }
}

impl<L: Link> FusedIterator for Subscription<L> {}

impl<L: Link> Drop for Subscription<L> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn parse_message(items: Vec<RespValue>) -> Option<Message> {
    let mut items = items.into_iter();
    if items.next()?.as_str()? != "message" {
        return None;
    }
    let channel = items.next()?.as_str()?.to_string();
    let payload = match items.next()? {
        RespValue::Bulk(Some(data)) | RespValue::Simple(data) => data,
        _ => return None,
    };
    Some(Message { channel, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> RespValue {
        RespValue::Bulk(Some(text.as_bytes().to_vec()))
    }

    #[test]
    fn parses_message_push() {
        let push = vec![bulk("message"), bulk("events"), bulk("{\"id\":7}")];
        let message = parse_message(push).unwrap();
        assert_eq!(message.channel, "events");
        let value: serde_json::Value = message.json().unwrap();
        assert_eq!(value["id"], 7);
    }

    #[test]
    fn ignores_other_pushes() {
        let confirm = vec![bulk("subscribe"), bulk("events"), RespValue::Integer(1)];
        assert!(parse_message(confirm).is_none());
        assert!(parse_message(vec![bulk("message")]).is_none());
    }
}
