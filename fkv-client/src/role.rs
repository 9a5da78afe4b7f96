//! # Role Probe
//!
//! Ask an endpoint what it is (`ROLE`) and turn the reply into a master flag
//! plus an optional pointer to its upstream.

use std::fmt;

use crate::connection::Link;
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

// ROLE reply layouts:
//   master:  [role, replication offset, [replicas...]]
//   replica: [role, master host, master port, link state, offset]
const MASTER_FIELDS: usize = 3;
const REPLICA_FIELDS: usize = 5;

/// Upstream reported by a replica's role probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationHint {
    /// Role string the endpoint reported, e.g. "slave".
    pub role: String,
    pub host: String,
    pub port: u16,
}

impl ReplicationHint {
    /// `host:port` of the reported upstream.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ReplicationHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {}:{}", self.role, self.host, self.port)
    }
}

/// Classified ROLE reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Master,
    /// Replica, with its upstream when the reply carried a usable one.
    Replica(Option<ReplicationHint>),
    /// Anything else (sentinel, unknown roles).
    Other(String),
}

impl Role {
    pub fn is_master(&self) -> bool {
        matches!(self, Role::Master)
    }

    pub fn hint(&self) -> Option<&ReplicationHint> {
        match self {
            Role::Replica(hint) => hint.as_ref(),
            _ => None,
        }
    }
}

/// Issues `ROLE` on the link and classifies the reply.
///
/// Transport failures, server errors, and malformed or short replies are all
/// reported as `ClientError::RoleProbe`; callers treat them as "not master".
pub fn probe_role<L: Link>(link: &mut L) -> ClientResult<Role> {
    let reply = link
        .exec(&[b"ROLE"])
        .map_err(|err| ClientError::RoleProbe(format!("{}: {}", link.addr(), err)))?;
    parse_role(reply)
}

/// Classifies a raw ROLE reply.
pub fn parse_role(reply: RespValue) -> ClientResult<Role> {
    let fields = match reply {
        RespValue::Array(fields) => fields,
        RespValue::Error(message) => {
            return Err(ClientError::RoleProbe(
                String::from_utf8_lossy(&message).into_owned(),
            ))
        }
        other => return Err(ClientError::RoleProbe(format!("expected array, got {:?}", other))),
    };

    let role = fields
        .first()
        .and_then(RespValue::as_str)
        .ok_or_else(|| ClientError::RoleProbe("missing role field".to_string()))?
        .to_string();

    match role.as_str() {
        "master" => {
            if fields.len() < MASTER_FIELDS {
                return Err(short_reply(&role, fields.len(), MASTER_FIELDS));
            }
            Ok(Role::Master)
        }
        "slave" | "replica" => {
            if fields.len() < REPLICA_FIELDS {
                return Err(short_reply(&role, fields.len(), REPLICA_FIELDS));
            }
            let host = fields[1].as_str().unwrap_or_default().to_string();
            let port = fields[2]
                .as_integer()
                .filter(|port| (1..=i64::from(u16::MAX)).contains(port))
                .map(|port| port as u16);
            let hint = match port {
                Some(port) if !host.is_empty() => Some(ReplicationHint { role, host, port }),
                _ => None,
            };
            Ok(Role::Replica(hint))
        }
        _ => Ok(Role::Other(role)),
    }
}

fn short_reply(role: &str, got: usize, want: usize) -> ClientError {
    ClientError::RoleProbe(format!("{} reply has {} fields, expected {}", role, got, want))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(text: &str) -> RespValue {
        RespValue::Bulk(Some(text.as_bytes().to_vec()))
    }

    fn replica_reply(host: &str, port: i64) -> RespValue {
        RespValue::Array(vec![
            bulk("slave"),
            bulk(host),
            RespValue::Integer(port),
            bulk("connected"),
            RespValue::Integer(1024),
        ])
    }

    #[test]
    fn master_reply_is_master() {
        let reply = RespValue::Array(vec![
            bulk("master"),
            RespValue::Integer(3129659),
            RespValue::Array(Vec::new()),
        ]);
        assert_eq!(parse_role(reply).unwrap(), Role::Master);
    }

    #[test]
    fn replica_reply_carries_hint() {
        let role = parse_role(replica_reply("10.0.0.3", 6380)).unwrap();
        assert!(!role.is_master());
        let hint = role.hint().expect("hint");
        assert_eq!(hint.role, "slave");
        assert_eq!(hint.address(), "10.0.0.3:6380");
    }

    #[test]
    fn replica_with_bad_upstream_has_no_hint() {
        assert_eq!(parse_role(replica_reply("", 6380)).unwrap(), Role::Replica(None));
        assert_eq!(parse_role(replica_reply("10.0.0.3", 0)).unwrap(), Role::Replica(None));
        assert_eq!(parse_role(replica_reply("10.0.0.3", 70000)).unwrap(), Role::Replica(None));
    }

    #[test]
    fn short_replies_are_errors() {
        let reply = RespValue::Array(vec![bulk("master")]);
        assert!(matches!(parse_role(reply), Err(ClientError::RoleProbe(_))));

        let reply = RespValue::Array(vec![bulk("slave"), bulk("10.0.0.3")]);
        assert!(matches!(parse_role(reply), Err(ClientError::RoleProbe(_))));
    }

    #[test]
    fn non_array_replies_are_errors() {
        assert!(parse_role(RespValue::Simple(b"OK".to_vec())).is_err());
        assert!(parse_role(RespValue::Error(b"ERR unknown command 'ROLE'".to_vec())).is_err());
        assert!(parse_role(RespValue::Array(Vec::new())).is_err());
    }

    #[test]
    fn sentinel_is_not_master() {
        let reply = RespValue::Array(vec![bulk("sentinel"), RespValue::Array(Vec::new())]);
        assert_eq!(parse_role(reply).unwrap(), Role::Other("sentinel".to_string()));
    }
}
