//! In-memory dialer for unit tests: endpoints answer `ROLE` according to a
//! role table that tests can flip at any time.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::connection::{Dialer, Link};
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;

#[derive(Debug, Clone)]
pub enum FakeRole {
    Master,
    /// Replica with an optional upstream (host, port).
    Replica(Option<(String, u16)>),
    /// Refuses connections.
    Down,
    /// Answers ROLE with something that is not a role reply.
    Garbage,
}

#[derive(Default)]
struct Shared {
    roles: Mutex<HashMap<String, FakeRole>>,
    dials: Mutex<HashMap<String, usize>>,
    round_trips: AtomicUsize,
    terminated: AtomicUsize,
    next_id: AtomicU64,
}

#[derive(Clone, Default)]
pub struct FakeDialer {
    shared: Arc<Shared>,
}

impl FakeDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_role(&self, addr: &str, role: FakeRole) {
        self.shared.roles.lock().insert(addr.to_string(), role);
    }

    pub fn dials(&self, addr: &str) -> usize {
        self.shared.dials.lock().get(addr).copied().unwrap_or(0)
    }

    pub fn round_trips(&self) -> usize {
        self.shared.round_trips.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.shared.terminated.load(Ordering::SeqCst)
    }

    pub fn reset_counters(&self) {
        self.shared.dials.lock().clear();
        self.shared.round_trips.store(0, Ordering::SeqCst);
        self.shared.terminated.store(0, Ordering::SeqCst);
    }

    fn role(&self, addr: &str) -> FakeRole {
        self.shared
            .roles
            .lock()
            .get(addr)
            .cloned()
            .unwrap_or(FakeRole::Down)
    }
}

impl Dialer for FakeDialer {
    type Link = FakeLink;

    fn dial(&self, addr: &str) -> ClientResult<FakeLink> {
        *self.shared.dials.lock().entry(addr.to_string()).or_insert(0) += 1;
        if matches!(self.role(addr), FakeRole::Down) {
            return Err(ClientError::Io(std::io::ErrorKind::ConnectionRefused.into()));
        }
        Ok(FakeLink {
            id: self.shared.next_id.fetch_add(1, Ordering::SeqCst),
            addr: addr.to_string(),
            dialer: self.clone(),
            pending: None,
            open: true,
        })
    }
}

pub struct FakeLink {
    id: u64,
    addr: String,
    dialer: FakeDialer,
    pending: Option<Vec<u8>>,
    open: bool,
}

impl FakeLink {
    /// Unique per dial.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Simulates the peer dropping the connection.
    pub fn break_link(&mut self) {
        self.open = false;
    }
}

impl Link for FakeLink {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn send(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        if !self.open {
            return Err(ClientError::Io(std::io::ErrorKind::NotConnected.into()));
        }
        self.dialer.shared.round_trips.fetch_add(1, Ordering::SeqCst);
        self.pending = args.first().map(|cmd| cmd.to_ascii_uppercase());
        Ok(())
    }

    fn recv(&mut self) -> ClientResult<RespValue> {
        let command = self.pending.take().ok_or(ClientError::Protocol)?;
        let role = self.dialer.role(&self.addr);
        if matches!(role, FakeRole::Down) {
            self.open = false;
            return Err(ClientError::Io(std::io::ErrorKind::ConnectionReset.into()));
        }
        let reply = match command.as_slice() {
            b"ROLE" => role_reply(&role),
            b"PING" => RespValue::Simple(b"PONG".to_vec()),
            b"SET" | b"DEL" | b"EXPIRE" if matches!(role, FakeRole::Replica(_)) => {
                RespValue::Error(b"READONLY You can't write against a read only replica.".to_vec())
            }
            _ => RespValue::Simple(b"OK".to_vec()),
        };
        Ok(reply)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_read_timeout(&mut self, _timeout: Option<Duration>) -> ClientResult<()> {
        Ok(())
    }

    fn terminate(&mut self) {
        if self.open {
            self.dialer.shared.terminated.fetch_add(1, Ordering::SeqCst);
            self.open = false;
        }
    }
}

fn role_reply(role: &FakeRole) -> RespValue {
    let bulk = |text: &str| RespValue::Bulk(Some(text.as_bytes().to_vec()));
    match role {
        FakeRole::Master => RespValue::Array(vec![
            bulk("master"),
            RespValue::Integer(0),
            RespValue::Array(Vec::new()),
        ]),
        FakeRole::Replica(upstream) => {
            let (host, port) = upstream.clone().unwrap_or_default();
            RespValue::Array(vec![
                bulk("slave"),
                bulk(&host),
                RespValue::Integer(i64::from(port)),
                bulk("connected"),
                RespValue::Integer(0),
            ])
        }
        FakeRole::Down | FakeRole::Garbage => RespValue::Simple(b"OK".to_vec()),
    }
}
