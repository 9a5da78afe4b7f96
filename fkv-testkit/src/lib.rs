//! # Fake Replicated Store
//!
//! Purpose: Stand up a small primary/replica "cluster" of RESP2 endpoints on
//! loopback so client tests can exercise discovery, failover, expiry, and
//! pub/sub over real sockets.
//!
//! All nodes share one keyspace (perfect replication). Only the node whose
//! role is `Master` accepts writes; replicas answer `-READONLY`. Roles can be
//! flipped at any time to simulate failover, and a `Down` node drops every
//! connection it sees.
//!
//! Supported commands: AUTH, SELECT, PING, QUIT, ROLE, GET, SET, DEL, EXPIRE,
//! SCAN, PUBLISH, SUBSCRIBE.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Role a fake node reports and enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    /// Replica of the node with this index.
    Replica(usize),
    /// Refuses service: accepted sockets are closed immediately.
    Down,
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self) -> bool {
        self.expires_at.map_or(true, |at| Instant::now() < at)
    }
}

struct Shared {
    addrs: Vec<String>,
    roles: Mutex<Vec<NodeRole>>,
    probes: Vec<AtomicUsize>,
    password: Option<String>,
    store: Mutex<HashMap<Vec<u8>, Entry>>,
    subscribers: Mutex<HashMap<Vec<u8>, Vec<mpsc::Sender<Vec<u8>>>>>,
    // Open sockets per node, kept so tests can cut them from the outside.
    open: Mutex<Vec<(usize, TcpStream)>>,
}

/// Handle to a running fake cluster. Node threads live for the rest of the
/// test process.
#[derive(Clone)]
pub struct FakeCluster {
    shared: Arc<Shared>,
}

impl FakeCluster {
    /// Starts `nodes` endpoints; node 0 is master, the rest replicate it.
    pub fn start(nodes: usize) -> Self {
        Self::build(nodes, None)
    }

    /// Like `start`, but every connection must `AUTH` first.
    pub fn start_with_password(nodes: usize, password: &str) -> Self {
        Self::build(nodes, Some(password.to_string()))
    }

    fn build(nodes: usize, password: Option<String>) -> Self {
        assert!(nodes > 0, "cluster needs at least one node");
        let listeners: Vec<TcpListener> = (0..nodes)
            .map(|_| TcpListener::bind("127.0.0.1:0").expect("bind"))
            .collect();
        let addrs = listeners
            .iter()
            .map(|listener| listener.local_addr().expect("addr").to_string())
            .collect();

        let mut roles = vec![NodeRole::Replica(0); nodes];
        roles[0] = NodeRole::Master;

        let shared = Arc::new(Shared {
            addrs,
            roles: Mutex::new(roles),
            probes: (0..nodes).map(|_| AtomicUsize::new(0)).collect(),
            password,
            store: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            open: Mutex::new(Vec::new()),
        });

        for (idx, listener) in listeners.into_iter().enumerate() {
            let shared = shared.clone();
            thread::spawn(move || accept_loop(shared, idx, listener));
        }

        FakeCluster { shared }
    }

    pub fn addr(&self, idx: usize) -> String {
        self.shared.addrs[idx].clone()
    }

    pub fn addrs(&self) -> Vec<String> {
        self.shared.addrs.clone()
    }

    pub fn role(&self, idx: usize) -> NodeRole {
        self.shared.roles.lock()[idx]
    }

    pub fn set_role(&self, idx: usize, role: NodeRole) {
        self.shared.roles.lock()[idx] = role;
    }

    /// Makes `idx` master and every other live node its replica.
    pub fn promote(&self, idx: usize) {
        let mut roles = self.shared.roles.lock();
        for (node, role) in roles.iter_mut().enumerate() {
            if node == idx {
                *role = NodeRole::Master;
            } else if *role != NodeRole::Down {
                *role = NodeRole::Replica(idx);
            }
        }
    }

    /// Takes a node down; its open connections are dropped on their next command.
    pub fn stop(&self, idx: usize) {
        self.set_role(idx, NodeRole::Down);
    }

    /// Cuts every open connection to node `idx` at once, including blocked
    /// subscribers. The node keeps its role and accepts new connections.
    pub fn sever(&self, idx: usize) {
        let mut open = self.shared.open.lock();
        open.retain(|(node, stream)| {
            if *node == idx {
                let _ = stream.shutdown(Shutdown::Both);
                false
            } else {
                true
            }
        });
    }

    /// Number of `ROLE` commands node `idx` has answered.
    pub fn role_probes(&self, idx: usize) -> usize {
        self.shared.probes[idx].load(Ordering::SeqCst)
    }

    pub fn reset_probes(&self) {
        for probes in &self.shared.probes {
            probes.store(0, Ordering::SeqCst);
        }
    }

    /// Number of live keys in the shared keyspace.
    pub fn key_count(&self) -> usize {
        self.shared
            .store
            .lock()
            .values()
            .filter(|entry| entry.is_live())
            .count()
    }
}

fn accept_loop(shared: Arc<Shared>, idx: usize, listener: TcpListener) {
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(_) => continue,
        };
        if shared.roles.lock()[idx] == NodeRole::Down {
            drop(stream);
            continue;
        }
        let shared = shared.clone();
        thread::spawn(move || {
            let _ = serve(shared, idx, stream);
        });
    }
}

/// RESP reply frame.
enum Frame {
    Simple(&'static str),
    Error(String),
    Integer(i64),
    Bulk(Option<Vec<u8>>),
    Array(Vec<Frame>),
}

impl Frame {
    fn text(text: &str) -> Frame {
        Frame::Bulk(Some(text.as_bytes().to_vec()))
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Frame::Simple(text) => {
                out.push(b'+');
                out.extend_from_slice(text.as_bytes());
            }
            Frame::Error(text) => {
                out.push(b'-');
                out.extend_from_slice(text.as_bytes());
            }
            Frame::Integer(value) => {
                out.push(b':');
                out.extend_from_slice(value.to_string().as_bytes());
            }
            Frame::Bulk(None) => out.extend_from_slice(b"$-1"),
            Frame::Bulk(Some(data)) => {
                out.push(b'$');
                out.extend_from_slice(data.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(data);
            }
            Frame::Array(items) => {
                out.push(b'*');
                out.extend_from_slice(items.len().to_string().as_bytes());
                out.extend_from_slice(b"\r\n");
                for item in items {
                    item.encode(out);
                }
                return;
            }
        }
        out.extend_from_slice(b"\r\n");
    }
}

type Writer = Arc<Mutex<TcpStream>>;

fn write_frame(writer: &Writer, frame: &Frame) -> std::io::Result<()> {
    let mut out = Vec::new();
    frame.encode(&mut out);
    let mut stream = writer.lock();
    stream.write_all(&out)?;
    stream.flush()
}

fn serve(shared: Arc<Shared>, idx: usize, stream: TcpStream) -> std::io::Result<()> {
    let writer: Writer = Arc::new(Mutex::new(stream.try_clone()?));
    shared.open.lock().push((idx, stream.try_clone()?));
    let mut reader = BufReader::new(stream);
    let mut authed = shared.password.is_none();

    loop {
        let args = match read_command(&mut reader)? {
            Some(args) if !args.is_empty() => args,
            Some(_) => continue,
            None => return Ok(()),
        };
        let role = shared.roles.lock()[idx];
        if role == NodeRole::Down {
            return Ok(());
        }

        let command = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();
        if !authed && command != "AUTH" && command != "QUIT" {
            write_frame(&writer, &Frame::Error("NOAUTH Authentication required.".to_string()))?;
            continue;
        }

        let reply = match command.as_str() {
            "AUTH" => {
                let ok = args.get(1).map(|pw| pw.as_slice()) == shared.password.as_deref().map(str::as_bytes);
                authed = ok;
                if ok {
                    Frame::Simple("OK")
                } else {
                    Frame::Error("WRONGPASS invalid username-password pair".to_string())
                }
            }
            "SELECT" | "PING" if args.len() > 2 => wrong_args(&command),
            "SELECT" => Frame::Simple("OK"),
            "PING" => Frame::Simple("PONG"),
            "QUIT" => {
                write_frame(&writer, &Frame::Simple("OK"))?;
                return Ok(());
            }
            "ROLE" => {
                shared.probes[idx].fetch_add(1, Ordering::SeqCst);
                role_frame(&shared, role)
            }
            "SUBSCRIBE" => match args.get(1) {
                Some(channel) => {
                    subscribe(&shared, &writer, channel.clone())?;
                    continue;
                }
                None => wrong_args(&command),
            },
            "PUBLISH" => match (args.get(1), args.get(2)) {
                (Some(channel), Some(payload)) => publish(&shared, channel, payload),
                _ => wrong_args(&command),
            },
            _ => data_command(&shared, role, &command, &args),
        };
        write_frame(&writer, &reply)?;
    }
}

fn data_command(shared: &Shared, role: NodeRole, command: &str, args: &[Vec<u8>]) -> Frame {
    let is_write = matches!(command, "SET" | "DEL" | "EXPIRE");
    if is_write && role != NodeRole::Master {
        return Frame::Error("READONLY You can't write against a read only replica.".to_string());
    }

    let mut store = shared.store.lock();
    store.retain(|_, entry| entry.is_live());

    match (command, args) {
        ("GET", [_, key]) => Frame::Bulk(store.get(key).map(|entry| entry.value.clone())),
        ("SET", [_, key, value]) => {
            store.insert(
                key.clone(),
                Entry {
                    value: value.clone(),
                    expires_at: None,
                },
            );
            Frame::Simple("OK")
        }
        ("DEL", [_, key]) => Frame::Integer(i64::from(store.remove(key).is_some())),
        ("EXPIRE", [_, key, seconds]) => {
            let seconds: i64 = match std::str::from_utf8(seconds).ok().and_then(|s| s.parse().ok()) {
                Some(seconds) => seconds,
                None => return Frame::Error("ERR value is not an integer or out of range".to_string()),
            };
            if !store.contains_key(key) {
                return Frame::Integer(0);
            }
            if seconds <= 0 {
                store.remove(key);
            } else if let Some(entry) = store.get_mut(key) {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds as u64));
            }
            Frame::Integer(1)
        }
        ("SCAN", [_, _cursor, rest @ ..]) => {
            let pattern = rest
                .windows(2)
                .find(|pair| pair[0].eq_ignore_ascii_case(b"MATCH"))
                .map(|pair| pair[1].clone())
                .unwrap_or_else(|| b"*".to_vec());
            let keys = store
                .keys()
                .filter(|key| glob_match(&pattern, key))
                .map(|key| Frame::Bulk(Some(key.clone())))
                .collect();
            Frame::Array(vec![Frame::text("0"), Frame::Array(keys)])
        }
        ("GET" | "SET" | "DEL" | "EXPIRE" | "SCAN", _) => wrong_args(command),
        _ => Frame::Error(format!("ERR unknown command '{}'", command)),
    }
}

fn role_frame(shared: &Shared, role: NodeRole) -> Frame {
    match role {
        NodeRole::Master => Frame::Array(vec![
            Frame::text("master"),
            Frame::Integer(0),
            Frame::Array(Vec::new()),
        ]),
        NodeRole::Replica(upstream) => {
            let (host, port) = shared.addrs[upstream]
                .rsplit_once(':')
                .expect("loopback address has a port");
            Frame::Array(vec![
                Frame::text("slave"),
                Frame::text(host),
                Frame::Integer(port.parse().expect("numeric port")),
                Frame::text("connected"),
                Frame::Integer(0),
            ])
        }
        NodeRole::Down => Frame::Error("ERR node is down".to_string()),
    }
}

fn subscribe(shared: &Shared, writer: &Writer, channel: Vec<u8>) -> std::io::Result<()> {
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    shared
        .subscribers
        .lock()
        .entry(channel.clone())
        .or_default()
        .push(tx);

    write_frame(
        writer,
        &Frame::Array(vec![
            Frame::text("subscribe"),
            Frame::Bulk(Some(channel.clone())),
            Frame::Integer(1),
        ]),
    )?;

    let writer = writer.clone();
    thread::spawn(move || {
        for payload in rx {
            let push = Frame::Array(vec![
                Frame::text("message"),
                Frame::Bulk(Some(channel.clone())),
                Frame::Bulk(Some(payload)),
            ]);
            if write_frame(&writer, &push).is_err() {
                break;
            }
        }
    });
    Ok(())
}

fn publish(shared: &Shared, channel: &[u8], payload: &[u8]) -> Frame {
    let mut subscribers = shared.subscribers.lock();
    let delivered = match subscribers.get_mut(channel) {
        Some(senders) => {
            senders.retain(|tx| tx.send(payload.to_vec()).is_ok());
            senders.len()
        }
        None => 0,
    };
    Frame::Integer(delivered as i64)
}

fn wrong_args(command: &str) -> Frame {
    Frame::Error(format!(
        "ERR wrong number of arguments for '{}' command",
        command.to_ascii_lowercase()
    ))
}

/// Glob matcher supporting `*` and `?`.
fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Option<Vec<Vec<u8>>>> {
    let mut line = Vec::new();
    if read_line(reader, &mut line)?.is_none() {
        return Ok(None);
    }
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?.ok_or_else(|| invalid("eof"))?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len];
        reader.read_exact(&mut data)?;
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
        if crlf != [b'\r', b'\n'] {
            return Err(invalid("missing crlf"));
        }
        args.push(data);
    }
    Ok(Some(args))
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<Option<()>> {
    buf.clear();
    let bytes = reader.read_until(b'\n', buf)?;
    if bytes == 0 {
        return Ok(None);
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(Some(()))
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn invalid(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.to_string())
}
