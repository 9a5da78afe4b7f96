//! # Store Connections
//!
//! Purpose: Own one RESP link to one endpoint and hide how that link was
//! established, so discovery and pooling can run against fake links in tests.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: `Dialer` produces `Link`s; the TCP dialer is the
//!    production strategy.
//! 2. **Fail Fast**: Short connect and IO timeouts reject dead candidates
//!    quickly instead of stalling discovery.
//! 3. **Explicit Teardown**: Links are terminated with `QUIT` rather than
//!    left for the allocator to close.
//! 4. **Buffer Reuse**: Each connection keeps its own read/write buffers.

use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::BytesMut;
use tracing::debug;

use crate::error::{ClientError, ClientResult};
use crate::resp::{encode_command, read_response, RespValue};

/// Default connect and IO timeout for store endpoints.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// A command-capable link to a single endpoint.
///
/// A link is owned by exactly one caller at a time; it is moved, never shared.
pub trait Link: Send + 'static {
    /// Endpoint address this link was dialed to.
    fn addr(&self) -> &str;

    /// Writes one command without waiting for its reply.
    fn send(&mut self, args: &[&[u8]]) -> ClientResult<()>;

    /// Reads the next reply or push message.
    fn recv(&mut self) -> ClientResult<RespValue>;

    /// Issues one command and reads its reply.
    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.send(args)?;
        self.recv()
    }

    /// False once the link hit a transport error or was terminated.
    fn is_open(&self) -> bool;

    /// Changes the read timeout; `None` blocks indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ClientResult<()>;

    /// Sends `QUIT` and closes the link. Safe to call more than once.
    fn terminate(&mut self);
}

/// Creates links to endpoints by address.
pub trait Dialer: Send + Sync + 'static {
    type Link: Link;

    /// Connects and authenticates a new link to `addr`.
    fn dial(&self, addr: &str) -> ClientResult<Self::Link>;
}

/// Credentials, database index, and timeouts used for every dial.
#[derive(Debug, Clone)]
pub struct DialOptions {
    /// Optional `AUTH` password.
    pub password: Option<String>,
    /// Database index passed to `SELECT`.
    pub db: u32,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// TCP read and write timeout for request/response commands.
    pub io_timeout: Duration,
}

impl Default for DialOptions {
    fn default() -> Self {
        DialOptions {
            password: None,
            db: 0,
            connect_timeout: DEFAULT_TIMEOUT,
            io_timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Production dialer over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpDialer {
    options: DialOptions,
}

impl TcpDialer {
    pub fn new(options: DialOptions) -> Self {
        TcpDialer { options }
    }

    pub fn options(&self) -> &DialOptions {
        &self.options
    }
}

impl Dialer for TcpDialer {
    type Link = Connection;

    fn dial(&self, addr: &str) -> ClientResult<Connection> {
        let mut conn = Connection::connect(addr, &self.options)?;
        if let Err(err) = conn.handshake(&self.options) {
            debug!(addr, error = %err, "handshake rejected");
            conn.terminate();
            return Err(err);
        }
        Ok(conn)
    }
}

/// Single TCP connection with reusable buffers.
pub struct Connection {
    addr: String,
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: BytesMut,
    open: bool,
}

impl Connection {
    fn connect(addr: &str, options: &DialOptions) -> ClientResult<Self> {
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|_| ClientError::InvalidAddress(addr.to_string()))?
            .next()
            .ok_or_else(|| ClientError::InvalidAddress(addr.to_string()))?;

        let stream = match non_zero(options.connect_timeout) {
            Some(timeout) => TcpStream::connect_timeout(&socket_addr, timeout)?,
            None => TcpStream::connect(socket_addr)?,
        };
        stream.set_read_timeout(non_zero(options.io_timeout))?;
        stream.set_write_timeout(non_zero(options.io_timeout))?;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Connection {
            addr: addr.to_string(),
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: BytesMut::with_capacity(256),
            open: true,
        })
    }

    fn handshake(&mut self, options: &DialOptions) -> ClientResult<()> {
        if let Some(password) = options.password.as_deref().filter(|p| !p.is_empty()) {
            expect_ok(self.exec(&[b"AUTH", password.as_bytes()])?)?;
        }
        let db = options.db.to_string();
        expect_ok(self.exec(&[b"SELECT", db.as_bytes()])?)
    }

    fn mark_closed<T>(&mut self, result: ClientResult<T>) -> ClientResult<T> {
        if result.is_err() {
            self.open = false;
        }
        result
    }
}

impl Link for Connection {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn send(&mut self, args: &[&[u8]]) -> ClientResult<()> {
        if !self.open {
            return Err(ClientError::Io(std::io::ErrorKind::NotConnected.into()));
        }
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);

        let stream = self.reader.get_mut();
        let result = stream
            .write_all(&self.write_buf)
            .and_then(|_| stream.flush())
            .map_err(ClientError::from);
        self.mark_closed(result)
    }

    fn recv(&mut self) -> ClientResult<RespValue> {
        let result = read_response(&mut self.reader, &mut self.line_buf);
        self.mark_closed(result)
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> ClientResult<()> {
        self.reader
            .get_ref()
            .set_read_timeout(timeout.and_then(non_zero))?;
        Ok(())
    }

    fn terminate(&mut self) {
        if !self.open {
            return;
        }
        if self.send(&[b"QUIT"]).is_ok() {
            let _ = self.recv();
        }
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
        self.open = false;
    }
}

fn expect_ok(reply: RespValue) -> ClientResult<()> {
    match reply {
        reply if reply.is_ok() => Ok(()),
        RespValue::Error(message) => Err(ClientError::server(&message)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

// std rejects zero timeouts; treat zero as "no timeout".
fn non_zero(timeout: Duration) -> Option<Duration> {
    if timeout.is_zero() {
        None
    } else {
        Some(timeout)
    }
}
