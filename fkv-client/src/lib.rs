//! # FailoverKV Client
//!
//! Purpose: Provide a synchronous cache client for a replicated
//! primary/replica RESP store whose writable endpoint can move between a
//! fixed set of nodes.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections to the current master.
//! 2. **Self-Healing Routing**: Connections are validated with `ROLE`; a
//!    demoted master triggers rediscovery through the roster.
//! 3. **Explicit Lifecycle**: The process-wide client is created by `init`
//!    and destroyed by `shutdown`, never implicitly.
//! 4. **Protocol Clarity**: RESP2 is encoded and parsed explicitly.
//!
//! ## Layers
//!
//! ```text
//! CacheClient ──> ConnectionPool ──> discover_master ──> Dialer/Link + probe_role
//! ```

mod client;
mod codec;
mod config;
mod connection;
mod discovery;
mod error;
#[cfg(test)]
mod fake;
mod global;
mod pool;
mod pubsub;
mod resp;
mod role;

pub use client::CacheClient;
pub use codec::{msgpack_decode, msgpack_encode, CacheValue, MsgPack};
pub use config::{CacheConfig, PoolSettings};
pub use connection::{Connection, DialOptions, Dialer, Link, TcpDialer, DEFAULT_TIMEOUT};
pub use discovery::{discover_master, Discovered, DiscoveryState, MasterDiscovery, Roster};
pub use error::{ClientError, ClientResult};
pub use global::{global, init, shutdown};
pub use pool::{ConnectionPool, MasterRecord, PoolConfig, PooledConnection};
pub use pubsub::{Message, Subscription};
pub use resp::RespValue;
pub use role::{parse_role, probe_role, ReplicationHint, Role};
