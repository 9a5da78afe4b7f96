//! # Connection Pool
//!
//! Purpose: Reuse connections to the current master and route new ones
//! through master discovery, so callers never hold a link to a replica.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the idle mutex only while moving connections;
//!    probes and `QUIT` happen outside it.
//! 3. **Validate on Borrow**: A connection not probed within the cooldown is
//!    probed again before it is handed out.
//! 4. **Lock-Free Reads**: The last known master lives in an `ArcSwapOption`;
//!    discovery itself is single-writer.
//! 5. **Fail Fast**: Discovery exhaustion surfaces as `NoMasterAvailable`
//!    instead of retrying inline.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::connection::{Dialer, Link, TcpDialer};
use crate::discovery::{discover_master, Discovered, Roster};
use crate::error::{ClientError, ClientResult};
use crate::resp::RespValue;
use crate::role::{probe_role, ReplicationHint, Role};

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle connections to keep.
    pub max_idle: usize,
    /// Idle connections older than this are closed instead of reused.
    pub idle_timeout: Duration,
    /// Connections validated within this window are reused without a probe.
    pub validation_cooldown: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_idle: 64,
            idle_timeout: Duration::from_secs(300),
            validation_cooldown: Duration::from_secs(5),
        }
    }
}

/// The address last seen reporting master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MasterRecord {
    pub addr: String,
    /// Replication hint observed during the discovery that found `addr`.
    pub hint: Option<ReplicationHint>,
}

struct IdleLink<L> {
    link: L,
    validated_at: Instant,
    returned_at: Instant,
}

struct IdleState<L> {
    links: VecDeque<IdleLink<L>>,
    closed: bool,
}

struct PoolInner<D: Dialer> {
    dialer: D,
    roster: Roster,
    config: PoolConfig,
    idle: Mutex<IdleState<D::Link>>,
    master: ArcSwapOption<MasterRecord>,
    // Serializes discovery passes; readers of `master` never take it.
    discovery: Mutex<()>,
    closed: AtomicBool,
}

/// Connection pool handle.
pub struct ConnectionPool<D: Dialer = TcpDialer> {
    inner: Arc<PoolInner<D>>,
}

impl<D: Dialer> Clone for ConnectionPool<D> {
    fn clone(&self) -> Self {
        ConnectionPool {
            inner: self.inner.clone(),
        }
    }
}

impl<D: Dialer> ConnectionPool<D> {
    /// Creates an empty pool. No connection is dialed until `bootstrap` or
    /// the first `acquire`.
    pub fn new(dialer: D, roster: Roster, config: PoolConfig) -> Self {
        let state = IdleState {
            links: VecDeque::with_capacity(config.max_idle),
            closed: false,
        };
        ConnectionPool {
            inner: Arc::new(PoolInner {
                dialer,
                roster,
                config,
                idle: Mutex::new(state),
                master: ArcSwapOption::empty(),
                discovery: Mutex::new(()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Runs a full discovery pass and parks the resulting connection.
    ///
    /// Returns the master address.
    pub fn bootstrap(&self) -> ClientResult<String> {
        let found = self.discover(None)?;
        let addr = found.addr;
        self.return_connection(found.link, Instant::now());
        Ok(addr)
    }

    /// Acquires a connection to the current master.
    pub fn acquire(&self) -> ClientResult<PooledConnection<D>> {
        if self.is_closed() {
            return Err(ClientError::PoolClosed);
        }

        let mut fresh_hint = None;
        while let Some(entry) = self.pop_idle() {
            let IdleLink {
                mut link,
                validated_at,
                returned_at,
            } = entry;

            if returned_at.elapsed() > self.inner.config.idle_timeout || !link.is_open() {
                trace!(addr = link.addr(), "dropping stale idle connection");
                link.terminate();
                continue;
            }

            if validated_at.elapsed() < self.inner.config.validation_cooldown {
                return Ok(PooledConnection::new(self.clone(), link, validated_at));
            }

            match probe_role(&mut link) {
                Ok(Role::Master) => {
                    return Ok(PooledConnection::new(self.clone(), link, Instant::now()));
                }
                Ok(role) => {
                    debug!(addr = link.addr(), ?role, "pooled connection is no longer master");
                    fresh_hint = role.hint().cloned();
                }
                Err(err) => {
                    debug!(addr = link.addr(), error = %err, "pooled connection failed validation");
                }
            }
            link.terminate();
            break;
        }

        let found = self.discover(fresh_hint)?;
        Ok(PooledConnection::new(self.clone(), found.link, Instant::now()))
    }

    /// Dials a discovery-backed connection that never joins the idle set.
    pub fn dedicated(&self) -> ClientResult<D::Link> {
        if self.is_closed() {
            return Err(ClientError::PoolClosed);
        }
        self.discover(None).map(|found| found.link)
    }

    /// Lock-free view of the last known master.
    pub fn last_known_master(&self) -> Option<Arc<MasterRecord>> {
        self.inner.master.load_full()
    }

    pub fn roster(&self) -> &Roster {
        &self.inner.roster
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Number of idle connections currently parked.
    pub fn idle_len(&self) -> usize {
        self.inner.idle.lock().links.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes every idle connection and rejects further borrows.
    ///
    /// Connections still borrowed are closed when they are released.
    pub fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut idle = self.inner.idle.lock();
            idle.closed = true;
            self.inner.closed.store(true, Ordering::Release);
            idle.links.drain(..).collect()
        };
        for mut entry in drained {
            entry.link.terminate();
        }
        info!("connection pool shut down");
    }

    fn pop_idle(&self) -> Option<IdleLink<D::Link>> {
        // Most recently returned first; the oldest stay at the front for eviction.
        self.inner.idle.lock().links.pop_back()
    }

    fn discover(&self, fresh_hint: Option<ReplicationHint>) -> ClientResult<Discovered<D::Link>> {
        let _gate = self.inner.discovery.lock();
        if self.is_closed() {
            return Err(ClientError::PoolClosed);
        }

        let previous = self.inner.master.load_full();
        let last_known = previous.as_ref().map(|record| record.addr.as_str());
        let hint = fresh_hint.or_else(|| previous.as_ref().and_then(|record| record.hint.clone()));

        let found = match discover_master(
            &self.inner.dialer,
            self.inner.roster.as_slice(),
            last_known,
            hint.as_ref(),
        ) {
            Some(found) => found,
            None => {
                warn!(
                    candidates = self.inner.roster.len(),
                    "master discovery exhausted the roster"
                );
                return Err(ClientError::NoMasterAvailable);
            }
        };

        let changed = last_known != Some(found.addr.as_str());
        self.inner.master.store(Some(Arc::new(MasterRecord {
            addr: found.addr.clone(),
            hint: found.hint.clone(),
        })));

        if changed {
            info!(
                master = %found.addr,
                previous = last_known.unwrap_or("none"),
                "master changed"
            );
            self.purge_other_than(&found.addr);
        }
        Ok(found)
    }

    fn purge_other_than(&self, master: &str) {
        let stale: Vec<_> = {
            let mut idle = self.inner.idle.lock();
            let (keep, stale) = idle
                .links
                .drain(..)
                .partition::<VecDeque<_>, _>(|entry| entry.link.addr() == master);
            idle.links = keep;
            stale.into_iter().collect()
        };
        for mut entry in stale {
            entry.link.terminate();
        }
    }

    fn return_connection(&self, mut link: D::Link, validated_at: Instant) {
        let config = &self.inner.config;
        if !link.is_open() || config.max_idle == 0 || validated_at.elapsed() > config.idle_timeout {
            link.terminate();
            return;
        }

        let is_master = self
            .inner
            .master
            .load_full()
            .map(|record| record.addr == link.addr())
            .unwrap_or(false);
        if !is_master {
            link.terminate();
            return;
        }

        let rejected = {
            let mut idle = self.inner.idle.lock();
            if idle.closed {
                Some(link)
            } else {
                let evicted = if idle.links.len() >= config.max_idle {
                    idle.links.pop_front().map(|entry| entry.link)
                } else {
                    None
                };
                idle.links.push_back(IdleLink {
                    link,
                    validated_at,
                    returned_at: Instant::now(),
                });
                evicted
            }
        };
        if let Some(mut link) = rejected {
            link.terminate();
        }
    }
}

/// RAII wrapper returning a connection to the pool on drop.
pub struct PooledConnection<D: Dialer = TcpDialer> {
    pool: ConnectionPool<D>,
    link: Option<D::Link>,
    validated_at: Instant,
    valid: bool,
}

impl<D: Dialer> PooledConnection<D> {
    fn new(pool: ConnectionPool<D>, link: D::Link, validated_at: Instant) -> Self {
        PooledConnection {
            pool,
            link: Some(link),
            validated_at,
            valid: true,
        }
    }

    /// Address of the master this connection points at.
    pub fn addr(&self) -> &str {
        self.link.as_ref().map(Link::addr).unwrap_or_default()
    }

    /// Executes a RESP command and returns the parsed response.
    pub fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let link = self.link.as_mut().ok_or(ClientError::PoolClosed)?;
        let response = link.exec(args);
        match &response {
            // If IO/protocol fails, do not return this connection to the pool.
            Err(_) => self.valid = false,
            // e.g. READONLY: the endpoint was demoted under us.
            Ok(RespValue::Error(message)) if ClientError::server(message).is_connection_fatal() => {
                self.valid = false
            }
            Ok(_) => {}
        }
        response
    }

    #[cfg(test)]
    fn link(&self) -> &D::Link {
        self.link.as_ref().expect("link present")
    }
}

impl<D: Dialer> Drop for PooledConnection<D> {
    fn drop(&mut self) {
        let mut link = match self.link.take() {
            Some(link) => link,
            None => return,
        };

        if self.valid {
            self.pool.return_connection(link, self.validated_at);
        } else {
            link.terminate();
        }
    }
}
