//! # Process-Wide Cache
//!
//! One shared `CacheClient` per process, created by an explicit `init` and
//! torn down by an explicit `shutdown`. Nothing is initialized on first use.

use parking_lot::{const_mutex, const_rwlock, Mutex, RwLock};
use tracing::info;

use crate::client::CacheClient;
use crate::config::CacheConfig;
use crate::error::{ClientError, ClientResult};

static CACHE: RwLock<Option<CacheClient>> = const_rwlock(None);
// Serializes `init` calls. Discovery runs under this gate, not under `CACHE`,
// so `global()` readers never wait on dial timeouts.
static INIT: Mutex<()> = const_mutex(());

/// Connects to the roster and installs the process-wide client.
///
/// Fails fast with `NoMasterAvailable` if discovery finds no master, and with
/// `AlreadyInitialized` if `init` already succeeded without a `shutdown`.
pub fn init(config: &CacheConfig) -> ClientResult<()> {
    let _gate = INIT.lock();
    if CACHE.read().is_some() {
        return Err(ClientError::AlreadyInitialized);
    }
    let client = CacheClient::connect(config)?;
    info!(
        master = client.last_known_master().as_deref().unwrap_or("none"),
        "cache initialized"
    );
    *CACHE.write() = Some(client);
    Ok(())
}

/// Returns a handle to the process-wide client.
pub fn global() -> ClientResult<CacheClient> {
    CACHE.read().clone().ok_or(ClientError::NotInitialized)
}

/// Removes the process-wide client and closes its pool.
///
/// Returns false when nothing was initialized.
pub fn shutdown() -> bool {
    let client = CACHE.write().take();
    match client {
        Some(client) => {
            client.shutdown();
            true
        }
        None => false,
    }
}
