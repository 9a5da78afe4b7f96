//! fkv-probe - report which roster endpoint is master and whether it answers
//!
//! Usage: `fkv-probe [config.toml]`. Without a path the `FKV_*` environment
//! variables (or defaults) are used.

use fkv_client::{CacheConfig, DialOptions, Dialer, Link, Role, TcpDialer};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = if let Some(config_path) = std::env::args().nth(1) {
        info!("Loading configuration from {}", config_path);
        CacheConfig::from_file(&config_path)?
    } else {
        info!("Using default configuration (set FKV_* env vars to customize)");
        CacheConfig::from_env()
    };

    let roster = config.roster()?;
    report_roster(roster.as_slice(), config.dial_options());

    if let Err(e) = fkv_client::init(&config) {
        error!("Cache initialization failed: {}", e);
        return Err(e.into());
    }

    let cache = fkv_client::global()?;
    cache.is_alive()?;
    info!(
        "Cache is alive, master = {}",
        cache.last_known_master().unwrap_or_default()
    );

    fkv_client::shutdown();
    Ok(())
}

/// Logs the role every roster entry reports, without touching the pool.
fn report_roster(roster: &[String], options: DialOptions) {
    let dialer = TcpDialer::new(options);
    for addr in roster {
        match dialer.dial(addr) {
            Ok(mut link) => {
                match fkv_client::probe_role(&mut link) {
                    Ok(Role::Master) => info!("{}: master", addr),
                    Ok(Role::Replica(Some(hint))) => info!("{}: {}", addr, hint),
                    Ok(role) => info!("{}: {:?}", addr, role),
                    Err(e) => warn!("{}: {}", addr, e),
                }
                link.terminate();
            }
            Err(e) => warn!("{}: unreachable ({})", addr, e),
        }
    }
}
