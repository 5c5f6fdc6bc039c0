mod config;
mod logging;
mod probe;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{info, warn};

use crate::config::{Cli, Config};
use crate::probe::{HttpProber, Scheduler, SweepConfig};
use crate::store::{RedisStore, StatusStore};

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = Config::resolve(&cli).context("configuration rejected")?;
    info!("watchpost sentinel starting");
    for line in config.to_string().lines() {
        info!("{line}");
    }

    let store: Arc<dyn StatusStore> = Arc::new(connect_store(&config).await?);
    let prober = Arc::new(
        HttpProber::new(config.request_timeout).context("failed to build the HTTP client")?,
    );
    let scheduler = Scheduler::new(
        store,
        prober,
        SweepConfig {
            interval: config.check_interval,
            max_in_flight: config.max_in_flight,
            shutdown_grace: config.shutdown_grace,
        },
    );

    if config.once {
        scheduler.run_once().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    scheduler.run(shutdown_rx).await;
    info!("sentinel stopped");
    Ok(())
}

/// Dial the store with bounded retries; an unreachable store at startup is a
/// configuration error and must fail fast so the supervisor can restart us.
async fn connect_store(config: &Config) -> Result<RedisStore> {
    let url = config.store_url();
    for attempt in 1..=CONNECT_ATTEMPTS {
        match RedisStore::connect(&url).await {
            Ok(store) => match store.ping().await {
                Ok(()) => {
                    info!(endpoint = %url, "connected to store");
                    return Ok(store);
                }
                Err(error) => warn!(attempt, %error, "store ping failed"),
            },
            Err(error) => warn!(attempt, %error, "store connection failed"),
        }
        if attempt < CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_RETRY_DELAY).await;
        }
    }
    bail!("store at {url} unreachable after {CONNECT_ATTEMPTS} attempts");
}
