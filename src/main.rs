use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tracing::info;

use zapret_check::config::Config;
use zapret_check::fetch::RegistryClient;
use zapret_check::service::Checker;
use zapret_check::storage::MemoryStore;
use zapret_check::updater::Scheduler;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config before logging init to get the level.
    let config_path = std::env::args().nth(1).unwrap_or("config.toml".to_string());
    let config = if std::path::Path::new(&config_path).exists() {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    info!("Starting zapret-check...");
    if !std::path::Path::new(&config_path).exists() {
        info!("Config file not found, using defaults.");
    }

    // Index and lookup facade. The index starts empty and reports every URL
    // as not blocked until the first update lands.
    let store = Arc::new(MemoryStore::with_max_registry_size(
        config.storage.max_registry_size,
    ));
    let checker = Checker::new(store.clone());

    // Registry client over the configured sources, preference-ordered.
    let client = Arc::new(RegistryClient::new(
        config.build_sources(),
        config.client_timeout(),
    )?);

    // Periodic updater; performs the initial fetch immediately.
    let scheduler = Scheduler::new(client, store, config.scheduler_config());
    scheduler.start()?;

    signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    scheduler.stop().await?;

    let stats = checker.stats();
    info!(
        entries = stats.total_entries,
        last_update = %stats.last_update,
        "Final index state"
    );

    Ok(())
}
