use anyhow::{Context, Result};
use tracing::{error, info};

use lanwatch::config::AppConfig;
use lanwatch::db::{Database, Store};
use lanwatch::Engine;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (not required)
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| "lanwatch=info".into()),
        )
        .init();

    info!("Starting lanwatch v{}", env!("CARGO_PKG_VERSION"));

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await.context("Failed to run database migrations")?;
    info!("Database initialized");

    let store = Store::new(db, config.db_encryption_key.clone());

    if let Some(range) = &config.default_scan_range {
        if store.get_config("default_scan_range").await?.is_none() {
            store.set_config("default_scan_range", range, None).await?;
        }
    }

    let engine = Engine::new(store);
    engine.initialize().await.context("Failed to initialize monitoring engine")?;
    info!("Engine initialized and polling loop started");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received"),
        Err(e) => error!(error = %e, "Failed to listen for shutdown signal"),
    }

    engine.shutdown().await;
    info!("lanwatch stopped");
    Ok(())
}
