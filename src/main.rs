use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod enrich;
mod feed;
mod gtfs_types;
mod hub;
mod ingest;
mod realtime;
mod server;
mod state;
mod static_data;
#[cfg(test)]
mod test_support;

use config::Config;
use hub::{Hub, LogObserver};
use ingest::Ingestor;
use realtime::RealtimeFetcher;
use state::AppState;
use static_data::IndexStore;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // 1. Configuration
    let config = Config::from_env()?;
    info!(?config, "Loaded configuration");

    // 2. Static GTFS ingestion (blocks until every table has finished)
    let store = Arc::new(IndexStore::new());
    let ingestor = Arc::new(Ingestor::new(
        config.data_dir.clone(),
        config.numeric_policy,
        store.clone(),
    ));
    let failed = ingestor.run().await;
    if !failed.is_empty() {
        warn!(?failed, "Serving without some static tables");
    }
    let indexed = ingestor.store();
    info!(
        routes = indexed.routes().len(),
        trips = indexed.trips().len(),
        stops = indexed.stops().len(),
        shape_points = indexed.shapes().len(),
        stop_times = indexed.stop_times().len(),
        "GTFS indices ready"
    );

    // 3. Background refresh
    if let Some(interval) = config.refresh_interval {
        ingestor.clone().spawn_refresh(interval);
    }

    // 4. Broadcast hub
    let hub = Hub::start(Arc::new(LogObserver));

    // 5. HTTP server
    let state = Arc::new(AppState::new(
        store,
        RealtimeFetcher::new(config.feeds.clone()),
        hub,
    ));

    info!("Server running at http://localhost:{}", config.port);
    warp::serve(server::routes(state))
        .run(([0, 0, 0, 0], config.port))
        .await;

    Ok(())
}
