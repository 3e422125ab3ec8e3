mod api;
mod collector;
mod config;
mod detector;
mod error;
mod notifier;
mod scheduler;
mod store;
mod types;
mod upstream;
mod walker;

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::routes::{router, ApiState};
use crate::collector::Collector;
use crate::config::Config;
use crate::detector::Detector;
use crate::error::Result;
use crate::notifier::LoggingNotifier;
use crate::scheduler::Scheduler;
use crate::store::Store;
use crate::upstream::VenueClient;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&cfg.log_level)).init();

    if let Err(e) = run(cfg).await {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let store = Store::connect(&cfg.db_path).await?;
    info!(db_path = %cfg.db_path, "database ready");

    let client: Arc<dyn upstream::UpstreamClient> = Arc::new(VenueClient::new(cfg.venue_api_url.clone()));
    let notifier: Arc<dyn notifier::Notifier> = Arc::new(LoggingNotifier);
    let health = Arc::new(HealthState::new());

    let detector = Detector::new(store.clone(), cfg.clone(), Arc::clone(&notifier));
    let collector = Arc::new(Collector::new(
        Arc::clone(&client),
        store.clone(),
        cfg.clone(),
        detector,
        Arc::clone(&health),
    ));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&client),
        store.clone(),
        cfg.clone(),
        Arc::clone(&collector),
        Arc::clone(&health),
    ));

    info!("running startup sequence: catalog refresh then one immediate tick poll");
    scheduler.bootstrap().await?;

    tokio::spawn(Arc::clone(&scheduler).run_catalog_refresh_loop());
    tokio::spawn(Arc::clone(&scheduler).run_tick_poll_loop());
    tokio::spawn(Arc::clone(&scheduler).run_heartbeat_loop());

    let api_state = ApiState { store, health };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
