// =============================================================================
// Aurora Signal Engine — Main Entry Point
// =============================================================================
//
// Stateless real-time strategy engine: consumes normalised exchange events
// from the bus, runs the microstructure strategies, and publishes typed
// trading signals. Horizontal scaling comes from the queue group; pods
// share nothing.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod breaker;
mod bus;
mod config;
mod market;
mod metrics;
mod router;
mod settings;
mod signals;
mod strategies;
mod types;

use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::doc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::bus::{NatsSink, Publisher};
use crate::config::store::{ConfigStore, MemoryConfigStore, MongoConfigStore};
use crate::config::ConfigManager;
use crate::market::DepthAnalyzer;
use crate::metrics::EngineMetrics;
use crate::router::Router;
use crate::settings::Settings;
use crate::signals::SignalAdapter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & settings ────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Aurora Signal Engine — Starting Up               ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let settings = Settings::from_env()?;

    // ── 2. Document store ────────────────────────────────────────────────
    let store: Arc<dyn ConfigStore> = if settings.mongo_uri.is_empty() {
        warn!("MONGO_URI not set — strategy config writes stay process-local");
        Arc::new(MemoryConfigStore::new())
    } else {
        match connect_mongo(&settings).await {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "document store unreachable — falling back to env/defaults");
                Arc::new(MemoryConfigStore::new())
            }
        }
    };

    let config = Arc::new(ConfigManager::new(
        store,
        settings.config_cache_ttl,
        settings.io_deadline,
    ));

    // ── 3. Bus connection ────────────────────────────────────────────────
    let client = connect_bus(&settings.bus_url).await;
    info!(url = %settings.bus_url, "bus connected");

    // ── 4. Engine assembly ───────────────────────────────────────────────
    let metrics = Arc::new(EngineMetrics::new());
    let analyzer = Arc::new(DepthAnalyzer::new());
    let publisher = Arc::new(Publisher::new(
        Arc::new(NatsSink::new(client.clone())),
        settings.output_topic.clone(),
        metrics.clone(),
        settings.io_deadline,
    ));

    let mut engine_router = Router::new(
        analyzer.clone(),
        config.clone(),
        SignalAdapter::default(),
        publisher,
        metrics.clone(),
    );

    let state = Arc::new(AppState::new(
        settings.clone(),
        config.clone(),
        analyzer.clone(),
        metrics.clone(),
        engine_router.breaker_handles(),
    ));

    // ── 5. REST API server ───────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr = settings.bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(addr = %bind_addr, error = %e, "failed to bind API server");
                return;
            }
        };
        info!(addr = %bind_addr, "API server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    // ── 6. Timer tasks ───────────────────────────────────────────────────

    // Config cache sweep.
    let sweep_config = config.clone();
    let cache_ttl = settings.config_cache_ttl;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cache_ttl);
        loop {
            interval.tick().await;
            sweep_config.sweep();
        }
    });

    // Depth analyzer TTL sweep.
    let sweep_analyzer = analyzer.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweep_analyzer.sweep();
        }
    });

    // Heartbeat.
    let heartbeat_state = state.clone();
    let heartbeat_interval = settings.heartbeat_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        loop {
            interval.tick().await;
            heartbeat_state
                .metrics
                .log_heartbeat(&heartbeat_state.breaker_snapshots());
        }
    });

    // ── 7. Consumer loop with reconnect ──────────────────────────────────
    let consumer_client = client.clone();
    let consumer_metrics = metrics.clone();
    let input_topic = settings.input_topic.clone();
    let queue_group = settings.queue_group.clone();
    tokio::spawn(async move {
        loop {
            match bus::consumer::run(
                consumer_client.clone(),
                &input_topic,
                &queue_group,
                &mut engine_router,
                &consumer_metrics,
            )
            .await
            {
                Ok(()) => warn!("consumer stream ended — resubscribing in 5s"),
                Err(e) => error!(error = %e, "consumer error — resubscribing in 5s"),
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping");

    metrics.log_heartbeat(&state.breaker_snapshots());
    info!("Aurora Signal Engine shut down complete.");
    Ok(())
}

/// Connect to MongoDB and verify the connection with a ping.
async fn connect_mongo(settings: &Settings) -> anyhow::Result<Arc<dyn ConfigStore>> {
    let connect = async {
        let client = mongodb::Client::with_uri_str(&settings.mongo_uri).await?;
        let db = client.database(&settings.mongo_database);
        db.run_command(doc! { "ping": 1 }).await?;
        anyhow::Ok(db)
    };

    let db = tokio::time::timeout(settings.io_deadline, connect)
        .await
        .map_err(|_| anyhow::anyhow!("connection deadline expired"))??;

    Ok(Arc::new(MongoConfigStore::new(&db)))
}

/// Connect to the bus, retrying until it comes up. The engine is useless
/// without it, so there is no fallback.
async fn connect_bus(url: &str) -> async_nats::Client {
    loop {
        match async_nats::connect(url).await {
            Ok(client) => return client,
            Err(e) => {
                error!(url = %url, error = %e, "bus connection failed — retrying in 5s");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
}
