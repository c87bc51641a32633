use smart_ventilation::api;
use smart_ventilation::config::{self, Config};
use smart_ventilation::ingest::broker;
use smart_ventilation::prediction::ModelSet;
use smart_ventilation::service::{ServiceSettings, VentilationService};
use smart_ventilation::store::memory::MemoryStore;
use smart_ventilation::store::postgres::PgStore;
use smart_ventilation::store::{Persistence, Store};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::Level;

fn init_tracing(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::load_default()?;
    init_tracing(&config.logging.level);
    tracing::info!(
        config_path = config::DEFAULT_CONFIG_PATH,
        app = %config.app.name,
        "smart-ventilation starting"
    );

    let store = open_store(&config).await;
    let persistence = Persistence::new(store, config.location());
    let models = ModelSet::from_config(&config);

    let Some(routes) = config.topic_routes() else {
        return Err("no [topics] configured".into());
    };
    let settings = ServiceSettings {
        routes,
        timezone: config.timezone()?,
        prediction_interval: config.prediction_interval(),
        poll: config.poll_policy(),
    };

    let service = Arc::new(VentilationService::new(persistence, models, settings));
    service.start();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let broker_handle = match config.broker_settings() {
        Some(broker_settings) => Some(tokio::spawn(broker::run_broker_loop(
            broker_settings,
            Arc::clone(&service),
            shutdown_rx,
        ))),
        None => {
            tracing::warn!("No [broker] configured - ingestion disabled");
            None
        }
    };

    let app = api::router(Arc::clone(&service));
    let port = config.server_port();
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    shutdown_tx.send_replace(true);
    if let Some(handle) = broker_handle
        && let Err(err) = handle.await
    {
        tracing::warn!(error = %err, "MQTT loop ended abnormally");
    }
    service.shutdown().await;

    Ok(())
}

/// Connects to PostgreSQL; on failure the store starts disconnected and
/// reconnects on its first write.
async fn open_store(config: &Config) -> Box<dyn Store> {
    let Some(url) = config.database_url() else {
        tracing::warn!("No [database] configured - using in-memory store");
        return Box::new(MemoryStore::new());
    };
    match PgStore::connect(url).await {
        Ok(mut store) => {
            if config.create_schema()
                && let Err(err) = store.ensure_schema().await
            {
                tracing::error!(error = %err, "Failed to create tables");
            }
            Box::new(store)
        }
        Err(err) => {
            tracing::error!(error = %err, "Failed to connect to PostgreSQL");
            Box::new(PgStore::disconnected(url))
        }
    }
}
