use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulse::api::{self, AppState};
use pulse::config::{Config, DatabaseBackend};
use pulse::realtime::{
    ClientConfig, Hub, Listener, ListenerConfig, MemoryPubSub, PgPubSub, PubSub, Publisher,
    REALTIME_CHANNEL,
};
use pulse::storage::{CachedStorage, PostgresStorage, SqliteStorage, Storage};
use pulse::tracking::{ClientIpExtractor, GeoIpService, GeoLocator, Ingestor, NoGeoLocator};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("pulse=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    info!("Loaded configuration");

    // The pub/sub backend follows the database: NOTIFY needs Postgres
    let (storage, pubsub): (Arc<dyn Storage>, Arc<dyn PubSub>) = match config.database.backend {
        DatabaseBackend::Sqlite => {
            info!("Using SQLite storage: {}", config.database.url);
            let storage =
                SqliteStorage::new(&config.database.url, config.database.max_connections).await?;
            (Arc::new(storage), Arc::new(MemoryPubSub::new()))
        }
        DatabaseBackend::Postgres => {
            info!("Using PostgreSQL storage");
            let storage =
                PostgresStorage::new(&config.database.url, config.database.max_connections)
                    .await?;
            let pubsub = PgPubSub::new(storage.pool());
            (Arc::new(storage), Arc::new(pubsub))
        }
    };

    storage.init().await.context("Failed to initialize database")?;
    info!("Database initialized successfully");

    let cached = Arc::new(CachedStorage::new(
        Arc::clone(&storage),
        config.tracking.goal_cache_capacity,
        config.tracking.goal_cache_ttl_secs,
    ));

    let geo: Arc<dyn GeoLocator> = match config.tracking.geoip_city_db.as_deref() {
        Some(path) => {
            info!("Loading GeoIP database from {}", path);
            Arc::new(GeoIpService::open(path)?)
        }
        None => {
            warn!("GEOIP_CITY_DB not set, sessions will have no location");
            Arc::new(NoGeoLocator)
        }
    };

    let (hub, hub_task) = Hub::spawn(config.realtime.hub_queue_capacity);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (backoff_min, backoff_max) = config.realtime.listener_backoff();
    let listener_task = Listener::new(
        Arc::clone(&pubsub),
        hub.clone(),
        ListenerConfig {
            channel: REALTIME_CHANNEL.to_string(),
            keepalive: config.realtime.listener_keepalive(),
            backoff_min,
            backoff_max,
        },
    )
    .spawn(shutdown_rx);

    let storage_for_ingest: Arc<dyn Storage> = cached.clone();
    let ingestor = Ingestor::new(
        storage_for_ingest,
        cached,
        Publisher::new(pubsub),
        &config.tracking,
    )
    .with_geo_locator(geo)
    .with_ip_anonymization(config.client_ip.anonymize_ip);

    let state = Arc::new(AppState {
        ingestor: Arc::new(ingestor),
        hub: hub.clone(),
        client_ip: ClientIpExtractor::new(&config.client_ip),
        realtime: ClientConfig {
            buffer: config.realtime.client_buffer,
            heartbeat: config.realtime.heartbeat_interval(),
        },
    });
    let router = api::create_api_router(state);

    let api_addr = format!("{}:{}", config.api_server.host, config.api_server.port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("Failed to bind {}", api_addr))?;
    info!("API server listening on http://{}", api_addr);

    axum::serve(
        api_listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Shutting down realtime");
    let _ = shutdown_tx.send(true);
    let _ = listener_task.await;
    hub.shutdown().await;
    let _ = hub_task.await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
