use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relay_api::config::{BlobBackend, ConfigError, LogFormat, RelayConfig};
use relay_api::router::build_app_router;
use relay_api::state::AppState;
use relay_cloud::{BlobStore, FsBlobStore, S3BlobStore};
use relay_comfyui::{BackendManager, ReconnectConfig, EVENT_CHANNEL_CAPACITY};
use relay_db::{MemoryTaskStore, PgTaskStore, TaskStore};
use relay_events::{WebhookDelivery, WebhookError};
use relay_pipeline::{
    Dispatcher, DispatcherConfig, FetchPolicy, Sinks, EARLY_EVENT_TTL, TOMBSTONE_TTL,
};

/// Anything that stops the process from coming up.
#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Webhook client: {0}")]
    Webhook(#[from] WebhookError),

    #[error("Invalid bind address: {0}")]
    Addr(#[from] std::net::AddrParseError),

    #[error("Server: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = RelayConfig::from_env();
    init_tracing(
        config
            .as_ref()
            .map(|c| c.log_format)
            .unwrap_or(LogFormat::Text),
    );

    let result = match config {
        Ok(config) => run(config).await,
        Err(e) => Err(e.into()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Relay failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "relay_api=debug,relay_pipeline=debug,relay_comfyui=info,tower_http=info".into()
    });
    let json = format == LogFormat::Json;

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

async fn run(config: RelayConfig) -> Result<(), StartupError> {
    tracing::info!(
        host = %config.host,
        port = config.port,
        backends = config.backends.len(),
        "Loaded relay configuration",
    );

    // --- Task store ---
    let store: Arc<dyn TaskStore> = match &config.database_url {
        Some(url) => {
            let pool = relay_db::create_pool(url).await?;
            relay_db::health_check(&pool).await?;
            relay_db::run_migrations(&pool).await?;
            tracing::info!("Database ready, migrations applied");
            Arc::new(PgTaskStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, task records are kept in memory only");
            Arc::new(MemoryTaskStore::new())
        }
    };

    // --- Blob storage ---
    let blobs: Arc<dyn BlobStore> = match &config.blob {
        BlobBackend::S3 {
            bucket,
            endpoint_url,
        } => {
            tracing::info!(%bucket, endpoint_url = ?endpoint_url, "Using S3 blob storage");
            Arc::new(S3BlobStore::from_env(bucket.clone(), endpoint_url.as_deref()).await)
        }
        BlobBackend::Local { dir } => {
            tracing::info!(dir = %dir.display(), "Using local blob storage");
            Arc::new(FsBlobStore::new(dir.clone()))
        }
    };

    let webhook = Arc::new(WebhookDelivery::new(config.webhook_timeout())?);

    // --- Backends and dispatcher ---
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let backends = BackendManager::start(&config.backends, ReconnectConfig::default(), event_tx);
    tracing::info!(count = config.backends.len(), "Backend connections started");

    let dispatcher = Dispatcher::start(
        backends,
        event_rx,
        Sinks {
            store,
            blobs,
            webhook,
        },
        DispatcherConfig {
            key_prefix: config.key_prefix.clone(),
            fallback_dir: config.fallback_dir.clone(),
            fetch: FetchPolicy {
                max_attempts: config.fetch_max_attempts,
                ..FetchPolicy::default()
            },
            early_event_ttl: EARLY_EVENT_TTL,
            tombstone_ttl: TOMBSTONE_TTL,
        },
    );

    // --- Server ---
    let state = AppState {
        dispatcher: Arc::clone(&dispatcher),
    };
    let app = build_app_router(state, Duration::from_secs(config.request_timeout_secs));

    let addr = SocketAddr::new(config.host.parse()?, config.port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Starting server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped accepting requests, draining");
    dispatcher.shutdown(config.shutdown_drain()).await;
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
