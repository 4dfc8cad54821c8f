mod api;
mod metrics;
mod state;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_core::{
    create_authenticator, load_config, validate_config, AccountStore, Authenticator,
    BackpressureMonitor, LeaseManager, Orchestrator, Reaper, SqliteAccountStore, SqliteTaskStore,
    SqliteVideoStore, SqliteWorkQueue, TaskDispatcher, TaskStore, VideoStore, WorkQueue,
};

use api::create_router;
use state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("CONVEYOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully (version {})", VERSION);
    info!("Auth method: {:?}", config.auth.method);
    info!("Database path: {:?}", config.database.path);

    // Compute config hash for the startup log line
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Config fingerprint: {}", &config_hash[..16]);

    // Create authenticator
    let authenticator: Arc<dyn Authenticator> = Arc::from(
        create_authenticator(&config.auth).context("Failed to create authenticator")?,
    );
    info!("Using authenticator: {}", authenticator.method_name());

    // Create SQLite stores on the shared database
    let db_path = &config.database.path;
    let tasks: Arc<dyn TaskStore> =
        Arc::new(SqliteTaskStore::new(db_path).context("Failed to create task store")?);
    let videos: Arc<dyn VideoStore> =
        Arc::new(SqliteVideoStore::new(db_path).context("Failed to create video store")?);
    let accounts: Arc<dyn AccountStore> =
        Arc::new(SqliteAccountStore::new(db_path).context("Failed to create account store")?);
    info!("Stores initialized");

    // Create the stage queues
    let mut queues: HashMap<String, Arc<dyn WorkQueue>> = HashMap::new();
    for name in [
        config.dispatch.download_queue.clone(),
        config.dispatch.upload_queue.clone(),
        config.dispatch.verify_queue.clone(),
    ] {
        let queue = SqliteWorkQueue::new(db_path, &name, config.queues.visibility_timeout_secs)
            .with_context(|| format!("Failed to create queue {}", name))?;
        queues.insert(name, Arc::new(queue));
    }
    info!("Work queues initialized: {:?}", queues.keys().collect::<Vec<_>>());

    // Wire up the orchestration core
    let monitor = BackpressureMonitor::new(
        queues.clone(),
        Arc::clone(&tasks),
        config.backpressure.clone(),
    );
    let leases = Arc::new(LeaseManager::new(
        Arc::clone(&accounts),
        config.lease.clone(),
    ));
    let dispatcher = Arc::new(TaskDispatcher::new(
        Arc::clone(&tasks),
        Arc::clone(&videos),
        Arc::clone(&leases),
        queues,
        monitor,
        config.dispatch.clone(),
    ));
    let reaper = Arc::new(Reaper::new(
        Arc::clone(&tasks),
        Arc::clone(&accounts),
        Arc::clone(&videos),
        config.reaper.clone(),
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        config.orchestrator.clone(),
        dispatcher,
        reaper,
        Arc::clone(&tasks),
    ));

    if config.orchestrator.enabled {
        orchestrator.start().await;
        info!("Orchestrator started");
    } else {
        info!("Orchestrator disabled in config; sweeps via API only");
    }

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        authenticator,
        tasks,
        videos,
        accounts,
        leases,
        Arc::clone(&orchestrator),
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop orchestrator loops before exiting
    info!("Server shutting down...");
    if config.orchestrator.enabled {
        orchestrator.stop().await;
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
