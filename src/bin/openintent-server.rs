//! OpenIntent coordination server.
//!
//! Boots the storage layer, the event broker, the engine with its
//! background workers, the tool broker, and the HTTP surface. Takes an
//! optional JSON config file path as its only argument; every field
//! falls back to `CoreConfig::default()`.
//!
//! ```bash
//! cargo run --bin openintent-server -- config.json
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use openintent::auth::ApiKeyAuth;
use openintent::config::CoreConfig;
use openintent::engine::{BackgroundTasks, Engine};
use openintent::events::EventBroker;
use openintent::server::create_app;
use openintent::storage::{SecretVault, Store};
use openintent::tools::ToolBroker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str::<CoreConfig>(&raw)?
        }
        None => CoreConfig::default(),
    };

    let vault = SecretVault::new(config.credential_key_hex.as_deref())?;
    let store = Store::connect(&config.database_url, vault).await?;
    let broker = Arc::new(EventBroker::new(config.queue_capacity));
    let engine = Engine::new(store, broker.clone(), config.clone());
    let tasks = BackgroundTasks::spawn(engine.clone());
    let tools = Arc::new(ToolBroker::new(engine.clone())?);
    let auth = Arc::new(ApiKeyAuth::from_entries(&config.api_keys));

    let app = create_app(engine, tools, auth);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %config.bind_addr, "openintent server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining background tasks");
    tasks
        .shutdown(Duration::from_millis(config.drain_deadline_ms))
        .await;
    broker.close_all();
    info!("shutdown complete");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
