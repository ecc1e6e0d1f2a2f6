use std::sync::Arc;
use tracing::{error, info};

mod agent;
mod bus;
mod chat;
mod config;
mod error;
mod history;
mod id;
mod manager;
mod persona;
mod server;
mod store;
mod upload;
mod workspace;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    info!("Agora workspace starting...");

    let config = config::Config::from_env()?;
    let personas = config.personas()?;

    let event_bus = Arc::new(bus::EventBus::new());

    info!("Initializing store at {}", config.db_path.display());
    let store = store::Store::new(&config.db_path).await?;
    store.init().await?;

    info!("Agent backend at {}", config.backend_url);
    let backend = Arc::new(agent::HttpGateway::new(
        config.backend_url.clone(),
        config.request_timeout,
    )?);

    let sessions = manager::SessionManager::load(
        Arc::new(history::SqliteSessionStore::new(store.clone())),
        backend,
        personas,
        event_bus.clone(),
        config.user_id.clone(),
    )
    .await?;

    let workspace = workspace::Workspace::new(store, config.user_id.clone());

    let app = server::router(Arc::new(server::AppState {
        sessions: Arc::new(sessions),
        workspace: Arc::new(workspace),
        event_bus,
    }));

    let addr = format!("{}:{}", config.bind, config.port);
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        res = axum::serve(listener, app) => {
            if let Err(e) = res {
                error!("Server stopped with error: {}", e);
            }
        }
    }

    Ok(())
}
