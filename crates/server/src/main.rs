//! Poeticverse server entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use poeticverse_api::{AppState, app};
use poeticverse_common::Config;
use poeticverse_core::{AccountDeletionService, AccountService, auth};
use poeticverse_db::SeaOrmAccountStore;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "poeticverse=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting poeticverse server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = Arc::new(poeticverse_db::init(&config).await?);
    info!("Connected to database");

    info!("Running database migrations...");
    poeticverse_db::migrate(&db).await?;
    info!("Migrations completed");

    // Services
    let store = Arc::new(SeaOrmAccountStore::new(db));
    let auth = auth::from_config(&config.auth)?;
    let account_service = AccountService::new(AccountDeletionService::new(store), auth.clone());

    let state = AppState {
        account_service,
        auth,
    };

    let app = app(state)
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
