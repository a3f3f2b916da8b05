mod domain;
mod handlers;
mod shared;
mod system;
mod usecases;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,sqlx=warn,sea_orm=warn"));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());

    // File log next to the other build artifacts; console-only if it fails.
    let log_file = std::fs::create_dir_all("target/logs")
        .and_then(|_| std::fs::File::create("target/logs/backend.log"));
    match log_file {
        Ok(file) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Arc::new(file))
                    .with_ansi(false),
            )
            .init(),
        Err(_) => registry.init(),
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = match shared::config::load_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {:#}", e);
            return;
        }
    };
    shared::config::init(config);

    if let Err(e) = shared::data::db::initialize_database(None).await {
        tracing::error!("Database initialization failed: {:#}", e);
        return;
    }

    let protected = Router::new()
        .route("/api/omie/sync", post(handlers::sync::trigger_sync))
        .route("/api/omie/sync/full", post(handlers::sync::trigger_full_sync))
        .layer(axum::middleware::from_fn(system::auth::require_sync_token));

    let app = Router::new()
        .route("/health", get(handlers::sync::health))
        .merge(protected)
        .layer(CorsLayer::permissive());

    let addr = "0.0.0.0:3000";
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            return;
        }
    };
    tracing::info!("Listening on {}", addr);

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
