use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Router, http::Method, routing::get};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

mod config;
mod download;
mod error;
mod routes;
mod sweeper;
mod validate;
mod ytdlp;

use config::Config;
use error::ApiError;
use routes::AppState;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "alldl=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.detail.unwrap_or(error.message));
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let config = Arc::new(Config::from_env());

    tokio::fs::create_dir_all(&config.downloads_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Failed to create downloads directory: {error}"))
        })?;
    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .map_err(|error| ApiError::internal(format!("Failed to create temp directory: {error}")))?;

    let http_client = reqwest::Client::builder()
        .build()
        .map_err(|error| ApiError::internal(format!("Failed to build HTTP client: {error}")))?;

    let state = AppState {
        config: Arc::clone(&config),
        rate_limits: Arc::new(Mutex::new(HashMap::new())),
        http_client,
        started_at: Instant::now(),
    };

    let _sweeper = sweeper::spawn(config.downloads_dir.clone(), config.retention);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers(Any);

    let app = Router::new()
        .route("/info", get(routes::info))
        .route("/alldl", get(routes::alldl))
        .route("/files/{filename}", get(routes::serve_file))
        .route("/health", get(routes::health))
        .fallback(routes::fallback)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&config.bind_addr).await.map_err(|error| {
        ApiError::internal(format!("Failed to bind {}: {error}", config.bind_addr))
    })?;

    info!("Server running on http://{}", config.bind_addr);
    info!("Downloads directory: {:?}", config.downloads_dir);
    info!("Cleanup job scheduled every 30 minutes");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}
