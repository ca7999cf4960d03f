//! Permits Backend
//!
//! REST backend for employee permit and equipment requests with SQLite
//! persistence and on-disk attachments.

mod api;
mod auth;
mod config;
mod conflict;
mod db;
mod errors;
mod lifecycle;
mod models;
mod notifications;
mod report;
mod storage;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::Config;
use db::Repository;
use storage::FileStore;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub files: Arc<FileStore>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Permits Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Upload directory: {:?}", config.upload_dir);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (PERMITS_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Attachment store
    let files = Arc::new(FileStore::open(&config.upload_dir)?);

    let state = AppState {
        repo,
        files,
        config: Arc::new(config.clone()),
    };

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let psk = state.config.api_psk.clone();

    let api_routes = Router::new()
        // Permits
        .route(
            "/permits",
            post(api::submit_permit)
                .layer(DefaultBodyLimit::max(api::MAX_PERMIT_UPLOAD_BYTES)),
        )
        .route("/permits/conflicts", post(api::check_conflicts))
        .route("/permits/{id}", get(api::get_permit))
        .route("/permits/{id}/approval", put(api::set_approval_marker))
        // Equipment
        .route("/equipment", post(api::submit_equipment))
        // Both kinds
        .route("/requests", get(api::list_requests))
        .route("/requests/mine", get(api::my_requests))
        .route(
            "/requests/{id}",
            get(api::get_request).delete(api::delete_request),
        )
        .route("/requests/{id}/status", put(api::decide_request))
        .route("/requests/{id}/notifications", put(api::update_notification))
        .route("/notifications", get(api::list_notifications))
        // Users
        .route("/users", get(api::list_users).post(api::create_user))
        .route("/users/{code}", get(api::get_user).delete(api::delete_user))
        .route("/users/{code}/phone", put(api::update_user_phone))
        .route("/users/{code}/history", get(api::user_history))
        .route("/users/{code}/requests", get(api::user_requests))
        // Reports
        .route("/reports/permits", get(api::permit_report))
        .route("/reports/weekly", get(api::weekly_report));

    let upload_dir = state.files.root().to_path_buf();

    // Everything behind the PSK gate
    let protected = Router::new()
        .nest("/api", api_routes)
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .merge(protected)
        .merge(health_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
