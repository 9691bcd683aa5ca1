use anyhow::{Context, Result};
use axum::{
    Router,
    routing::{delete, get, post},
};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tower_http::cors::CorsLayer;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use tracing_subscriber::prelude::*;
use uuid::Uuid;

mod auth;
mod config;
mod handlers;
mod metrics;
mod models;
mod seed;
mod store;
mod ws;

use crate::auth::AuthState;
use crate::config::{AuthConfig, FileConfig};
use crate::metrics::ServerMetrics;
use crate::store::Store;
use crate::ws::ChatHub;

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

#[derive(Parser)]
#[command(name = "huddle")]
#[command(about = "Group chat server with real-time channels and video calls")]
struct Cli {
    /// Host to bind to (overrides config)
    #[arg(short = 'b', long)]
    host: Option<String>,

    /// Port for the server (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory containing config.toml (defaults to the working directory)
    #[arg(long)]
    config_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Populate the store with demo accounts and a sample group
    #[arg(long)]
    seed_demo: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub store: Arc<Store>,
    pub hub: Arc<ChatHub>,
    pub metrics: Arc<ServerMetrics>,
    pub config: Arc<FileConfig>,
    pub auth_config: Arc<AuthConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_directive = if cli.debug {
        "huddle=debug,tower_http=debug,info"
    } else {
        "huddle=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    info!("Starting Huddle");

    let config_dir = cli.config_dir.unwrap_or_else(|| PathBuf::from("."));
    let mut file_config: FileConfig = config::load_config(&config_dir)
        .extract()
        .context("invalid configuration")?;
    if let Some(host) = cli.host {
        file_config.server.host = host;
    }
    if let Some(port) = cli.port {
        file_config.server.port = port;
    }

    let store = Arc::new(Store::new());
    if cli.seed_demo {
        seed::seed_demo(&store).await?;
    }

    let metrics = Arc::new(ServerMetrics::new());
    let hub = Arc::new(ChatHub::new(metrics.clone()));
    let auth_config = Arc::new(AuthConfig::from_file(&file_config.auth));
    let config = Arc::new(file_config);

    let app_state = AppState {
        store: store.clone(),
        hub,
        metrics,
        config: config.clone(),
        auth_config: auth_config.clone(),
    };

    let auth_state = AuthState { store };

    let app = Router::new()
        // Account routes
        .route("/api/users/login", post(handlers::login))
        .route("/api/users/register", post(handlers::register))
        .route("/api/users/logout", post(handlers::logout))
        .route("/api/users", get(handlers::list_users))
        .route("/api/users/promote", post(handlers::promote_user))
        .route("/api/users/{id}", delete(handlers::delete_user))
        // Group and channel routes
        .route(
            "/api/groups",
            get(handlers::list_groups).post(handlers::create_group),
        )
        .route("/api/groups/{id}", delete(handlers::delete_group))
        .route(
            "/api/groups/{id}/channels",
            post(handlers::create_channel),
        )
        .route(
            "/api/groups/{id}/channels/{channel_id}",
            delete(handlers::delete_channel),
        )
        .route("/api/groups/{id}/members", post(handlers::add_member))
        // Message history
        .route(
            "/api/channels/{id}/messages",
            get(handlers::channel_messages),
        )
        // Real-time connection
        .route("/api/ws", get(handlers::ws_handler))
        // Health endpoints
        .route("/health", get(handlers::health_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            auth::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let actual_addr = listener.local_addr()?;

    info!("Huddle listening on http://{}", actual_addr);
    info!("API endpoints:");
    info!("  POST   /api/users/login     - Obtain a session token");
    info!("  GET    /api/groups          - List groups");
    info!("  GET    /api/channels/:id/messages - Channel history");
    info!("  GET    /api/ws              - WebSocket connection");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
        info!("Received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal)
        .await
        .context("Server error")?;

    info!("Shutdown complete");
    Ok(())
}
