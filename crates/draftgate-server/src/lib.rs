//! draftgate Server: HTTP/SSE front end for the draft review workflow.
//!
//! Provides:
//! - the blocking `/graph/start` and `/graph/resume` endpoints
//! - the queue-then-stream `/graph/stream/*` endpoints (server-sent events)
//! - session inspection under `/graph/sessions`
//!
//! This crate can be used standalone or embedded (see `draftgate-cli`).

pub mod api;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;
use axum::Router;
use draftgate_core::config::{GeneratorConfig, WorkflowConfig};
use draftgate_core::db::Database;
use draftgate_core::generation::build_generator;
use draftgate_core::state::{AppState, AppStateInner};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Configuration for the draftgate server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// SQLite file for durable checkpoints. In-memory when unset.
    pub db_path: Option<String>,
    pub session_ttl_secs: u64,
    pub reap_interval_secs: u64,
    pub generator: GeneratorConfig,
    /// Allowed CORS origins; empty allows any origin.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            db_path: None,
            session_ttl_secs: 3600,
            reap_interval_secs: 60,
            generator: GeneratorConfig::default(),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    pub fn workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            session_ttl: Duration::from_secs(self.session_ttl_secs),
            reap_interval: Duration::from_secs(self.reap_interval_secs.max(1)),
            ..WorkflowConfig::default()
        }
    }
}

/// Create a shared `AppState` from the server configuration.
///
/// Useful when the state is shared between the HTTP server and another
/// consumer such as the interactive CLI.
pub async fn create_app_state(config: &ServerConfig) -> Result<AppState, String> {
    let db = match &config.db_path {
        Some(path) => Some(
            Database::open(path).map_err(|e| format!("Failed to open database: {}", e))?,
        ),
        None => None,
    };

    let generator = build_generator(&config.generator)
        .map_err(|e| format!("Failed to configure generator: {}", e))?;

    if let Err(e) = generator.health_check().await {
        tracing::warn!("Generator '{}' health check failed: {}", generator.name(), e);
    }

    Ok(Arc::new(AppStateInner::new(
        db,
        generator,
        config.generator.system_prompt.clone(),
        config.workflow_config(),
    )))
}

/// Start the draftgate server.
///
/// Returns the actual address the server is listening on.
pub async fn start_server(config: ServerConfig) -> Result<SocketAddr, String> {
    // Initialize tracing
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "draftgate_server=info,draftgate_core=info,tower_http=info".into()
            }),
        )
        .try_init();

    tracing::info!(
        "Starting draftgate server on {}:{} (generator: {:?}, checkpoints: {})",
        config.host,
        config.port,
        config.generator.kind,
        config.db_path.as_deref().unwrap_or("in-memory")
    );

    let state = create_app_state(&config).await?;

    start_server_with_state(config, state).await
}

/// Start the HTTP server with a pre-built `AppState`.
pub async fn start_server_with_state(
    config: ServerConfig,
    state: AppState,
) -> Result<SocketAddr, String> {
    let app = build_router(&config, state.clone());

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to get local address: {}", e))?;

    tracing::info!("draftgate server listening on {}", local_addr);

    let shutdown = CancellationToken::new();
    state.service.spawn_reaper(shutdown.clone());

    // Spawn the server in a background task
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Server error: {}", e);
        }
        shutdown.cancel();
    });

    Ok(local_addr)
}

/// Build the full router: API routes, health check, CORS and tracing.
pub fn build_router(config: &ServerConfig, state: AppState) -> Router {
    Router::new()
        .merge(api::api_router())
        .route("/api/health", axum::routing::get(health_check))
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(allowed))
    }
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "server": "draftgate-server",
        "version": env!("CARGO_PKG_VERSION"),
        "generator": state.service.generator().name(),
        "checkpoints": if state.db.is_some() { "sqlite" } else { "memory" },
    }))
}
