//! HTTP API for Scriptorium agent pipelines.
//!
//! # Endpoints
//!
//! - `GET /` - Liveness message
//! - `GET /health` - Health check
//! - `POST /run-workflow` - Run agents over a topic and return the final document
//! - `POST /sessions` - Create an interactive session
//! - `GET /sessions/{id}` - Session snapshot
//! - `DELETE /sessions/{id}` - Drop a session
//! - `POST /sessions/{id}/events` - Apply a user action
//! - `POST /sessions/{id}/run` - Run the session workflow in the background
//!
//! ```text
//! Client
//!    │
//!    ▼
//! ┌─────────────────┐      ┌──────────────────┐
//! │   API (Axum)    │─────▶│  Session store   │
//! └────────┬────────┘      └──────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐      ┌──────────────────┐
//! │ Chain + executor│─────▶│  LLM providers   │
//! └─────────────────┘      └──────────────────┘
//! ```

pub mod config;
pub mod routes;
pub mod session;
pub mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::HeaderValue,
    routing::{get, post},
};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub use config::{AppConfig, ServerConfig, SessionConfig};
pub use session::{Effect, RunState, SessionEvent, UserAction, apply};
pub use state::AppState;

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origins);
    let body_limit = state.config.server.body_limit_bytes;

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        .route("/run-workflow", post(routes::run_workflow))
        .route("/sessions", post(routes::create_session))
        .route(
            "/sessions/{id}",
            get(routes::get_session).delete(routes::delete_session),
        )
        .route("/sessions/{id}/events", post(routes::session_event))
        .route("/sessions/{id}/run", post(routes::run_session))
        // Middleware
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server on the given address.
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = create_router(state);

    info!(%addr, "Starting Scriptorium API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
