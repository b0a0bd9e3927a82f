//! Web server setup and routing

use anyhow::Result;
use axum::http::HeaderValue;
use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Run the hub server.
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let cors = build_cors(&state.config.cors.allowed_origins);

    let app = Router::new()
        .route("/ws", get(ws::websocket_handler))
        .route("/api/health", get(api::health))
        .route("/api/live", get(api::live))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, "Starting hub server");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}

/// An empty allow-list permits any origin; otherwise only the listed ones.
fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!(origin = %o, "Ignoring unparsable allowed origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any)
}
