//! Route definitions and router construction.

use std::path::Path;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{chat_http, sse, storage, ws};

/// Build the chat API routes (no state applied).
pub(crate) fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/chat/ws", get(ws::chat_ws))
        .route("/chat", post(chat_http::chat))
        .route("/chat/stream", post(sse::chat_stream))
}

/// Create the main router: chat API, storage upload + retrieval, health.
///
/// `blob_root` enables `GET /storage/{key}` file serving; uploads work
/// whenever the provider registry has a blob storage configured.
pub fn create_router(state: AppState, blob_root: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut storage_routes: Router<AppState> =
        Router::new().route("/upload", post(storage::upload));
    if let Some(root) = blob_root {
        storage_routes = storage_routes.fallback_service(ServeDir::new(root));
    }

    Router::new()
        .route("/health", get(health_check))
        .merge(api_routes())
        .nest("/storage", storage_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
pub(crate) async fn health_check() -> &'static str {
    "OK"
}
