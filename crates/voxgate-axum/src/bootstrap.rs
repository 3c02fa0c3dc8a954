//! Server bootstrap: context assembly and the serve loop.
//!
//! The host binary resolves configuration and providers, then hands
//! everything here. This module is the only place a listener is bound.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use axum::Router;
use tracing::info;

use voxgate_core::workflow::WorkflowDeps;

use crate::auth::AuthVerifier;
use crate::routes::create_router;
use crate::state::GatewayContext;

/// Transport options resolved by the host.
pub struct GatewayOptions {
    /// HMAC key for JWT verification (`AUTH_SECRET`).
    pub auth_secret: String,
    /// Per-consumer bus queue capacity (`QUEUE_CAPACITY`).
    pub queue_capacity: usize,
    /// Concurrent WebSocket cap (`MAX_CONNECTIONS`).
    pub max_connections: usize,
    /// Server→client keepalive interval.
    pub keepalive: Duration,
    /// Root directory served under `/storage` (`BLOB_BUCKET`).
    pub blob_root: Option<PathBuf>,
}

/// Assemble the router from core dependencies and transport options.
pub fn build_router(deps: Arc<WorkflowDeps>, options: &GatewayOptions) -> Router {
    let context = Arc::new(GatewayContext::new(
        deps,
        AuthVerifier::new(&options.auth_secret),
        options.queue_capacity,
        options.max_connections,
        options.keepalive,
    ));
    create_router(context, options.blob_root.as_deref())
}

/// Bind and serve until ctrl-c.
pub async fn serve(addr: SocketAddr, router: Router) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;
    Ok(())
}
