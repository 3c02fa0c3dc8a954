//! # voxgate-axum
//!
//! Axum transport adapter for the streaming chat gateway: the WebSocket
//! endpoint, the SSE and non-streaming HTTP chat adapters, JWT auth, the
//! attachment upload route, and the filesystem blob store.

#![deny(unused_crate_dependencies)]

pub mod auth;
pub mod bootstrap;
pub mod chat_http;
pub mod error;
pub mod routes;
pub mod sse;
pub mod state;
pub mod storage;
pub mod ws;

pub use auth::{AuthVerifier, Claims};
pub use bootstrap::{GatewayOptions, build_router, serve};
pub use error::HttpError;
pub use state::{AppState, GatewayContext};
pub use storage::FsBlobStore;

// Dev-dependencies used by integration tests only
#[cfg(test)]
use http_body_util as _;
#[cfg(test)]
use tokio_test as _;
#[cfg(test)]
use tower as _;
