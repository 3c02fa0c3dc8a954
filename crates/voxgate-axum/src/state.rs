//! Shared application state for all transport handlers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use voxgate_core::workflow::WorkflowDeps;

use crate::auth::AuthVerifier;

/// Immutable per-process context, cheaply cloned into every handler.
pub struct GatewayContext {
    pub deps: Arc<WorkflowDeps>,
    pub auth: AuthVerifier,
    /// Per-consumer bus queue capacity (`QUEUE_CAPACITY`).
    pub queue_capacity: usize,
    /// Hard cap on concurrent WebSocket connections (`MAX_CONNECTIONS`).
    pub max_connections: usize,
    /// Server→client keepalive ping interval.
    pub keepalive: Duration,
    connections: AtomicUsize,
}

pub type AppState = Arc<GatewayContext>;

impl GatewayContext {
    pub fn new(
        deps: Arc<WorkflowDeps>,
        auth: AuthVerifier,
        queue_capacity: usize,
        max_connections: usize,
        keepalive: Duration,
    ) -> Self {
        Self {
            deps,
            auth,
            queue_capacity,
            max_connections,
            keepalive,
            connections: AtomicUsize::new(0),
        }
    }

    /// Try to claim a connection slot; `None` when the process is at cap.
    /// The returned guard releases the slot on drop.
    pub fn try_acquire_connection(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let mut current = self.connections.load(Ordering::SeqCst);
        loop {
            if current >= self.max_connections {
                return None;
            }
            match self.connections.compare_exchange(
                current,
                current + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return Some(ConnectionGuard(Arc::clone(self))),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

/// RAII slot for one accepted WebSocket connection.
pub struct ConnectionGuard(Arc<GatewayContext>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.connections.fetch_sub(1, Ordering::SeqCst);
    }
}
