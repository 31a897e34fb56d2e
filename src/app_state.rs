//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::service::ClientManager;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Client manager owning sessions and the service surface.
    pub client_manager: Arc<ClientManager>,
    /// Capacity of each WebSocket connection's outbound queue.
    pub outbound_capacity: usize,
}
