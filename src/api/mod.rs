//! REST API layer: route handlers, DTOs, router composition and the
//! OpenAPI document.
//!
//! Resource endpoints are mounted under `/api/v1`.

pub mod dto;
pub mod handlers;

use axum::Router;
use utoipa::OpenApi;

use crate::app_state::AppState;

/// OpenAPI description of the REST endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "world-gateway", description = "Session and world inspection endpoints"),
    paths(
        handlers::system::health_handler,
        handlers::sessions::client_count,
        handlers::sessions::list_objects,
    ),
    tags(
        (name = "System", description = "Service health"),
        (name = "Sessions", description = "Authenticated clients and synchronized objects"),
    )
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}
