//! Operator view of connected clients and the synchronized world.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::api::dto::{ClientCountResponse, ObjectListResponse};
use crate::app_state::AppState;

/// `GET /clients`: Number of authenticated clients.
#[utoipa::path(
    get,
    path = "/api/v1/clients",
    tag = "Sessions",
    summary = "Count authenticated clients",
    description = "Returns how many WebSocket connections are currently authenticated and receiving entity pushes.",
    responses(
        (status = 200, description = "Authenticated client count", body = ClientCountResponse),
    )
)]
pub async fn client_count(State(state): State<AppState>) -> Json<ClientCountResponse> {
    Json(ClientCountResponse {
        authenticated_clients: state.client_manager.authenticated_count().await,
    })
}

/// `GET /objects`: Snapshot of every entity.
#[utoipa::path(
    get,
    path = "/api/v1/objects",
    tag = "Sessions",
    summary = "List objects",
    description = "Returns the same entity snapshots a client receives from `objectsync.listObjects`.",
    responses(
        (status = 200, description = "All entity snapshots", body = ObjectListResponse),
    )
)]
pub async fn list_objects(State(state): State<AppState>) -> Json<ObjectListResponse> {
    let objects = state.client_manager.list_objects().await;
    Json(ObjectListResponse {
        count: objects.len(),
        objects,
    })
}

/// Session routes, nested under `/api/v1`.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/clients", get(client_count))
        .route("/objects", get(list_objects))
}
