//! Response bodies for the client and object inspection endpoints.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::EntitySnapshot;

/// Number of authenticated WebSocket clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClientCountResponse {
    /// Connections that completed `auth.login`.
    pub authenticated_clients: usize,
}

/// Snapshot of every entity in the world.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ObjectListResponse {
    /// Number of entities.
    pub count: usize,
    /// One snapshot per entity, in no particular order.
    #[schema(value_type = Vec<Object>)]
    pub objects: Vec<EntitySnapshot>,
}
