//! Gateway error types with HTTP status and RPC code mapping.
//!
//! [`GatewayError`] is the central error type for domain and session
//! failures. It maps to an HTTP status for the REST surface. [`RpcError`]
//! is what a remote call can fail with; it wraps [`GatewayError`] and adds
//! transport-level failures.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::EntityId;
use crate::rpc::ConnectionId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 2001,
///     "message": "entity not found: 6c1f...",
///     "details": null
///   }
/// }
/// ```
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Server-side error enum with HTTP status code mapping.
///
/// # Error Code Ranges
///
/// | Range     | Category             | HTTP Status                  |
/// |-----------|----------------------|------------------------------|
/// | 1000–1999 | Validation           | 400 Bad Request              |
/// | 2000–2999 | State/Not Found      | 404 Not Found / 409 Conflict |
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The component name collides with a snapshot key.
    #[error("reserved component name: {0}")]
    ReservedComponentName(String),

    /// No component definition with this name is registered.
    #[error("unknown component: {0}")]
    UnknownComponent(String),

    /// The component definition does not declare this attribute.
    #[error("unknown attribute {attribute} on component {component}")]
    UnknownAttribute {
        /// Component name.
        component: String,
        /// Attribute name.
        attribute: String,
    },

    /// Entity with the given ID was not found.
    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// A component definition with this name already exists.
    #[error("component already defined: {0}")]
    ComponentAlreadyDefined(String),

    /// The connection is already authenticated or is authenticating.
    #[error("connection {0} is already authenticated")]
    AlreadyAuthenticated(ConnectionId),
}

impl GatewayError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::ReservedComponentName(_) => 1001,
            Self::UnknownComponent(_) => 1002,
            Self::UnknownAttribute { .. } => 1003,
            Self::EntityNotFound(_) => 2001,
            Self::ComponentAlreadyDefined(_) => 2002,
            Self::AlreadyAuthenticated(_) => 2003,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ReservedComponentName(_)
            | Self::UnknownComponent(_)
            | Self::UnknownAttribute { .. } => StatusCode::BAD_REQUEST,
            Self::EntityNotFound(_) => StatusCode::NOT_FOUND,
            Self::ComponentAlreadyDefined(_) | Self::AlreadyAuthenticated(_) => {
                StatusCode::CONFLICT
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
                details: None,
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}

/// Failure of a single remote call or push.
///
/// None of these are fatal: a failed call produces an `error` envelope for
/// the caller, a failed push is logged and the connection is left for
/// disconnect-driven cleanup.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// No handler is registered under this name for the calling connection.
    #[error("method not found: {0}")]
    MethodNotFound(String),

    /// Arguments could not be decoded into the handler's parameter types.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// An outbound push could not be queued for the remote peer.
    #[error("delivery of {method} to {connection_id} failed: {reason}")]
    DeliveryFailed {
        /// Target connection.
        connection_id: ConnectionId,
        /// Client-side method name.
        method: String,
        /// Why the envelope was not queued.
        reason: String,
    },

    /// The service backing the handler has shut down.
    #[error("service unavailable")]
    Unavailable,

    /// The handler's result could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Domain or session failure raised by the handler.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl RpcError {
    /// Returns the numeric code written into `error` envelopes.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::MethodNotFound(_) => 404,
            Self::InvalidArguments(_) => 400,
            Self::DeliveryFailed { .. } | Self::Unavailable => 503,
            Self::Serialization(_) => 500,
            Self::Gateway(e) => e.error_code(),
        }
    }
}
