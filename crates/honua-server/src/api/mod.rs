//! HTTP API over the rule store.
//!
//! `/api/tenants` manages identities. Everything below
//! `/api/tenants/{tenant}` is scoped to that tenant:
//! - `/rules` rule aggregates
//! - `/conditions` condition trees
//! - `/entities`, `/services` directory entries
//! - `/ids/{table}/next` next id of a tenant table

pub mod conditions;
pub mod directory;
pub mod ids;
pub mod rules;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get},
};
use serde::Serialize;

use honua_core::{StoreError, Tenant};

use crate::AppState;

/// Create the main API router with all endpoints mounted.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/tenants",
            get(directory::list_identities).post(directory::create_identity),
        )
        .route("/tenants/{tenant}", delete(directory::delete_identity))
        .nest("/tenants/{tenant}/rules", rules::router())
        .nest("/tenants/{tenant}/conditions", conditions::router())
        .nest("/tenants/{tenant}/entities", directory::entities_router())
        .nest("/tenants/{tenant}/services", directory::services_router())
        .nest("/tenants/{tenant}/ids", ids::router())
}

/// Error response for API errors.
#[derive(Debug, Serialize)]
pub(crate) struct ApiError {
    error: String,
    message: String,
}

impl ApiError {
    fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }

    pub(crate) fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub(crate) fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new("internal_error", message)
    }
}

/// Map a store failure onto a status code and error body.
pub(crate) fn store_error(err: StoreError) -> Response {
    match &err {
        StoreError::NotFound { .. } => {
            (StatusCode::NOT_FOUND, Json(ApiError::not_found(err.to_string()))).into_response()
        }
        StoreError::InvalidState { .. }
        | StoreError::UnsupportedType { .. }
        | StoreError::InvalidTenant => (
            StatusCode::BAD_REQUEST,
            Json(ApiError::bad_request(err.to_string())),
        )
            .into_response(),
        StoreError::InvalidTransition { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ApiError::new("invalid_transition", err.to_string())),
        )
            .into_response(),
        StoreError::Database(_) | StoreError::Sql(_) => {
            tracing::error!(error = %err, "store operation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::internal("Storage failure")),
            )
                .into_response()
        }
    }
}

/// Validate the `{tenant}` path segment.
pub(crate) fn parse_tenant(raw: String) -> Result<Tenant, Response> {
    Tenant::new(raw).map_err(store_error)
}
