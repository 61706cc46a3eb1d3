//! GET /api/tenants/{tenant}/ids/{table}/next - Next free id of a tenant table.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Serialize;

use honua_core::{IdAllocator, TenantTable};

use super::{ApiError, parse_tenant, store_error};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/{table}/next", get(next_id))
}

#[derive(Debug, Serialize)]
pub struct NextIdResponse {
    pub table: TenantTable,
    pub next_id: i64,
}

async fn next_id(
    State(state): State<AppState>,
    Path((tenant, table)): Path<(String, String)>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let Some(table) = TenantTable::from_str(&table) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::bad_request(format!("Unknown table: {table}"))),
        )
            .into_response();
    };

    match IdAllocator::new(state.db.clone()).next_id(&tenant, table).await {
        Ok(next_id) => (StatusCode::OK, Json(NextIdResponse { table, next_id })).into_response(),
        Err(e) => store_error(e),
    }
}
