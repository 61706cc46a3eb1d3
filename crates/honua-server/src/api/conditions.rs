//! Condition tree endpoints.
//!
//! - POST /api/tenants/{tenant}/conditions - Store a new tree
//! - GET /api/tenants/{tenant}/conditions/{id} - Fetch the tree rooted at a node
//! - PUT /api/tenants/{tenant}/conditions/{id} - Edit a stored tree in place
//! - DELETE /api/tenants/{tenant}/conditions/{id} - Delete a subtree

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use honua_core::{Condition, ConditionRepository};

use super::{ApiError, parse_tenant, store_error};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_condition))
        .route(
            "/{id}",
            get(get_condition).put(edit_condition).delete(delete_condition),
        )
}

async fn create_condition(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(condition): Json<Condition>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = ConditionRepository::new(state.db.clone());

    let id = match repo.add_tree(&tenant, &condition).await {
        Ok(id) => id,
        Err(e) => return store_error(e),
    };
    match repo.fetch_tree(&tenant, id).await {
        Ok(stored) => (StatusCode::CREATED, Json(stored)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn get_condition(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = ConditionRepository::new(state.db.clone());

    match repo.fetch_tree(&tenant, id).await {
        Ok(condition) => (StatusCode::OK, Json(condition)).into_response(),
        Err(e) => store_error(e),
    }
}

/// The body must carry the same root id as the path.
async fn edit_condition(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, i64)>,
    Json(condition): Json<Condition>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    if condition.id() != Some(id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiError::bad_request(format!(
                "Condition body must have id {id}"
            ))),
        )
            .into_response();
    }
    let repo = ConditionRepository::new(state.db.clone());

    if let Err(e) = repo.edit_tree(&tenant, &condition).await {
        return store_error(e);
    }
    match repo.fetch_tree(&tenant, id).await {
        Ok(stored) => (StatusCode::OK, Json(stored)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn delete_condition(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = ConditionRepository::new(state.db.clone());

    match repo.delete_tree(&tenant, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::setup_state;
    use axum::body::to_bytes;
    use honua_core::{LogicalOperator, Predicate};
    use serde_json::json;

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body_bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body_bytes).expect("json body")
    }

    fn tree() -> Condition {
        serde_json::from_value(json!({"op": "or", "children": [
            {"type": "state", "sensor": "light.kitchen", "state": "off"},
            {"type": "numeric_state", "sensor": "sensor.temperature", "above": 25}
        ]}))
        .expect("condition")
    }

    async fn stored_tree(state: &AppState) -> Condition {
        body_json(
            create_condition(State(state.clone()), Path("t1".to_string()), Json(tree()))
                .await
                .into_response(),
        )
        .await
    }

    #[tokio::test]
    async fn create_assigns_ids() {
        let (state, _dir) = setup_state().await;

        let stored = stored_tree(&state).await;
        assert_eq!(stored.id(), Some(0));
        assert_eq!(stored.without_ids(), tree());
    }

    #[tokio::test]
    async fn edit_changes_operator_and_leaf() {
        let (state, _dir) = setup_state().await;
        let mut stored = stored_tree(&state).await;
        if let Condition::Logical(root) = &mut stored {
            root.op = LogicalOperator::Nor;
            if let Condition::Leaf(leaf) = &mut root.children[1] {
                leaf.predicate = Predicate::NumericState {
                    sensor: "sensor.temperature".into(),
                    above: None,
                    below: Some(5),
                };
            }
        }

        let response = edit_condition(
            State(state.clone()),
            Path(("t1".to_string(), 0)),
            Json(stored.clone()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let edited: Condition = body_json(response).await;
        assert_eq!(edited, stored);
    }

    #[tokio::test]
    async fn edit_with_mismatched_id_is_bad_request() {
        let (state, _dir) = setup_state().await;
        let stored = stored_tree(&state).await;

        let response = edit_condition(State(state), Path(("t1".to_string(), 7)), Json(stored))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn turning_root_into_leaf_is_unprocessable() {
        let (state, _dir) = setup_state().await;
        stored_tree(&state).await;
        let leaf: Condition = serde_json::from_value(json!({
            "id": 0, "type": "state", "sensor": "light.kitchen", "state": "on"
        }))
        .expect("leaf");

        let response = edit_condition(State(state), Path(("t1".to_string(), 0)), Json(leaf))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["error"], "invalid_transition");
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (state, _dir) = setup_state().await;
        stored_tree(&state).await;

        let response = delete_condition(State(state.clone()), Path(("t1".to_string(), 0)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = get_condition(State(state), Path(("t1".to_string(), 0)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
