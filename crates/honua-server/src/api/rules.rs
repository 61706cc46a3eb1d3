//! Rules API endpoints.
//!
//! Provides:
//! - GET /api/tenants/{tenant}/rules - List rules
//! - POST /api/tenants/{tenant}/rules - Create a rule
//! - GET /api/tenants/{tenant}/rules/{id} - Get a rule by ID
//! - PUT /api/tenants/{tenant}/rules/{id} - Replace a rule (the ID changes)
//! - DELETE /api/tenants/{tenant}/rules/{id} - Delete a rule
//! - PATCH /api/tenants/{tenant}/rules/{id}/enabled - Enable or disable a rule

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};
use serde::Deserialize;

use honua_core::{NewRule, RuleRepository};

use super::{parse_tenant, store_error};
use crate::AppState;

/// Create the rules API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_rules).post(create_rule))
        .route("/{id}", get(get_rule).put(replace_rule).delete(delete_rule))
        .route("/{id}/enabled", patch(set_rule_enabled))
}

/// GET /api/tenants/{tenant}/rules
async fn list_rules(State(state): State<AppState>, Path(tenant): Path<String>) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = RuleRepository::new(state.db.clone());

    match repo.list(&tenant).await {
        Ok(rules) => (StatusCode::OK, Json(rules)).into_response(),
        Err(e) => store_error(e),
    }
}

/// POST /api/tenants/{tenant}/rules
async fn create_rule(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(new_rule): Json<NewRule>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = RuleRepository::new(state.db.clone());

    match repo.add(&tenant, &new_rule).await {
        Ok(rule) => (StatusCode::CREATED, Json(rule)).into_response(),
        Err(e) => store_error(e),
    }
}

/// GET /api/tenants/{tenant}/rules/{id}
async fn get_rule(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = RuleRepository::new(state.db.clone());

    match repo.get(&tenant, id).await {
        Ok(rule) => (StatusCode::OK, Json(rule)).into_response(),
        Err(e) => store_error(e),
    }
}

/// PUT /api/tenants/{tenant}/rules/{id}
///
/// The rule is deleted and stored again; the response carries the new ID.
async fn replace_rule(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, i64)>,
    Json(new_rule): Json<NewRule>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = RuleRepository::new(state.db.clone());

    match repo.edit(&tenant, id, &new_rule).await {
        Ok(rule) => (StatusCode::OK, Json(rule)).into_response(),
        Err(e) => store_error(e),
    }
}

/// DELETE /api/tenants/{tenant}/rules/{id}
async fn delete_rule(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, i64)>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = RuleRepository::new(state.db.clone());

    match repo.delete(&tenant, id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

/// PATCH /api/tenants/{tenant}/rules/{id}/enabled
async fn set_rule_enabled(
    State(state): State<AppState>,
    Path((tenant, id)): Path<(String, i64)>,
    Json(request): Json<SetEnabledRequest>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = RuleRepository::new(state.db.clone());

    match repo.set_enabled(&tenant, id, request.enabled).await {
        Ok(rule) => (StatusCode::OK, Json(rule)).into_response(),
        Err(e) => store_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::setup_state;
    use axum::body::to_bytes;
    use honua_core::Rule;
    use serde_json::json;

    fn sample_rule() -> NewRule {
        serde_json::from_value(json!({
            "target": "light.kitchen",
            "trigger": {"kind": "periodic", "every": "10m"},
            "condition": {"op": "and", "children": [
                {"type": "numeric_state", "sensor": "sensor.temperature", "below": 19},
                {"type": "time", "after": "06:00", "before": "09:00"}
            ]},
            "then_actions": [{"type": "service", "domain": "light.turn_on"}],
            "else_actions": [{"type": "delay", "hours": 0, "minutes": 15, "seconds": 0}]
        }))
        .expect("sample rule")
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body_bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body_bytes).expect("json body")
    }

    #[tokio::test]
    async fn list_rules_returns_empty_list() {
        let (state, _dir) = setup_state().await;

        let response = list_rules(State(state), Path("t1".to_string()))
            .await
            .into_response();

        assert_eq!(response.status(), StatusCode::OK);
        let body: Vec<Rule> = body_json(response).await;
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn create_then_get_rule() {
        let (state, _dir) = setup_state().await;

        let response = create_rule(State(state.clone()), Path("t1".to_string()), Json(sample_rule()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: Rule = body_json(response).await;
        assert_eq!(created.name, "Kitchen rule");
        assert_eq!(created.then_actions.len(), 1);
        assert_eq!(created.else_actions.len(), 1);

        let response = get_rule(State(state), Path(("t1".to_string(), created.id)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched: Rule = body_json(response).await;
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn create_rule_with_invalid_leaf_is_bad_request() {
        let (state, _dir) = setup_state().await;
        let mut rule = sample_rule();
        rule.condition = serde_json::from_value(json!({"op": "or", "children": [
            {"type": "numeric_state", "sensor": "sensor.temperature"}
        ]}))
        .expect("condition");

        let response = create_rule(State(state), Path("t1".to_string()), Json(rule))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["error"], "bad_request");
    }

    #[tokio::test]
    async fn blank_tenant_is_bad_request() {
        let (state, _dir) = setup_state().await;

        let response = list_rules(State(state), Path("  ".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn replace_and_delete_rule() {
        let (state, _dir) = setup_state().await;
        let created: Rule = body_json(
            create_rule(State(state.clone()), Path("t1".to_string()), Json(sample_rule()))
                .await
                .into_response(),
        )
        .await;

        let mut changed = sample_rule();
        changed.else_actions.clear();
        let response = replace_rule(
            State(state.clone()),
            Path(("t1".to_string(), created.id)),
            Json(changed),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let replaced: Rule = body_json(response).await;
        assert!(replaced.else_actions.is_empty());

        let response = delete_rule(State(state.clone()), Path(("t1".to_string(), replaced.id)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = get_rule(State(state), Path(("t1".to_string(), replaced.id)))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn toggle_missing_rule_is_not_found() {
        let (state, _dir) = setup_state().await;

        let response = set_rule_enabled(
            State(state),
            Path(("t1".to_string(), 5)),
            Json(SetEnabledRequest { enabled: false }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: serde_json::Value = body_json(response).await;
        assert_eq!(body["error"], "not_found");
    }
}
