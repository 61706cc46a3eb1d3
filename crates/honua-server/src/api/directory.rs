//! Tenant directory endpoints: identities, entities and hub services.
//!
//! - GET /api/tenants - List identities
//! - POST /api/tenants - Register an identity
//! - DELETE /api/tenants/{tenant} - Remove an identity and everything it owns
//! - GET /api/tenants/{tenant}/entities - List entities (`?without_rule=true` for
//!   entities no rule targets yet)
//! - POST /api/tenants/{tenant}/entities - Register an entity
//! - POST /api/tenants/{tenant}/services - Register a service
//! - POST /api/tenants/{tenant}/services/{domain}/toggle - Flip a service's enabled flag

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;

use honua_core::{
    EntityRepository, HassServiceRepository, IdentityRepository, NewEntity, NewHassService,
    RuleRepository,
};

use super::{parse_tenant, store_error};
use crate::AppState;

pub fn entities_router() -> Router<AppState> {
    Router::new().route("/", get(list_entities).post(create_entity))
}

pub fn services_router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_service))
        .route("/{domain}/toggle", post(toggle_service))
}

/// GET /api/tenants
pub async fn list_identities(State(state): State<AppState>) -> impl IntoResponse {
    let repo = IdentityRepository::new(state.db.clone());

    match repo.list().await {
        Ok(identities) => (StatusCode::OK, Json(identities)).into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateIdentityRequest {
    pub id: String,
    pub name: String,
}

/// POST /api/tenants
pub async fn create_identity(
    State(state): State<AppState>,
    Json(request): Json<CreateIdentityRequest>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(request.id) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = IdentityRepository::new(state.db.clone());

    match repo.create(&tenant, &request.name).await {
        Ok(identity) => (StatusCode::CREATED, Json(identity)).into_response(),
        Err(e) => store_error(e),
    }
}

/// DELETE /api/tenants/{tenant}
pub async fn delete_identity(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = IdentityRepository::new(state.db.clone());

    match repo.delete(&tenant).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct EntityListFilter {
    #[serde(default)]
    pub without_rule: bool,
}

/// GET /api/tenants/{tenant}/entities
async fn list_entities(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Query(filter): Query<EntityListFilter>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };

    let result = if filter.without_rule {
        RuleRepository::new(state.db.clone())
            .entities_without_rule(&tenant)
            .await
    } else {
        EntityRepository::new(state.db.clone()).list(&tenant).await
    };

    match result {
        Ok(entities) => (StatusCode::OK, Json(entities)).into_response(),
        Err(e) => store_error(e),
    }
}

/// POST /api/tenants/{tenant}/entities
async fn create_entity(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(new_entity): Json<NewEntity>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = EntityRepository::new(state.db.clone());

    match repo.create(&tenant, new_entity).await {
        Ok(entity) => (StatusCode::CREATED, Json(entity)).into_response(),
        Err(e) => store_error(e),
    }
}

/// POST /api/tenants/{tenant}/services
async fn create_service(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    Json(new_service): Json<NewHassService>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = HassServiceRepository::new(state.db.clone());

    match repo.create(&tenant, new_service).await {
        Ok(service) => (StatusCode::CREATED, Json(service)).into_response(),
        Err(e) => store_error(e),
    }
}

/// POST /api/tenants/{tenant}/services/{domain}/toggle
async fn toggle_service(
    State(state): State<AppState>,
    Path((tenant, domain)): Path<(String, String)>,
) -> impl IntoResponse {
    let tenant = match parse_tenant(tenant) {
        Ok(tenant) => tenant,
        Err(response) => return response,
    };
    let repo = HassServiceRepository::new(state.db.clone());

    match repo.toggle(&tenant, &domain).await {
        Ok(service) => (StatusCode::OK, Json(service)).into_response(),
        Err(e) => store_error(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::setup_state;
    use axum::body::to_bytes;
    use honua_core::{Entity, HassService, Identity};

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body_bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body bytes");
        serde_json::from_slice(&body_bytes).expect("json body")
    }

    #[tokio::test]
    async fn create_and_list_identities() {
        let (state, _dir) = setup_state().await;

        let response = create_identity(
            State(state.clone()),
            Json(CreateIdentityRequest {
                id: "cabin".into(),
                name: "Cabin".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = list_identities(State(state)).await.into_response();
        let identities: Vec<Identity> = body_json(response).await;
        let ids: Vec<&str> = identities.iter().map(|i| i.id.as_str()).collect();
        assert!(ids.contains(&"t1"));
        assert!(ids.contains(&"cabin"));
    }

    #[tokio::test]
    async fn duplicate_identity_is_bad_request() {
        let (state, _dir) = setup_state().await;

        let response = create_identity(
            State(state),
            Json(CreateIdentityRequest {
                id: "t1".into(),
                name: "Again".into(),
            }),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_unknown_identity_is_not_found() {
        let (state, _dir) = setup_state().await;

        let response = delete_identity(State(state), Path("nowhere".to_string()))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_entities_and_filter_without_rule() {
        let (state, _dir) = setup_state().await;

        let response = list_entities(
            State(state.clone()),
            Path("t1".to_string()),
            Query(EntityListFilter::default()),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let entities: Vec<Entity> = body_json(response).await;
        assert_eq!(entities.len(), 2);

        let response = list_entities(
            State(state),
            Path("t1".to_string()),
            Query(EntityListFilter { without_rule: true }),
        )
        .await
        .into_response();
        let entities: Vec<Entity> = body_json(response).await;
        assert_eq!(entities.len(), 2);
    }

    #[tokio::test]
    async fn toggle_service_flips_enabled() {
        let (state, _dir) = setup_state().await;

        let response = toggle_service(
            State(state.clone()),
            Path(("t1".to_string(), "light.turn_on".to_string())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let service: HassService = body_json(response).await;
        assert!(!service.enabled);

        let response = toggle_service(
            State(state),
            Path(("t1".to_string(), "switch.turn_off".to_string())),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
