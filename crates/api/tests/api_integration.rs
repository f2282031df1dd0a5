//! API integration tests.
//!
//! These tests drive the full router, including authentication middleware,
//! against an in-memory account store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use async_trait::async_trait;
use poeticverse_api::{AppState, app};
use poeticverse_common::{AppError, AppResult};
use poeticverse_core::{
    AccountDeletionService, AccountService, AuthGateway, AuthenticatedUser, NoOpAuthGateway,
};
use poeticverse_db::{Column, Filter, Table, test_utils::MemoryAccountStore};
use serde_json::Value;
use tower::ServiceExt;

/// Create the test router over the given store. Bearer tokens are taken as
/// user ids.
fn create_test_router(store: &Arc<MemoryAccountStore>) -> Router {
    let auth = Arc::new(NoOpAuthGateway);
    let account_service =
        AccountService::new(AccountDeletionService::new(store.clone()), auth.clone());

    app(AppState {
        account_service,
        auth,
    })
}

/// A gateway whose backing service is down.
struct UnavailableAuthGateway;

#[async_trait]
impl AuthGateway for UnavailableAuthGateway {
    async fn authenticate(&self, _access_token: &str) -> AppResult<Option<AuthenticatedUser>> {
        Err(AppError::Auth("connection refused".into()))
    }

    async fn sign_out(&self, _access_token: &str) -> AppResult<()> {
        Err(AppError::Auth("connection refused".into()))
    }

    async fn delete_user(&self, _user_id: &str) -> AppResult<()> {
        Err(AppError::Auth("connection refused".into()))
    }
}

fn seeded_store() -> Arc<MemoryAccountStore> {
    let store = Arc::new(MemoryAccountStore::new());
    store.seed_profile("u1");
    store.seed_profile("u2");
    store.seed_post("p1", "u1");
    store.seed_post("p2", "u2");
    store.seed_like("l1", "p1", "u2");
    store.seed_comment("c1", "p2", "u1");
    store.seed_follow("f1", "u1", "u2");
    store
}

fn delete_request(token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/api/account/delete").method("POST");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = create_test_router(&seeded_store());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .method("GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["data"]["status"], "ok");
}

#[tokio::test]
async fn test_delete_account_without_token_is_unauthorized() {
    let store = seeded_store();
    let app = create_test_router(&store);

    let response = app.oneshot(delete_request(None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["code"], "UNAUTHORIZED");
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_delete_account_with_empty_token_is_unauthorized() {
    let store = seeded_store();
    let app = create_test_router(&store);

    let response = app.oneshot(delete_request(Some(""))).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(store.calls().is_empty());
}

#[tokio::test]
async fn test_delete_account_removes_caller_data() {
    let store = seeded_store();
    let app = create_test_router(&store);

    let response = app.oneshot(delete_request(Some("u1"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.ids(Table::Profiles), vec!["u2".to_string()]);
    assert_eq!(store.ids(Table::Posts), vec!["p2".to_string()]);
    assert!(store.ids(Table::Likes).is_empty());
    assert!(store.ids(Table::Comments).is_empty());
    assert_eq!(
        store.count(
            Table::Followers,
            &Filter::any(vec![
                Filter::eq(Column::FollowerId, "u1"),
                Filter::eq(Column::FollowedId, "u1"),
            ])
        ),
        0
    );
}

#[tokio::test]
async fn test_delete_account_failure_is_reported() {
    let store = seeded_store();
    store.fail_at_call(3);
    let app = create_test_router(&store);

    let response = app.oneshot(delete_request(Some("u1"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "ACCOUNT_DELETION_FAILED");
    assert_eq!(body["error"]["message"], "Failed to delete account");
    assert_eq!(store.ids(Table::Profiles).len(), 2);
}

#[tokio::test]
async fn test_delete_account_requires_post() {
    let app = create_test_router(&seeded_store());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/account/delete")
                .method("GET")
                .header(header::AUTHORIZATION, "Bearer u1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = create_test_router(&seeded_store());

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/does-not-exist")
                .method("GET")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_auth_service_outage_is_bad_gateway() {
    let store = seeded_store();
    let auth = Arc::new(UnavailableAuthGateway);
    let account_service =
        AccountService::new(AccountDeletionService::new(store.clone()), auth.clone());
    let app = app(AppState {
        account_service,
        auth,
    });

    let response = app.oneshot(delete_request(Some("u1"))).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(json_body(response).await["error"]["code"], "AUTH_SERVICE_ERROR");
    assert!(store.calls().is_empty());
}
