//! Account management endpoints.

use axum::{Router, extract::State, routing::post};
use poeticverse_common::AppResult;

use crate::{extractors::AuthUser, middleware::AppState, response::ApiResponse};

/// Permanently delete the caller's account.
async fn delete_account(
    AuthUser(session): AuthUser,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<()>> {
    state
        .account_service
        .delete_account(&session.user.id, &session.access_token)
        .await?;
    Ok(ApiResponse::ok(()))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/delete", post(delete_account))
}
