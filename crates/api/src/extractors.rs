//! Request extractors.

use axum::{extract::FromRequestParts, http::request::Parts};
use poeticverse_common::AppError;
use poeticverse_core::AuthenticatedUser;

/// An authenticated session, inserted into request extensions by
/// [`auth_middleware`](crate::middleware::auth_middleware).
#[derive(Debug, Clone)]
pub struct Session {
    pub user: AuthenticatedUser,
    /// The bearer token the request carried.
    pub access_token: String,
}

/// Authenticated user extractor.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Session);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Session>()
            .cloned()
            .map(AuthUser)
            .ok_or(AppError::Unauthorized)
    }
}
