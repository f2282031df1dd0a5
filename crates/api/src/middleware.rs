//! API middleware.

use axum::{
    body::Body,
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use poeticverse_core::{AccountService, AuthGatewayService};
use tracing::{debug, warn};

use crate::extractors::Session;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub account_service: AccountService,
    pub auth: AuthGatewayService,
}

/// Authentication middleware.
///
/// Resolves `Authorization: Bearer <token>` through the auth gateway. Requests
/// without a valid token pass through unauthenticated; endpoints that need a
/// user reject them via [`AuthUser`](crate::extractors::AuthUser). If the
/// gateway itself fails, the request is answered with that error.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_owned);

    if let Some(access_token) = token {
        match state.auth.authenticate(&access_token).await {
            Ok(Some(user)) => {
                req.extensions_mut().insert(Session { user, access_token });
            }
            Ok(None) => debug!("Rejected bearer token"),
            Err(e) => {
                warn!(error = %e, "Token authentication failed");
                return e.into_response();
            }
        }
    }

    next.run(req).await
}
