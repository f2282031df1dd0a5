//! HTTP API layer for Poeticverse.
//!
//! - **Endpoints**: account management and health
//! - **Extractors**: authenticated session
//! - **Middleware**: bearer-token authentication against the hosted auth service
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

use axum::Router;

pub use endpoints::router;
pub use middleware::AppState;

/// Build the application: the API under `/api` behind the authentication
/// middleware.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", router())
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ))
        .with_state(state)
}
