//! Hosted authentication service gateway.
//!
//! Sessions and credentials live in the hosted auth service. Core services only
//! need three things from it: resolve a bearer token, end a session, and remove
//! a user's credentials.

use async_trait::async_trait;
use poeticverse_common::{AppError, AppResult, config::AuthConfig};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// A user resolved from an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Opaque user id issued by the auth service.
    pub id: String,
    /// Email on record, if the service returns one.
    #[serde(default)]
    pub email: Option<String>,
}

/// Trait for the hosted authentication service.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// Resolve an access token. Returns `None` for invalid or expired tokens.
    async fn authenticate(&self, access_token: &str) -> AppResult<Option<AuthenticatedUser>>;

    /// End the session the access token belongs to.
    async fn sign_out(&self, access_token: &str) -> AppResult<()>;

    /// Remove the user's credentials. Removing an unknown user succeeds.
    async fn delete_user(&self, user_id: &str) -> AppResult<()>;
}

/// A no-op gateway for local development and tests: every non-empty token is
/// taken as the id of the user it authenticates.
pub struct NoOpAuthGateway;

#[async_trait]
impl AuthGateway for NoOpAuthGateway {
    async fn authenticate(&self, access_token: &str) -> AppResult<Option<AuthenticatedUser>> {
        if access_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(AuthenticatedUser {
            id: access_token.to_string(),
            email: None,
        }))
    }

    async fn sign_out(&self, _access_token: &str) -> AppResult<()> {
        Ok(())
    }

    async fn delete_user(&self, _user_id: &str) -> AppResult<()> {
        Ok(())
    }
}

/// Gateway talking to the hosted auth REST API.
#[derive(Clone)]
pub struct HttpAuthGateway {
    client: Client,
    base_url: Url,
    anon_key: String,
    service_key: String,
}

impl HttpAuthGateway {
    /// Create a new HTTP gateway from configuration.
    pub fn new(config: &AuthConfig) -> AppResult<Self> {
        let mut base_url = config
            .url
            .clone()
            .ok_or_else(|| AppError::Config("auth.url is required when auth is enabled".into()))?;

        // Url::join replaces the last segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(5))
            .user_agent(format!("poeticverse/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url,
            anon_key: config.anon_key.clone(),
            service_key: config.service_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> AppResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| AppError::Internal(format!("invalid auth endpoint {path}: {e}")))
    }

    /// `admin/users/{user_id}`, with the id percent-encoded as one segment.
    fn admin_user_endpoint(&self, user_id: &str) -> AppResult<Url> {
        let mut url = self.endpoint("admin/users/")?;
        url.path_segments_mut()
            .map_err(|()| AppError::Internal("auth base URL cannot hold a path".into()))?
            .pop_if_empty()
            .push(user_id);
        Ok(url)
    }
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    async fn authenticate(&self, access_token: &str) -> AppResult<Option<AuthenticatedUser>> {
        let response = self
            .client
            .get(self.endpoint("user")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::Auth(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let user = response
                    .json::<AuthenticatedUser>()
                    .await
                    .map_err(|e| AppError::Auth(format!("invalid user payload: {e}")))?;
                debug!(user_id = %user.id, "Token authenticated");
                Ok(Some(user))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Ok(None),
            status => Err(AppError::Auth(format!("user lookup returned {status}"))),
        }
    }

    async fn sign_out(&self, access_token: &str) -> AppResult<()> {
        let response = self
            .client
            .post(self.endpoint("logout")?)
            .header("apikey", &self.anon_key)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AppError::Auth(e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(()),
            // Session already gone.
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => {
                debug!("Session already ended");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(status = %status, body = %body, "Sign-out failed");
                Err(AppError::Auth(format!("sign-out returned {status}")))
            }
        }
    }

    async fn delete_user(&self, user_id: &str) -> AppResult<()> {
        let response = self
            .client
            .delete(self.admin_user_endpoint(user_id)?)
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
            .send()
            .await
            .map_err(|e| AppError::Auth(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                info!(user_id = user_id, "Credentials removed");
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!(user_id = user_id, "Credentials already removed");
                Ok(())
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                warn!(user_id = user_id, status = %status, body = %body, "Credential removal failed");
                Err(AppError::Auth(format!("credential removal returned {status}")))
            }
        }
    }
}

/// Type alias for a shared auth gateway.
pub type AuthGatewayService = Arc<dyn AuthGateway>;

/// Build the gateway selected by configuration.
pub fn from_config(config: &AuthConfig) -> AppResult<AuthGatewayService> {
    if config.enabled {
        Ok(Arc::new(HttpAuthGateway::new(config)?))
    } else {
        warn!("Auth disabled: bearer tokens are accepted as user ids");
        Ok(Arc::new(NoOpAuthGateway))
    }
}
