//! Account management service.

use poeticverse_common::AppResult;
use tracing::{error, info};

use crate::services::account_deletion::AccountDeletionService;
use crate::services::auth::AuthGatewayService;

/// Account management service.
#[derive(Clone)]
pub struct AccountService {
    deletion: AccountDeletionService,
    auth: AuthGatewayService,
}

impl AccountService {
    /// Create a new account service.
    #[must_use]
    pub fn new(deletion: AccountDeletionService, auth: AuthGatewayService) -> Self {
        Self { deletion, auth }
    }

    /// Delete the account of an authenticated user.
    ///
    /// Ends the session, removes the user's data, then removes the user's
    /// credentials. A failure stops the flow at that stage; running it again
    /// is safe.
    pub async fn delete_account(&self, user_id: &str, access_token: &str) -> AppResult<()> {
        self.auth.sign_out(access_token).await?;

        self.deletion.delete_account(user_id).await.map_err(|e| {
            error!(user_id = user_id, error = %e, step = ?e.step(), "Account data removal failed");
            e
        })?;

        self.auth.delete_user(user_id).await?;

        info!(user_id = user_id, "Account deleted");
        Ok(())
    }
}
