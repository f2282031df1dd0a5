//! Account deletion cascade.
//!
//! Removes every row owned by or referencing a user, children before parents,
//! and the profile last. The store enforces foreign keys, so the order in
//! [`cascade_plan`] is load-bearing.
//!
//! The cascade is not transactional. Every step is an idempotent filtered
//! delete, so a failed run can be retried from the top.

use std::fmt;

use poeticverse_common::AppError;
use poeticverse_db::{Column, Filter, SharedAccountStore, StoreError, Table};
use thiserror::Error;
use tracing::{debug, info, warn};

/// A single step of the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeStep {
    OwnedPostLookup,
    LikesOnPosts,
    OwnLikes,
    CommentsOnPosts,
    OwnComments,
    SharedPosts,
    TemporaryPosts,
    Posts,
    Followers,
    Profile,
}

impl CascadeStep {
    /// Table the step addresses.
    #[must_use]
    pub const fn table(self) -> Table {
        match self {
            Self::OwnedPostLookup | Self::Posts => Table::Posts,
            Self::LikesOnPosts | Self::OwnLikes => Table::Likes,
            Self::CommentsOnPosts | Self::OwnComments => Table::Comments,
            Self::SharedPosts => Table::SharedPosts,
            Self::TemporaryPosts => Table::TemporaryPosts,
            Self::Followers => Table::Followers,
            Self::Profile => Table::Profiles,
        }
    }

    /// Short name used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::OwnedPostLookup => "owned_post_lookup",
            Self::LikesOnPosts => "likes_on_posts",
            Self::OwnLikes => "own_likes",
            Self::CommentsOnPosts => "comments_on_posts",
            Self::OwnComments => "own_comments",
            Self::SharedPosts => "shared_posts",
            Self::TemporaryPosts => "temporary_posts",
            Self::Posts => "posts",
            Self::Followers => "followers",
            Self::Profile => "profile",
        }
    }
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of the account deletion cascade, naming the step that failed.
#[derive(Debug, Error)]
pub enum AccountDeletionError {
    #[error("invalid user id")]
    InvalidUserId,

    #[error("failed to look up owned posts")]
    OwnedPostLookup(#[source] StoreError),

    #[error("failed to delete likes on posts")]
    LikesOnPosts(#[source] StoreError),

    #[error("failed to delete own likes")]
    OwnLikes(#[source] StoreError),

    #[error("failed to delete comments on posts")]
    CommentsOnPosts(#[source] StoreError),

    #[error("failed to delete own comments")]
    OwnComments(#[source] StoreError),

    #[error("failed to delete shared posts")]
    SharedPosts(#[source] StoreError),

    #[error("failed to delete temporary posts")]
    TemporaryPosts(#[source] StoreError),

    #[error("failed to delete posts")]
    Posts(#[source] StoreError),

    #[error("failed to delete followers")]
    Followers(#[source] StoreError),

    #[error("failed to delete profile")]
    Profile(#[source] StoreError),
}

impl AccountDeletionError {
    fn at(step: CascadeStep, source: StoreError) -> Self {
        match step {
            CascadeStep::OwnedPostLookup => Self::OwnedPostLookup(source),
            CascadeStep::LikesOnPosts => Self::LikesOnPosts(source),
            CascadeStep::OwnLikes => Self::OwnLikes(source),
            CascadeStep::CommentsOnPosts => Self::CommentsOnPosts(source),
            CascadeStep::OwnComments => Self::OwnComments(source),
            CascadeStep::SharedPosts => Self::SharedPosts(source),
            CascadeStep::TemporaryPosts => Self::TemporaryPosts(source),
            CascadeStep::Posts => Self::Posts(source),
            CascadeStep::Followers => Self::Followers(source),
            CascadeStep::Profile => Self::Profile(source),
        }
    }

    /// The step that failed, if the cascade got as far as the store.
    #[must_use]
    pub const fn step(&self) -> Option<CascadeStep> {
        match self {
            Self::InvalidUserId => None,
            Self::OwnedPostLookup(_) => Some(CascadeStep::OwnedPostLookup),
            Self::LikesOnPosts(_) => Some(CascadeStep::LikesOnPosts),
            Self::OwnLikes(_) => Some(CascadeStep::OwnLikes),
            Self::CommentsOnPosts(_) => Some(CascadeStep::CommentsOnPosts),
            Self::OwnComments(_) => Some(CascadeStep::OwnComments),
            Self::SharedPosts(_) => Some(CascadeStep::SharedPosts),
            Self::TemporaryPosts(_) => Some(CascadeStep::TemporaryPosts),
            Self::Posts(_) => Some(CascadeStep::Posts),
            Self::Followers(_) => Some(CascadeStep::Followers),
            Self::Profile(_) => Some(CascadeStep::Profile),
        }
    }

    /// The underlying store error, if any.
    #[must_use]
    pub const fn store_error(&self) -> Option<&StoreError> {
        match self {
            Self::InvalidUserId => None,
            Self::OwnedPostLookup(e)
            | Self::LikesOnPosts(e)
            | Self::OwnLikes(e)
            | Self::CommentsOnPosts(e)
            | Self::OwnComments(e)
            | Self::SharedPosts(e)
            | Self::TemporaryPosts(e)
            | Self::Posts(e)
            | Self::Followers(e)
            | Self::Profile(e) => Some(e),
        }
    }
}

impl From<AccountDeletionError> for AppError {
    fn from(err: AccountDeletionError) -> Self {
        match err.store_error() {
            None => Self::BadRequest(err.to_string()),
            Some(source) => Self::AccountDeletion(format!("{err}: {source}")),
        }
    }
}

/// The ordered delete requests for `user_id`, given the ids of the posts the
/// user owns. Steps that target dependents of owned posts are left out when
/// the user owns none.
#[must_use]
pub fn cascade_plan(user_id: &str, owned_post_ids: &[String]) -> Vec<(CascadeStep, Filter)> {
    let has_posts = !owned_post_ids.is_empty();
    let owned = || owned_post_ids.iter().cloned();
    let mut plan = Vec::with_capacity(9);

    if has_posts {
        plan.push((CascadeStep::LikesOnPosts, Filter::is_in(Column::PostId, owned())));
    }
    plan.push((CascadeStep::OwnLikes, Filter::eq(Column::UserId, user_id)));

    if has_posts {
        plan.push((CascadeStep::CommentsOnPosts, Filter::is_in(Column::PostId, owned())));
    }
    plan.push((CascadeStep::OwnComments, Filter::eq(Column::UserId, user_id)));

    // Shares of the user's posts by others would otherwise block the posts delete.
    let shared = if has_posts {
        Filter::any(vec![
            Filter::eq(Column::SharedByUserId, user_id),
            Filter::is_in(Column::OriginalPostId, owned()),
        ])
    } else {
        Filter::eq(Column::SharedByUserId, user_id)
    };
    plan.push((CascadeStep::SharedPosts, shared));

    plan.push((CascadeStep::TemporaryPosts, Filter::eq(Column::UserId, user_id)));
    plan.push((CascadeStep::Posts, Filter::eq(Column::UserId, user_id)));
    plan.push((
        CascadeStep::Followers,
        Filter::any(vec![
            Filter::eq(Column::FollowerId, user_id),
            Filter::eq(Column::FollowedId, user_id),
        ]),
    ));
    plan.push((CascadeStep::Profile, Filter::eq(Column::Id, user_id)));

    plan
}

/// Permanently deletes a user's data.
#[derive(Clone)]
pub struct AccountDeletionService {
    store: SharedAccountStore,
}

impl AccountDeletionService {
    /// Create a new account deletion service.
    #[must_use]
    pub const fn new(store: SharedAccountStore) -> Self {
        Self { store }
    }

    /// Delete every row owned by or referencing `user_id`, then its profile.
    ///
    /// The caller is responsible for authorization. Steps run strictly in
    /// order; the first failure aborts the rest and is returned.
    pub async fn delete_account(&self, user_id: &str) -> Result<(), AccountDeletionError> {
        if user_id.trim().is_empty() {
            return Err(AccountDeletionError::InvalidUserId);
        }

        info!(user_id = user_id, "Starting account deletion");

        let owned_post_ids = self
            .store
            .select_ids(Table::Posts, &Filter::eq(Column::UserId, user_id))
            .await
            .map_err(|e| {
                warn!(user_id = user_id, error = %e, "Owned post lookup failed");
                AccountDeletionError::OwnedPostLookup(e)
            })?;

        debug!(
            user_id = user_id,
            owned_posts = owned_post_ids.len(),
            "Resolved owned posts"
        );

        let mut total = 0;
        for (step, filter) in cascade_plan(user_id, &owned_post_ids) {
            let rows_affected = self
                .store
                .delete(step.table(), &filter)
                .await
                .map_err(|e| {
                    warn!(
                        user_id = user_id,
                        step = %step,
                        error = %e,
                        "Account deletion step failed"
                    );
                    AccountDeletionError::at(step, e)
                })?;

            debug!(
                user_id = user_id,
                step = %step,
                rows_affected = rows_affected,
                "Account deletion step completed"
            );
            total += rows_affected;
        }

        info!(user_id = user_id, rows_deleted = total, "Account deletion completed");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use poeticverse_db::test_utils::{MemoryAccountStore, StoreCall};
    use std::sync::Arc;

    fn service(store: &Arc<MemoryAccountStore>) -> AccountDeletionService {
        AccountDeletionService::new(store.clone())
    }

    fn called_steps(store: &MemoryAccountStore) -> Vec<Table> {
        store.calls().iter().map(StoreCall::table).collect()
    }

    #[test]
    fn test_plan_without_posts_skips_post_dependents() {
        let steps: Vec<CascadeStep> = cascade_plan("u1", &[]).into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            steps,
            vec![
                CascadeStep::OwnLikes,
                CascadeStep::OwnComments,
                CascadeStep::SharedPosts,
                CascadeStep::TemporaryPosts,
                CascadeStep::Posts,
                CascadeStep::Followers,
                CascadeStep::Profile,
            ]
        );
    }

    #[test]
    fn test_plan_with_posts_orders_dependents_first() {
        let ids = vec!["p1".to_string(), "p2".to_string()];
        let plan = cascade_plan("u1", &ids);
        let steps: Vec<CascadeStep> = plan.iter().map(|(s, _)| *s).collect();
        assert_eq!(
            steps,
            vec![
                CascadeStep::LikesOnPosts,
                CascadeStep::OwnLikes,
                CascadeStep::CommentsOnPosts,
                CascadeStep::OwnComments,
                CascadeStep::SharedPosts,
                CascadeStep::TemporaryPosts,
                CascadeStep::Posts,
                CascadeStep::Followers,
                CascadeStep::Profile,
            ]
        );
        assert_eq!(plan[0].1, Filter::is_in(Column::PostId, ["p1", "p2"]));
        assert_eq!(
            plan[7].1.to_string(),
            "follower_id = u1 OR followed_id = u1"
        );
        assert_eq!(plan[8].1, Filter::eq(Column::Id, "u1"));
    }

    #[tokio::test]
    async fn test_user_without_data_only_loses_profile() {
        let store = Arc::new(MemoryAccountStore::new());
        store.seed_profile("u1");
        store.seed_profile("u2");

        service(&store).delete_account("u1").await.unwrap();

        assert_eq!(store.ids(Table::Profiles), vec!["u2".to_string()]);
        assert_eq!(
            called_steps(&store),
            vec![
                Table::Posts,
                Table::Likes,
                Table::Comments,
                Table::SharedPosts,
                Table::TemporaryPosts,
                Table::Posts,
                Table::Followers,
                Table::Profiles,
            ]
        );
    }

    #[tokio::test]
    async fn test_owned_posts_and_dependents_are_removed() {
        let store = Arc::new(MemoryAccountStore::new());
        for id in ["u1", "u2", "u3"] {
            store.seed_profile(id);
        }
        store.seed_post("p1", "u1");
        store.seed_post("p2", "u1");
        store.seed_post("p3", "u2");
        store.seed_like("l1", "p1", "u2");
        store.seed_like("l2", "p2", "u3");
        store.seed_like("l3", "p3", "u1");
        store.seed_like("l4", "p3", "u3");
        store.seed_comment("c1", "p1", "u3");
        store.seed_comment("c2", "p3", "u1");
        store.seed_shared_post("s1", "p2", "u3");
        store.seed_shared_post("s2", "p3", "u1");
        store.seed_temporary_post("t1", "u1");
        store.seed_temporary_post("t2", "u2");

        service(&store).delete_account("u1").await.unwrap();

        let owned = Filter::is_in(Column::PostId, ["p1", "p2"]);
        assert_eq!(store.count(Table::Likes, &owned), 0);
        assert_eq!(store.count(Table::Comments, &owned), 0);
        assert_eq!(
            store.count(
                Table::SharedPosts,
                &Filter::is_in(Column::OriginalPostId, ["p1", "p2"])
            ),
            0
        );
        assert_eq!(store.count(Table::Posts, &Filter::eq(Column::UserId, "u1")), 0);
        assert_eq!(store.count(Table::Likes, &Filter::eq(Column::UserId, "u1")), 0);

        // Other users' data on other users' posts survives.
        assert_eq!(store.ids(Table::Posts), vec!["p3".to_string()]);
        assert_eq!(store.ids(Table::Likes), vec!["l4".to_string()]);
        assert!(store.ids(Table::Comments).is_empty());
        assert!(store.ids(Table::SharedPosts).is_empty());
        assert_eq!(store.ids(Table::TemporaryPosts), vec!["t2".to_string()]);
        assert_eq!(
            store.ids(Table::Profiles),
            vec!["u2".to_string(), "u3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_follow_edges_removed_in_both_directions() {
        let store = Arc::new(MemoryAccountStore::new());
        for id in ["u1", "u2", "u3"] {
            store.seed_profile(id);
        }
        store.seed_follow("f1", "u1", "u2");
        store.seed_follow("f2", "u3", "u1");
        store.seed_follow("f3", "u2", "u3");

        service(&store).delete_account("u1").await.unwrap();

        let touching = Filter::any(vec![
            Filter::eq(Column::FollowerId, "u1"),
            Filter::eq(Column::FollowedId, "u1"),
        ]);
        assert_eq!(store.count(Table::Followers, &touching), 0);
        assert_eq!(store.ids(Table::Followers), vec!["f3".to_string()]);

        // One request covers both directions.
        let follower_calls = store
            .calls()
            .into_iter()
            .filter(|c| c.table() == Table::Followers)
            .count();
        assert_eq!(follower_calls, 1);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let store = Arc::new(MemoryAccountStore::new());
        store.seed_profile("u1");
        store.seed_profile("u2");
        store.seed_post("p1", "u1");
        store.seed_like("l1", "p1", "u2");
        store.seed_follow("f1", "u2", "u1");

        let service = service(&store);
        service.delete_account("u1").await.unwrap();
        let after_first = store.snapshot();

        service.delete_account("u1").await.unwrap();
        assert_eq!(store.snapshot(), after_first);
    }

    #[tokio::test]
    async fn test_failure_on_comments_on_posts_aborts_remaining_steps() {
        let store = Arc::new(MemoryAccountStore::new());
        store.seed_profile("u1");
        store.seed_post("p1", "u1");
        store.seed_temporary_post("t1", "u1");
        // 0: lookup, 1: likes on posts, 2: own likes, 3: comments on posts
        store.fail_at_call(3);

        let err = service(&store).delete_account("u1").await.unwrap_err();

        assert_eq!(err.step(), Some(CascadeStep::CommentsOnPosts));
        assert!(matches!(err, AccountDeletionError::CommentsOnPosts(_)));
        assert_eq!(err.to_string(), "failed to delete comments on posts");
        assert_eq!(
            called_steps(&store),
            vec![Table::Posts, Table::Likes, Table::Likes, Table::Comments]
        );
        assert_eq!(store.ids(Table::TemporaryPosts), vec!["t1".to_string()]);
        assert_eq!(store.ids(Table::Profiles), vec!["u1".to_string()]);
    }

    #[tokio::test]
    async fn test_retry_after_partial_failure_completes() {
        let store = Arc::new(MemoryAccountStore::new());
        store.seed_profile("u1");
        store.seed_profile("u2");
        store.seed_post("p1", "u1");
        store.seed_comment("c1", "p1", "u2");
        store.seed_follow("f1", "u1", "u2");
        store.fail_at_call(6);

        let service = service(&store);
        let err = service.delete_account("u1").await.unwrap_err();
        assert_eq!(err.step(), Some(CascadeStep::TemporaryPosts));

        store.clear_failure();
        service.delete_account("u1").await.unwrap();

        assert!(store.ids(Table::Posts).is_empty());
        assert!(store.ids(Table::Followers).is_empty());
        assert_eq!(store.ids(Table::Profiles), vec!["u2".to_string()]);
    }

    #[tokio::test]
    async fn test_lookup_failure_is_reported() {
        let store = Arc::new(MemoryAccountStore::new());
        store.seed_profile("u1");
        store.fail_at_call(0);

        let err = service(&store).delete_account("u1").await.unwrap_err();

        assert_eq!(err.step(), Some(CascadeStep::OwnedPostLookup));
        assert_eq!(store.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_profile_failure_is_reported() {
        let store = Arc::new(MemoryAccountStore::new());
        store.seed_profile("u1");
        // No posts: lookup + 7 deletes, profile is the last.
        store.fail_at_call(7);

        let err = service(&store).delete_account("u1").await.unwrap_err();

        assert_eq!(err.step(), Some(CascadeStep::Profile));
        assert_eq!(err.to_string(), "failed to delete profile");
        let app: AppError = err.into();
        assert_eq!(app.error_code(), "ACCOUNT_DELETION_FAILED");
    }

    #[tokio::test]
    async fn test_empty_user_id_is_rejected_before_store() {
        let store = Arc::new(MemoryAccountStore::new());

        let err = service(&store).delete_account("  ").await.unwrap_err();

        assert!(matches!(err, AccountDeletionError::InvalidUserId));
        assert!(store.calls().is_empty());
        assert!(matches!(AppError::from(err), AppError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_scenario_posts_likes_comment_and_share() {
        let store = Arc::new(MemoryAccountStore::new());
        for id in ["u", "u2", "u3", "u4"] {
            store.seed_profile(id);
        }
        store.seed_post("p1", "u");
        store.seed_post("p2", "u");
        store.seed_post("q2", "u2");
        store.seed_like("l1", "p1", "u2");
        store.seed_like("l2", "p1", "u3");
        store.seed_comment("c1", "p1", "u2");
        store.seed_shared_post("s1", "p2", "u4");
        store.seed_like("l3", "q2", "u3");
        store.seed_follow("f1", "u3", "u4");

        service(&store).delete_account("u").await.unwrap();

        assert_eq!(store.ids(Table::Likes), vec!["l3".to_string()]);
        assert!(store.ids(Table::Comments).is_empty());
        assert!(store.ids(Table::SharedPosts).is_empty());
        assert_eq!(store.ids(Table::Posts), vec!["q2".to_string()]);
        assert_eq!(
            store.ids(Table::Profiles),
            vec!["u2".to_string(), "u3".to_string(), "u4".to_string()]
        );
        assert_eq!(store.ids(Table::Followers), vec!["f1".to_string()]);
    }
}
