//! Test utilities for database operations.
//!
//! Provides helpers for setting up and tearing down test databases, and an
//! in-memory [`AccountStore`](crate::store::AccountStore) double (behind the
//! `test-utils` feature).

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr, Set,
    Statement,
};
use tracing::info;

use crate::entities::{comment, follower, like, post, profile, shared_post, temporary_post};

#[cfg(any(test, feature = "test-utils"))]
pub use memory::{MemoryAccountStore, Row, StoreCall};

/// Test database configuration.
#[derive(Debug, Clone)]
pub struct TestDbConfig {
    /// Database host.
    pub host: String,
    /// Database port.
    pub port: u16,
    /// Database username.
    pub username: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub database: String,
}

impl Default for TestDbConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("TEST_DB_HOST").unwrap_or_else(|_| "localhost".to_string()),
            port: std::env::var("TEST_DB_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5433),
            username: std::env::var("TEST_DB_USER")
                .unwrap_or_else(|_| "poeticverse_test".to_string()),
            password: std::env::var("TEST_DB_PASSWORD")
                .unwrap_or_else(|_| "poeticverse_test".to_string()),
            database: std::env::var("TEST_DB_NAME")
                .unwrap_or_else(|_| "poeticverse_test".to_string()),
        }
    }
}

impl TestDbConfig {
    /// Get the database URL.
    #[must_use]
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }

    /// Get URL for connecting to postgres database (for creating test DB).
    #[must_use]
    pub fn postgres_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/postgres",
            self.username, self.password, self.host, self.port
        )
    }
}

/// A test database context that manages the lifecycle of a test database.
pub struct TestDatabase {
    /// Database connection.
    pub conn: DatabaseConnection,
    /// Database configuration.
    pub config: TestDbConfig,
}

impl TestDatabase {
    /// Connect with custom configuration.
    pub async fn with_config(config: TestDbConfig) -> Result<Self, DbErr> {
        let conn = Database::connect(&config.database_url()).await?;

        info!(database = %config.database, "Connected to test database");

        Ok(Self { conn, config })
    }

    /// Create a uniquely named test database (for parallel tests) and run
    /// migrations on it.
    pub async fn create_unique() -> Result<Self, DbErr> {
        use sea_orm_migration::MigratorTrait;

        let mut config = TestDbConfig::default();
        let unique_suffix = uuid::Uuid::new_v4().simple().to_string();
        config.database = format!("poeticverse_test_{}", &unique_suffix[..8]);

        let postgres_conn = Database::connect(&config.postgres_url()).await?;
        let create_db = format!("CREATE DATABASE \"{}\"", config.database);
        postgres_conn
            .execute(Statement::from_string(DatabaseBackend::Postgres, create_db))
            .await?;
        postgres_conn.close().await?;

        let conn = Database::connect(&config.database_url()).await?;
        crate::migrations::Migrator::up(&conn, None).await?;

        info!(database = %config.database, "Created unique test database");

        Ok(Self { conn, config })
    }

    /// Get the database connection.
    #[must_use]
    pub const fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Insert a profile whose username is derived from its id.
    pub async fn seed_profile(&self, id: &str) -> Result<(), DbErr> {
        profile::ActiveModel {
            id: Set(id.to_string()),
            username: Set(format!("user_{id}")),
            bio: Set(None),
            profile_picture: Set(None),
            created_at: Set(Utc::now().into()),
        }
        .insert(&self.conn)
        .await?;
        Ok(())
    }

    pub async fn seed_post(&self, id: &str, user_id: &str) -> Result<(), DbErr> {
        post::ActiveModel {
            id: Set(id.to_string()),
            user_id: Set(user_id.to_string()),
            title: Set(None),
            content: Set(format!("poem {id}")),
            image_url: Set(None),
            created_at: Set(Utc::now().into()),
        }
        .insert(&self.conn)
        .await?;
        Ok(())
    }

    pub async fn seed_like(&self, id: &str, post_id: &str, user_id: &str) -> Result<(), DbErr> {
        like::ActiveModel {
            id: Set(id.to_string()),
            post_id: Set(post_id.to_string()),
            user_id: Set(user_id.to_string()),
            created_at: Set(Utc::now().into()),
        }
        .insert(&self.conn)
        .await?;
        Ok(())
    }

    pub async fn seed_comment(&self, id: &str, post_id: &str, user_id: &str) -> Result<(), DbErr> {
        comment::ActiveModel {
            id: Set(id.to_string()),
            post_id: Set(post_id.to_string()),
            user_id: Set(user_id.to_string()),
            content: Set(format!("comment {id}")),
            created_at: Set(Utc::now().into()),
        }
        .insert(&self.conn)
        .await?;
        Ok(())
    }

    pub async fn seed_shared_post(
        &self,
        id: &str,
        original_post_id: &str,
        shared_by_user_id: &str,
    ) -> Result<(), DbErr> {
        shared_post::ActiveModel {
            id: Set(id.to_string()),
            original_post_id: Set(original_post_id.to_string()),
            shared_by_user_id: Set(shared_by_user_id.to_string()),
            created_at: Set(Utc::now().into()),
        }
        .insert(&self.conn)
        .await?;
        Ok(())
    }

    /// Insert a temporary post expiring in a day.
    pub async fn seed_temporary_post(&self, id: &str, user_id: &str) -> Result<(), DbErr> {
        let now = Utc::now();
        temporary_post::ActiveModel {
            id: Set(id.to_string()),
            user_id: Set(user_id.to_string()),
            content: Set(format!("fleeting {id}")),
            expires_at: Set((now + Duration::days(1)).into()),
            created_at: Set(now.into()),
        }
        .insert(&self.conn)
        .await?;
        Ok(())
    }

    pub async fn seed_follow(
        &self,
        id: &str,
        follower_id: &str,
        followed_id: &str,
    ) -> Result<(), DbErr> {
        follower::ActiveModel {
            id: Set(id.to_string()),
            follower_id: Set(follower_id.to_string()),
            followed_id: Set(followed_id.to_string()),
            created_at: Set(Utc::now().into()),
        }
        .insert(&self.conn)
        .await?;
        Ok(())
    }

    /// Drop the test database. Consumes self because the connection must be
    /// closed first.
    pub async fn drop_database(self) -> Result<(), DbErr> {
        self.conn.close().await?;

        let postgres_conn = Database::connect(&self.config.postgres_url()).await?;

        let terminate = format!(
            "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = '{}'",
            self.config.database
        );
        postgres_conn
            .execute(Statement::from_string(DatabaseBackend::Postgres, terminate))
            .await
            .ok();

        let drop_db = format!("DROP DATABASE IF EXISTS \"{}\"", self.config.database);
        postgres_conn
            .execute(Statement::from_string(DatabaseBackend::Postgres, drop_db))
            .await?;

        postgres_conn.close().await?;

        info!(database = %self.config.database, "Dropped test database");
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Mutex, MutexGuard, PoisonError};

    use async_trait::async_trait;

    use crate::store::{AccountStore, Column, Filter, StoreError, Table};

    /// A row in the in-memory store.
    pub type Row = BTreeMap<Column, String>;

    /// A call received by [`MemoryAccountStore`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StoreCall {
        SelectIds { table: Table, filter: Filter },
        Delete { table: Table, filter: Filter },
    }

    impl StoreCall {
        /// Table the call addressed.
        #[must_use]
        pub const fn table(&self) -> Table {
            match self {
                Self::SelectIds { table, .. } | Self::Delete { table, .. } => *table,
            }
        }
    }

    /// Foreign keys enforced on delete: (child table, child column, parent table).
    /// Every parent is referenced through its `id` column.
    const REFERENCES: &[(Table, Column, Table)] = &[
        (Table::Posts, Column::UserId, Table::Profiles),
        (Table::Likes, Column::PostId, Table::Posts),
        (Table::Likes, Column::UserId, Table::Profiles),
        (Table::Comments, Column::PostId, Table::Posts),
        (Table::Comments, Column::UserId, Table::Profiles),
        (Table::SharedPosts, Column::OriginalPostId, Table::Posts),
        (Table::SharedPosts, Column::SharedByUserId, Table::Profiles),
        (Table::TemporaryPosts, Column::UserId, Table::Profiles),
        (Table::Followers, Column::FollowerId, Table::Profiles),
        (Table::Followers, Column::FollowedId, Table::Profiles),
    ];

    #[derive(Default)]
    struct State {
        rows: HashMap<Table, Vec<Row>>,
        calls: Vec<StoreCall>,
        fail_at: Option<usize>,
    }

    /// In-memory [`AccountStore`] that records every call, enforces the
    /// schema's foreign keys on delete, and can be told to fail a given call.
    #[derive(Default)]
    pub struct MemoryAccountStore {
        state: Mutex<State>,
    }

    impl MemoryAccountStore {
        /// Create an empty store.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        fn state(&self) -> MutexGuard<'_, State> {
            self.state.lock().unwrap_or_else(PoisonError::into_inner)
        }

        /// Insert a row.
        pub fn insert<'a, I>(&self, table: Table, columns: I)
        where
            I: IntoIterator<Item = (Column, &'a str)>,
        {
            let row = columns
                .into_iter()
                .map(|(column, value)| (column, value.to_string()))
                .collect();
            self.state().rows.entry(table).or_default().push(row);
        }

        /// Insert a profile.
        pub fn seed_profile(&self, id: &str) {
            self.insert(Table::Profiles, [(Column::Id, id)]);
        }

        /// Insert a post owned by `user_id`.
        pub fn seed_post(&self, id: &str, user_id: &str) {
            self.insert(Table::Posts, [(Column::Id, id), (Column::UserId, user_id)]);
        }

        /// Insert a like on `post_id` by `user_id`.
        pub fn seed_like(&self, id: &str, post_id: &str, user_id: &str) {
            self.insert(
                Table::Likes,
                [(Column::Id, id), (Column::PostId, post_id), (Column::UserId, user_id)],
            );
        }

        /// Insert a comment on `post_id` by `user_id`.
        pub fn seed_comment(&self, id: &str, post_id: &str, user_id: &str) {
            self.insert(
                Table::Comments,
                [(Column::Id, id), (Column::PostId, post_id), (Column::UserId, user_id)],
            );
        }

        /// Insert a share of `original_post_id` by `shared_by_user_id`.
        pub fn seed_shared_post(&self, id: &str, original_post_id: &str, shared_by_user_id: &str) {
            self.insert(
                Table::SharedPosts,
                [
                    (Column::Id, id),
                    (Column::OriginalPostId, original_post_id),
                    (Column::SharedByUserId, shared_by_user_id),
                ],
            );
        }

        /// Insert a temporary post owned by `user_id`.
        pub fn seed_temporary_post(&self, id: &str, user_id: &str) {
            self.insert(
                Table::TemporaryPosts,
                [(Column::Id, id), (Column::UserId, user_id)],
            );
        }

        /// Insert a follow edge `follower_id -> followed_id`.
        pub fn seed_follow(&self, id: &str, follower_id: &str, followed_id: &str) {
            self.insert(
                Table::Followers,
                [
                    (Column::Id, id),
                    (Column::FollowerId, follower_id),
                    (Column::FollowedId, followed_id),
                ],
            );
        }

        /// Make the `index`-th call (zero-based, counting every call received
        /// so far) fail with [`StoreError::Unavailable`].
        pub fn fail_at_call(&self, index: usize) {
            self.state().fail_at = Some(index);
        }

        /// Clear any injected failure.
        pub fn clear_failure(&self) {
            self.state().fail_at = None;
        }

        /// Calls received so far, in order.
        #[must_use]
        pub fn calls(&self) -> Vec<StoreCall> {
            self.state().calls.clone()
        }

        /// Rows currently in `table`.
        #[must_use]
        pub fn rows(&self, table: Table) -> Vec<Row> {
            self.state().rows.get(&table).cloned().unwrap_or_default()
        }

        /// Ids of the rows currently in `table`.
        #[must_use]
        pub fn ids(&self, table: Table) -> Vec<String> {
            self.rows(table)
                .into_iter()
                .filter_map(|mut row| row.remove(&Column::Id))
                .collect()
        }

        /// Number of rows in `table` matching `filter`.
        #[must_use]
        pub fn count(&self, table: Table, filter: &Filter) -> usize {
            self.rows(table)
                .iter()
                .filter(|row| filter.matches(&|c: Column| row.get(&c).map(String::as_str)))
                .count()
        }

        /// Snapshot of every table, for before/after comparisons.
        #[must_use]
        pub fn snapshot(&self) -> BTreeMap<Table, Vec<Row>> {
            self.state()
                .rows
                .iter()
                .map(|(table, rows)| (*table, rows.clone()))
                .collect()
        }

        fn record(state: &mut State, call: StoreCall) -> Result<(), StoreError> {
            let index = state.calls.len();
            let table = call.table();
            state.calls.push(call);
            if state.fail_at == Some(index) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure on call {index} ({table})"
                )));
            }
            Ok(())
        }
    }

    fn matching(rows: &[Row], filter: &Filter) -> Vec<usize> {
        rows.iter()
            .enumerate()
            .filter(|(_, row)| filter.matches(&|c: Column| row.get(&c).map(String::as_str)))
            .map(|(i, _)| i)
            .collect()
    }

    #[async_trait]
    impl AccountStore for MemoryAccountStore {
        async fn select_ids(
            &self,
            table: Table,
            filter: &Filter,
        ) -> Result<Vec<String>, StoreError> {
            let mut state = self.state();
            Self::record(
                &mut state,
                StoreCall::SelectIds {
                    table,
                    filter: filter.clone(),
                },
            )?;

            let rows = state.rows.get(&table).map(Vec::as_slice).unwrap_or_default();
            Ok(matching(rows, filter)
                .into_iter()
                .filter_map(|i| rows[i].get(&Column::Id).cloned())
                .collect())
        }

        async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, StoreError> {
            let mut state = self.state();
            Self::record(
                &mut state,
                StoreCall::Delete {
                    table,
                    filter: filter.clone(),
                },
            )?;

            let rows = state.rows.get(&table).map(Vec::as_slice).unwrap_or_default();
            let doomed = matching(rows, filter);
            let doomed_ids: Vec<&str> = doomed
                .iter()
                .filter_map(|&i| rows[i].get(&Column::Id).map(String::as_str))
                .collect();

            for (child, column, parent) in REFERENCES {
                if *parent != table {
                    continue;
                }
                let referenced = state.rows.get(child).is_some_and(|children| {
                    children.iter().any(|row| {
                        row.get(column)
                            .is_some_and(|v| doomed_ids.contains(&v.as_str()))
                    })
                });
                if referenced {
                    return Err(StoreError::Constraint(format!(
                        "{table} rows are still referenced by {child}.{column}"
                    )));
                }
            }

            let removed = doomed.len() as u64;
            if let Some(rows) = state.rows.get_mut(&table) {
                let mut index = 0;
                rows.retain(|_| {
                    let keep = !doomed.contains(&index);
                    index += 1;
                    keep
                });
            }
            Ok(removed)
        }
    }

    #[cfg(test)]
    #[allow(clippy::unwrap_used)]
    mod tests {
        use super::*;

        #[tokio::test]
        async fn test_delete_respects_foreign_keys() {
            let store = MemoryAccountStore::new();
            store.seed_profile("u1");
            store.seed_post("p1", "u1");

            let err = store
                .delete(Table::Profiles, &Filter::eq(Column::Id, "u1"))
                .await
                .unwrap_err();
            assert!(matches!(err, StoreError::Constraint(_)));
            assert_eq!(store.ids(Table::Profiles), vec!["u1".to_string()]);

            store
                .delete(Table::Posts, &Filter::eq(Column::UserId, "u1"))
                .await
                .unwrap();
            let removed = store
                .delete(Table::Profiles, &Filter::eq(Column::Id, "u1"))
                .await
                .unwrap();
            assert_eq!(removed, 1);
        }

        #[tokio::test]
        async fn test_injected_failure_is_recorded() {
            let store = MemoryAccountStore::new();
            store.fail_at_call(1);

            store
                .select_ids(Table::Posts, &Filter::eq(Column::UserId, "u1"))
                .await
                .unwrap();
            let err = store
                .delete(Table::Likes, &Filter::eq(Column::UserId, "u1"))
                .await
                .unwrap_err();

            assert!(matches!(err, StoreError::Unavailable(_)));
            assert_eq!(store.calls().len(), 2);
            assert_eq!(store.calls()[1].table(), Table::Likes);
        }

        #[tokio::test]
        async fn test_delete_nothing_is_success() {
            let store = MemoryAccountStore::new();
            let removed = store
                .delete(Table::Comments, &Filter::eq(Column::UserId, "ghost"))
                .await
                .unwrap();
            assert_eq!(removed, 0);
        }
    }
}
