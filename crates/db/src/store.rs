//! Store-client abstraction for bulk account data removal.
//!
//! The account deletion cascade talks to the relational store only through
//! [`AccountStore`]: a `select_ids` lookup and a filtered `delete`. Tables and
//! columns are typed so a step can only name columns that exist; the sea-orm
//! implementation resolves them against the entity definitions.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QuerySelect,
};
use thiserror::Error;
use tracing::debug;

use crate::entities::{
    Comment, Follower, Like, Post, Profile, SharedPost, TemporaryPost,
};

/// Tables touched by account data removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Profiles,
    Posts,
    Likes,
    Comments,
    SharedPosts,
    TemporaryPosts,
    Followers,
}

impl Table {
    /// Table name in the relational store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Profiles => "profiles",
            Self::Posts => "posts",
            Self::Likes => "likes",
            Self::Comments => "comments",
            Self::SharedPosts => "shared_posts",
            Self::TemporaryPosts => "temporary_posts",
            Self::Followers => "followers",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Columns used in deletion filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Column {
    Id,
    UserId,
    PostId,
    OriginalPostId,
    SharedByUserId,
    FollowerId,
    FollowedId,
}

impl Column {
    /// Column name in the relational store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::UserId => "user_id",
            Self::PostId => "post_id",
            Self::OriginalPostId => "original_post_id",
            Self::SharedByUserId => "shared_by_user_id",
            Self::FollowerId => "follower_id",
            Self::FollowedId => "followed_id",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row predicate for a select or delete request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `column = value`
    Eq(Column, String),
    /// `column IN (values)`
    In(Column, Vec<String>),
    /// Logical OR of the inner filters, sent as one request.
    Any(Vec<Filter>),
}

impl Filter {
    /// `column = value`
    pub fn eq(column: Column, value: impl Into<String>) -> Self {
        Self::Eq(column, value.into())
    }

    /// `column IN (values)`
    pub fn is_in<I, S>(column: Column, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::In(column, values.into_iter().map(Into::into).collect())
    }

    /// OR across `filters`.
    #[must_use]
    pub const fn any(filters: Vec<Self>) -> Self {
        Self::Any(filters)
    }

    /// Evaluate the filter against a row, given a column lookup.
    pub fn matches<'a, F>(&self, get: &F) -> bool
    where
        F: Fn(Column) -> Option<&'a str>,
    {
        match self {
            Self::Eq(column, value) => get(*column) == Some(value.as_str()),
            Self::In(column, values) => {
                get(*column).is_some_and(|v| values.iter().any(|candidate| candidate == v))
            }
            Self::Any(filters) => filters.iter().any(|f| f.matches(get)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq(column, value) => write!(f, "{column} = {value}"),
            Self::In(column, values) => write!(f, "{column} IN ({})", values.join(", ")),
            Self::Any(filters) => {
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    write!(f, "{filter}")?;
                }
                Ok(())
            }
        }
    }
}

/// Errors reported by an [`AccountStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] DbErr),

    #[error("table {table} has no column {column}")]
    UnknownColumn { table: Table, column: Column },

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Relational store client used by the account deletion cascade.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Return the `id` of every row in `table` matching `filter`.
    async fn select_ids(&self, table: Table, filter: &Filter) -> Result<Vec<String>, StoreError>;

    /// Delete every row in `table` matching `filter`, returning the number of
    /// rows removed. Matching nothing is success.
    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, StoreError>;
}

/// Shared handle to a store client.
pub type SharedAccountStore = Arc<dyn AccountStore>;

/// [`AccountStore`] backed by a sea-orm connection.
#[derive(Clone)]
pub struct SeaOrmAccountStore {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmAccountStore {
    /// Create a new sea-orm backed store.
    #[must_use]
    pub const fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn select_ids_in<E>(&self, table: Table, filter: &Filter) -> Result<Vec<String>, StoreError>
    where
        E: EntityTrait,
    {
        let id = resolve_column::<E>(table, Column::Id)?;
        let ids = E::find()
            .select_only()
            .column(id)
            .filter(condition::<E>(table, filter)?)
            .into_tuple::<String>()
            .all(self.db.as_ref())
            .await?;

        debug!(table = %table, filter = %filter, count = ids.len(), "Selected ids");
        Ok(ids)
    }

    async fn delete_in<E>(&self, table: Table, filter: &Filter) -> Result<u64, StoreError>
    where
        E: EntityTrait,
    {
        let result = E::delete_many()
            .filter(condition::<E>(table, filter)?)
            .exec(self.db.as_ref())
            .await?;

        debug!(
            table = %table,
            filter = %filter,
            rows_affected = result.rows_affected,
            "Deleted rows"
        );
        Ok(result.rows_affected)
    }
}

#[async_trait]
impl AccountStore for SeaOrmAccountStore {
    async fn select_ids(&self, table: Table, filter: &Filter) -> Result<Vec<String>, StoreError> {
        match table {
            Table::Profiles => self.select_ids_in::<Profile>(table, filter).await,
            Table::Posts => self.select_ids_in::<Post>(table, filter).await,
            Table::Likes => self.select_ids_in::<Like>(table, filter).await,
            Table::Comments => self.select_ids_in::<Comment>(table, filter).await,
            Table::SharedPosts => self.select_ids_in::<SharedPost>(table, filter).await,
            Table::TemporaryPosts => self.select_ids_in::<TemporaryPost>(table, filter).await,
            Table::Followers => self.select_ids_in::<Follower>(table, filter).await,
        }
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, StoreError> {
        match table {
            Table::Profiles => self.delete_in::<Profile>(table, filter).await,
            Table::Posts => self.delete_in::<Post>(table, filter).await,
            Table::Likes => self.delete_in::<Like>(table, filter).await,
            Table::Comments => self.delete_in::<Comment>(table, filter).await,
            Table::SharedPosts => self.delete_in::<SharedPost>(table, filter).await,
            Table::TemporaryPosts => self.delete_in::<TemporaryPost>(table, filter).await,
            Table::Followers => self.delete_in::<Follower>(table, filter).await,
        }
    }
}

fn resolve_column<E: EntityTrait>(table: Table, column: Column) -> Result<E::Column, StoreError> {
    E::Column::from_str(column.as_str()).map_err(|_| StoreError::UnknownColumn { table, column })
}

fn condition<E: EntityTrait>(table: Table, filter: &Filter) -> Result<Condition, StoreError> {
    let cond = match filter {
        Filter::Eq(column, value) => {
            Condition::all().add(resolve_column::<E>(table, *column)?.eq(value.as_str()))
        }
        Filter::In(column, values) => Condition::all().add(
            resolve_column::<E>(table, *column)?.is_in(values.iter().map(String::as_str)),
        ),
        Filter::Any(filters) => {
            let mut any = Condition::any();
            for inner in filters {
                any = any.add(condition::<E>(table, inner)?);
            }
            any
        }
    };
    Ok(cond)
}
