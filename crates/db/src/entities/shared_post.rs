//! Shared post entity (a user re-sharing someone's post).

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shared_posts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    pub original_post_id: String,

    pub shared_by_user_id: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::post::Entity",
        from = "Column::OriginalPostId",
        to = "super::post::Column::Id",
        on_delete = "NoAction"
    )]
    OriginalPost,

    #[sea_orm(
        belongs_to = "super::profile::Entity",
        from = "Column::SharedByUserId",
        to = "super::profile::Column::Id",
        on_delete = "NoAction"
    )]
    SharedBy,
}

impl ActiveModelBehavior for ActiveModel {}
