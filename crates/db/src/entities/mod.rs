//! Database entities.

pub mod comment;
pub mod follower;
pub mod like;
pub mod post;
pub mod profile;
pub mod shared_post;
pub mod temporary_post;

pub use comment::Entity as Comment;
pub use follower::Entity as Follower;
pub use like::Entity as Like;
pub use post::Entity as Post;
pub use profile::Entity as Profile;
pub use shared_post::Entity as SharedPost;
pub use temporary_post::Entity as TemporaryPost;
