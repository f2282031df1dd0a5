//! Business logic services.

#![allow(missing_docs)]

pub mod account;
pub mod account_deletion;
pub mod auth;

pub use account::AccountService;
pub use account_deletion::{
    AccountDeletionError, AccountDeletionService, CascadeStep, cascade_plan,
};
pub use auth::{
    AuthGateway, AuthGatewayService, AuthenticatedUser, HttpAuthGateway, NoOpAuthGateway,
};
