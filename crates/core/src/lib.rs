//! Core business logic for Poeticverse.

pub mod services;

pub use services::*;
