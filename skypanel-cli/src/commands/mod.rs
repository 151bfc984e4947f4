//! CLI command implementations.

pub mod cache;
pub mod feed;
pub mod followers;
pub mod login;
pub mod search;
pub mod session;
