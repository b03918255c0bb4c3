//! Refetch Reddit - submission lookup through the Reddit OAuth API
//!
//! Implements [`refetch_core::RecordClient`] over `/api/info`, authenticated
//! with a script app's password grant.

pub mod auth;
pub mod client;
pub mod listing;

pub use auth::Credentials;
pub use client::{Endpoints, MAX_INFO_BATCH, RateLimit, RedditClient};
