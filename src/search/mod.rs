//! Remote search service access.
//!
//! - **auth**: token store, native/confidential app login, refresh
//! - **client**: search and subject deletion against one index

pub mod auth;
pub mod client;

pub use auth::{AuthClient, AuthError, AuthSettings, TokenStore};
pub use client::{SearchClient, SearchError, SearchQuery, SearchResponse};
