//! Driver API Client
//!
//! A Rust client library for the delivery driver API, with bearer authentication,
//! automatic token refresh on 401 and a single normalized error shape for callers.

pub mod api_client;
pub mod config;
pub mod error;
pub mod session;
pub mod token_store;
pub mod types;

pub use api_client::{ApiClient, RequestOptions, SessionEvent};
pub use config::{ClientConfig, Environment};
pub use error::{ApiError, ApiResult, ClientError, Result};
pub use session::AuthSession;
pub use token_store::{CredentialStore, TokenStore};
pub use types::{ApiResponse, AuthPayload, Credential, Pagination};
