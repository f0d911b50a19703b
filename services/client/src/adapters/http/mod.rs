//! services/client/src/adapters/http/mod.rs
//!
//! Authenticated HTTP access to the application backend.

pub mod client;
pub mod error;

pub use client::{ApiClient, ApiClientConfig, RequestOptions};
pub use error::{ApiError, ApiErrorCategory};
