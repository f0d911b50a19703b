//! services/client/src/adapters/http/error.rs
//!
//! Error classification for calls made through the [`ApiClient`](super::ApiClient).

use std::time::Duration;

use thiserror::Error;

/// Categories of API failures, as seen by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorCategory {
    /// 401/403. A 401 has already been through the single refresh-and-retry.
    Authentication,
    /// Other 4xx.
    Client,
    /// 5xx.
    Server,
    /// Connection failures and timeouts.
    Network,
    /// The response body could not be decoded into the expected shape.
    Decode,
    /// The client or the request itself is misconfigured.
    Config,
}

/// The uniform failure shape surfaced by the API client.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },

    #[error("{url} returned status {status}{}", format_body(.body))]
    Status { status: u16, url: String, body: String },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Failed to serialize request body: {0}")]
    Serialize(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn format_body(body: &str) -> String {
    if body.is_empty() {
        String::new()
    } else {
        format!(": {}", body)
    }
}

impl ApiError {
    pub fn category(&self) -> ApiErrorCategory {
        match self {
            Self::Status { status, .. } => match status {
                401 | 403 => ApiErrorCategory::Authentication,
                500..=599 => ApiErrorCategory::Server,
                _ => ApiErrorCategory::Client,
            },
            Self::Network(_) | Self::Timeout { .. } => ApiErrorCategory::Network,
            Self::Decode(_) => ApiErrorCategory::Decode,
            Self::Serialize(_) | Self::Config(_) => ApiErrorCategory::Config,
        }
    }

    /// The HTTP status, when the backend answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(401)
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
