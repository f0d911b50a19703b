//! services/client/src/error.rs
//!
//! Defines the primary error type for the client service.

use crate::adapters::auth::AuthError;
use crate::adapters::http::ApiError;
use crate::config::ConfigError;
use study_assistant_core::domain::EnvelopeError;
use study_assistant_core::ports::PortError;
use study_assistant_core::quiz::QuizError;

/// The primary error type for the `client` service and its binaries.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Represents an error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Represents an error that propagated up from one of the core service ports.
    #[error("Service Port Error: {0}")]
    Port(#[from] PortError),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// A backend response envelope that reported failure or carried no data.
    #[error("API response error: {0}")]
    Envelope(#[from] EnvelopeError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Quiz error: {0}")]
    Quiz(#[from] QuizError),

    /// Represents a standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrapped_errors_keep_their_message() {
        let err: ClientError = QuizError::EmptyQuiz.into();
        assert_eq!(err.to_string(), "Quiz error: Quiz has no questions");

        let err: ClientError = PortError::NotFound("Session 1".to_string()).into();
        assert_eq!(err.to_string(), "Service Port Error: Item not found: Session 1");
    }
}
