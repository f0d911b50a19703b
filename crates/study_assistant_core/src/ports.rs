//! crates/study_assistant_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the external collaborators of the client.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the hosted identity provider, database, and change feed.

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use uuid::Uuid;

use crate::domain::{Output, Session};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Credentials
//=========================================================================================

/// Read access to the current authentication session, plus the one operation that
/// may rotate it. Implementations own the token; callers never cache it beyond one request.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// The current access token, or `None` when signed out or expired.
    async fn access_token(&self) -> Option<String>;

    /// Asks the identity provider for a new access token.
    ///
    /// `Ok(None)` means the refresh completed but yielded no usable token.
    async fn refresh(&self) -> PortResult<Option<String>>;
}

//=========================================================================================
// Hosted Records
//=========================================================================================

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// The newest `limit` sessions owned by `user_id`, newest first.
    async fn list_sessions(&self, user_id: Uuid, limit: usize) -> PortResult<Vec<Session>>;

    async fn get_session(&self, session_id: Uuid) -> PortResult<Session>;

    /// The output of a session, if one has been produced yet.
    async fn get_output(&self, session_id: Uuid) -> PortResult<Option<Output>>;
}

//=========================================================================================
// Change Feed
//=========================================================================================

/// Tables that emit change notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Sessions,
    Outputs,
    Transforms,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Sessions => "sessions",
            Table::Outputs => "outputs",
            Table::Transforms => "transforms",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sessions" => Some(Table::Sessions),
            "outputs" => Some(Table::Outputs),
            "transforms" => Some(Table::Transforms),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// An equality filter: rows of `table` where `column = value`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    pub table: Table,
    pub column: String,
    pub value: String,
}

impl ChangeFilter {
    pub fn new(table: Table, column: impl Into<String>, value: impl ToString) -> Self {
        Self {
            table,
            column: column.into(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ChangeFilter {
    /// Renders the filter in the `column=eq.value` form understood by the backend.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.column, self.value)
    }
}

/// A single row-level change notification.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub record: Option<Value>,
    pub old_record: Option<Value>,
}

/// Notifications for one subscription, in the order the backend emitted them.
/// Dropping the stream releases the subscription.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(&self, filter: ChangeFilter) -> PortResult<ChangeStream>;
}
