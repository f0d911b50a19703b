//! crates/study_assistant_core/src/domain.rs
//!
//! Defines the core data structures for the application.
//! Every durable record is owned by the hosted backend; these structs are the
//! client's transient, invalidate-and-refetch copies of them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

//=========================================================================================
// Sessions and Outputs
//=========================================================================================

/// A user's content-processing unit: one upload and everything derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub title: Option<String>,
    pub source: SessionSource,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub input_meta: SessionInputMeta,
    #[serde(default)]
    pub is_manual: Option<bool>,
    #[serde(default)]
    pub raw_content: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Session {
    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.trim().is_empty() => title,
            _ => "Untitled Session",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSource {
    Pdf,
    Text,
    Audio,
    Youtube,
    Manual,
}

impl SessionSource {
    pub fn label(&self) -> &'static str {
        match self {
            SessionSource::Pdf => "Document",
            SessionSource::Text => "Text",
            SessionSource::Audio => "Audio",
            SessionSource::Youtube => "Video",
            SessionSource::Manual => "Manual entry",
        }
    }
}

/// Lifecycle status. Transitions are driven by the backend; the client only observes them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Processing,
    Completed,
    Failed,
    Archived,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Processing => "Processing",
            SessionStatus::Completed => "Completed",
            SessionStatus::Failed => "Failed",
            SessionStatus::Archived => "Archived",
        }
    }
}

/// Free-form metadata describing the original input of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInputMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Extracted and cleaned text produced from a session's raw input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    pub id: Uuid,
    pub session_id: Uuid,
    #[serde(default)]
    pub raw_text: Option<String>,
    #[serde(default)]
    pub clean_text: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    /// Used by the backend for change detection.
    #[serde(default)]
    pub content_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Output {
    /// The text to show for this output: cleaned text first, then raw text.
    pub fn display_text(&self) -> Option<&str> {
        [self.clean_text.as_deref(), self.raw_text.as_deref()]
            .into_iter()
            .flatten()
            .find(|text| !text.is_empty())
    }
}

//=========================================================================================
// Transforms
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformType {
    Summary,
    Quiz,
    Flashcards,
}

impl TransformType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransformType::Summary => "summary",
            TransformType::Quiz => "quiz",
            TransformType::Flashcards => "flashcards",
        }
    }
}

/// A generated artifact (summary, quiz, or flashcards) derived from a session's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub id: Uuid,
    pub session_id: Uuid,
    pub user_id: Uuid,
    #[serde(default)]
    pub output_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub transform_type: TransformType,
    #[serde(default)]
    pub content: Option<TransformContent>,
    #[serde(default)]
    pub result: Option<TransformContent>,
    #[serde(default)]
    pub meta: TransformMeta,
    pub created_at: DateTime<Utc>,
}

impl Transform {
    /// Quiz questions carried by this transform. The generation result wins over the
    /// request content when both are present.
    pub fn quiz_questions(&self) -> Option<&[QuizQuestion]> {
        [self.result.as_ref(), self.content.as_ref()]
            .into_iter()
            .flatten()
            .find_map(|c| c.questions.as_deref())
    }
}

/// Generation payload, shaped per transform type. Fields not used by a type are absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformContent {
    // Quiz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questions: Option<Vec<QuizQuestion>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    // Flashcards
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cards: Option<Vec<Flashcard>>,

    // Summary
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_points: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_reading_time: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuizQuestion {
    pub id: String,
    pub question: String,
    pub options: Vec<String>,
    /// Index into `options`.
    pub correct_answer: usize,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flashcard {
    pub id: String,
    pub front: String,
    pub back: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub category: Option<String>,
}

//=========================================================================================
// Response Envelope
//=========================================================================================

/// The uniform `{ success, data, error, message }` wrapper returned by the backend API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Raised when an envelope does not carry a usable payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Request was rejected: {0}")]
    Rejected(String),
    #[error("Response did not contain data")]
    MissingData,
}

impl<T> ApiResponse<T> {
    /// Unwraps the payload, treating `success=false` or an absent payload as a failure.
    pub fn into_result(self) -> Result<T, EnvelopeError> {
        if !self.success {
            let reason = self
                .error
                .or(self.message)
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(EnvelopeError::Rejected(reason));
        }
        self.data.ok_or(EnvelopeError::MissingData)
    }
}

//=========================================================================================
// Authentication
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// An authenticated session with the identity provider. Not to be confused with [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

//=========================================================================================
// Presentation Helpers
//=========================================================================================

/// Formats `then` relative to `now` the way the session list shows timestamps.
pub fn format_relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(then);
    if elapsed < Duration::minutes(1) {
        return "Just now".to_string();
    }
    if elapsed < Duration::hours(1) {
        return format!("{}m ago", elapsed.num_minutes());
    }
    if elapsed < Duration::days(1) {
        return format!("{}h ago", elapsed.num_hours());
    }
    if elapsed < Duration::days(7) {
        return format!("{}d ago", elapsed.num_days());
    }
    then.format("%Y-%m-%d").to_string()
}
