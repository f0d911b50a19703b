//! services/client/src/views/quiz.rs
//!
//! Loads the quiz for a session, generating one only when none exists yet.

use study_assistant_core::domain::{ApiResponse, QuizQuestion, Transform};
use study_assistant_core::quiz::QuizRunner;
use tracing::{info, warn};
use uuid::Uuid;

use super::ViewState;
use crate::services::TransformsService;

pub struct QuizView;

impl QuizView {
    pub async fn load(service: &TransformsService, session_id: Uuid) -> ViewState<QuizRunner> {
        let existing = match service.get_quiz(session_id).await {
            Ok(response) => questions_in(response),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                warn!(%session_id, error = %e, "Failed to load quiz");
                return ViewState::Failed(e.to_string());
            }
        };

        let questions = match existing {
            Some(questions) => questions,
            None => {
                info!(%session_id, "No quiz yet, generating one");
                match service.generate_quiz(session_id).await {
                    Ok(response) => match response.into_result() {
                        Ok(transform) => transform
                            .quiz_questions()
                            .map(<[_]>::to_vec)
                            .unwrap_or_default(),
                        Err(e) => return ViewState::Failed(e.to_string()),
                    },
                    Err(e) => {
                        warn!(%session_id, error = %e, "Quiz generation failed");
                        return ViewState::Failed(e.to_string());
                    }
                }
            }
        };

        match QuizRunner::new(questions) {
            Ok(runner) => ViewState::Ready(runner),
            Err(e) => ViewState::Failed(e.to_string()),
        }
    }
}

/// The questions of an existing quiz, or `None` when the backend has none.
fn questions_in(response: ApiResponse<Transform>) -> Option<Vec<QuizQuestion>> {
    response
        .into_result()
        .ok()?
        .quiz_questions()
        .filter(|questions| !questions.is_empty())
        .map(<[_]>::to_vec)
}
