//! crates/study_assistant_core/src/quiz.rs
//!
//! The quiz runner: a client-local state machine over a generated quiz.
//! All run state is ephemeral and is never written back to the backend.

use std::time::{Duration, Instant};

use crate::domain::QuizQuestion;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuizError {
    #[error("Quiz has no questions")]
    EmptyQuiz,
    #[error("Option {index} is out of range for a question with {options} options")]
    OptionOutOfRange { index: usize, options: usize },
    #[error("No option has been selected")]
    NoSelection,
    #[error("Cannot {action} while the quiz is {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: &'static str,
    },
}

/// Where the runner is within the current question.
#[derive(Debug, Clone, PartialEq)]
pub enum QuizPhase {
    QuestionPending,
    AnswerSelected { option: usize },
    FeedbackShown { selected: usize, correct: bool },
    Finished(QuizSummary),
}

impl QuizPhase {
    fn name(&self) -> &'static str {
        match self {
            QuizPhase::QuestionPending => "waiting for a selection",
            QuizPhase::AnswerSelected { .. } => "waiting for submission",
            QuizPhase::FeedbackShown { .. } => "showing feedback",
            QuizPhase::Finished(_) => "finished",
        }
    }
}

/// One entry of the answer log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerRecord {
    pub question_id: String,
    pub selected_option: usize,
    pub is_correct: bool,
    pub time_spent: Duration,
}

/// Progress reported to whatever renders the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuizProgress {
    /// 1-based.
    pub current_question: usize,
    pub total_questions: usize,
    pub score: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Excellent,
    Good,
    NeedsPractice,
}

impl Grade {
    pub fn label(&self) -> &'static str {
        match self {
            Grade::Excellent => "Excellent!",
            Grade::Good => "Good job!",
            Grade::NeedsPractice => "Keep practicing!",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuizSummary {
    pub score: usize,
    pub total_questions: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub percentage: f64,
    pub time_spent: Duration,
}

impl QuizSummary {
    /// Computes the summary purely from the answer log.
    pub fn from_answers(answers: &[AnswerRecord], total_questions: usize) -> Self {
        let correct = answers.iter().filter(|a| a.is_correct).count();
        let percentage = if total_questions == 0 {
            0.0
        } else {
            correct as f64 / total_questions as f64 * 100.0
        };
        Self {
            score: correct,
            total_questions,
            correct,
            incorrect: total_questions - correct,
            percentage,
            time_spent: answers.iter().map(|a| a.time_spent).sum(),
        }
    }

    pub fn rounded_percentage(&self) -> u32 {
        self.percentage.round() as u32
    }

    pub fn grade(&self) -> Grade {
        if self.percentage >= 80.0 {
            Grade::Excellent
        } else if self.percentage >= 60.0 {
            Grade::Good
        } else {
            Grade::NeedsPractice
        }
    }
}

/// Formats a duration as `m:ss`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}

pub struct QuizRunner {
    questions: Vec<QuizQuestion>,
    current: usize,
    phase: QuizPhase,
    answers: Vec<AnswerRecord>,
    question_started: Instant,
}

impl QuizRunner {
    pub fn new(questions: Vec<QuizQuestion>) -> Result<Self, QuizError> {
        if questions.is_empty() {
            return Err(QuizError::EmptyQuiz);
        }
        Ok(Self {
            questions,
            current: 0,
            phase: QuizPhase::QuestionPending,
            answers: Vec::new(),
            question_started: Instant::now(),
        })
    }

    pub fn phase(&self) -> &QuizPhase {
        &self.phase
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    /// The question being answered, or `None` once finished.
    pub fn current_question(&self) -> Option<&QuizQuestion> {
        match self.phase {
            QuizPhase::Finished(_) => None,
            _ => self.questions.get(self.current),
        }
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn is_last_question(&self) -> bool {
        self.current + 1 == self.questions.len()
    }

    pub fn score(&self) -> usize {
        self.answers.iter().filter(|a| a.is_correct).count()
    }

    pub fn answers(&self) -> &[AnswerRecord] {
        &self.answers
    }

    pub fn progress(&self) -> QuizProgress {
        QuizProgress {
            current_question: (self.current + 1).min(self.questions.len()),
            total_questions: self.questions.len(),
            score: self.score(),
        }
    }

    pub fn summary(&self) -> Option<&QuizSummary> {
        match &self.phase {
            QuizPhase::Finished(summary) => Some(summary),
            _ => None,
        }
    }

    /// Selects (or changes) the option for the current question.
    pub fn select_option(&mut self, index: usize) -> Result<(), QuizError> {
        match self.phase {
            QuizPhase::QuestionPending | QuizPhase::AnswerSelected { .. } => {}
            ref phase => {
                return Err(QuizError::InvalidTransition {
                    action: "select an option",
                    phase: phase.name(),
                })
            }
        }
        let options = self.questions[self.current].options.len();
        if index >= options {
            return Err(QuizError::OptionOutOfRange { index, options });
        }
        self.phase = QuizPhase::AnswerSelected { option: index };
        Ok(())
    }

    /// Evaluates the selected option and shows feedback. Returns whether it was correct.
    pub fn submit_answer(&mut self) -> Result<bool, QuizError> {
        let selected = match self.phase {
            QuizPhase::AnswerSelected { option } => option,
            QuizPhase::QuestionPending => return Err(QuizError::NoSelection),
            ref phase => {
                return Err(QuizError::InvalidTransition {
                    action: "submit an answer",
                    phase: phase.name(),
                })
            }
        };

        let question = &self.questions[self.current];
        let correct = selected == question.correct_answer;
        self.answers.push(AnswerRecord {
            question_id: question.id.clone(),
            selected_option: selected,
            is_correct: correct,
            time_spent: self.question_started.elapsed(),
        });
        self.phase = QuizPhase::FeedbackShown { selected, correct };
        Ok(correct)
    }

    /// Moves past the feedback to the next question, or finishes the run.
    pub fn next_question(&mut self) -> Result<(), QuizError> {
        if !matches!(self.phase, QuizPhase::FeedbackShown { .. }) {
            return Err(QuizError::InvalidTransition {
                action: "advance",
                phase: self.phase.name(),
            });
        }

        if self.is_last_question() {
            let summary = QuizSummary::from_answers(&self.answers, self.questions.len());
            self.phase = QuizPhase::Finished(summary);
        } else {
            self.current += 1;
            self.phase = QuizPhase::QuestionPending;
            self.question_started = Instant::now();
        }
        Ok(())
    }

    /// Resets all run-local state. The quiz itself is kept as loaded.
    pub fn restart(&mut self) {
        self.current = 0;
        self.phase = QuizPhase::QuestionPending;
        self.answers.clear();
        self.question_started = Instant::now();
    }
}
