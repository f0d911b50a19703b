pub mod domain;
pub mod ports;
pub mod quiz;
pub mod sync;

pub use domain::{
    ApiResponse, AuthSession, AuthUser, Difficulty, EnvelopeError, Flashcard, Output,
    QuizQuestion, Session, SessionInputMeta, SessionSource, SessionStatus, Transform,
    TransformContent, TransformMeta, TransformType,
};
pub use ports::{
    ChangeEvent, ChangeFeed, ChangeFilter, ChangeKind, ChangeStream, CredentialProvider,
    PortError, PortResult, RecordStore, Table,
};
pub use quiz::{Grade, QuizError, QuizPhase, QuizProgress, QuizRunner, QuizSummary};
pub use sync::{FetchGeneration, FetchTicket};
