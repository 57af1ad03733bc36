use thiserror::Error;

/// Errors surfaced to callers of the assistant.
///
/// Generation-service faults never appear here: they are absorbed by the
/// scripted fallbacks. Coverage denials and dispatch failures are results, not
/// errors.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("conversation is not ready for dispatch")]
    NotReady,

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("claim not found: {0}")]
    ClaimNotFound(String),

    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Persistence(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
