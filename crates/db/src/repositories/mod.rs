use thiserror::Error;
use ticketdesk_core::transcripts::TranscriptHandlerError;

pub mod file;
pub mod transcript;

pub use file::JsonFileTranscriptStore;
pub use transcript::{SqlTranscriptStore, TranscriptSummary};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for RepositoryError {
    fn from(error: serde_json::Error) -> Self {
        Self::Decode(error.to_string())
    }
}

impl From<RepositoryError> for TranscriptHandlerError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Decode(message) => Self::Encoding(message),
            other => Self::Storage(other.to_string()),
        }
    }
}
