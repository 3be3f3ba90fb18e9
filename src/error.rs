use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("sign in first")]
    NotSignedIn,
    #[error("event not found: {0}")]
    NotFound(String),
    #[error("remote operation failed: {0}")]
    Remote(String),
    #[error("archived {copied} events, but they were not removed from the live table: {message}")]
    PartialArchive { copied: usize, message: String },
    #[error("local store error: {0}")]
    Store(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<reqwest::Error> for AdminError {
    fn from(err: reqwest::Error) -> Self {
        AdminError::Remote(err.to_string())
    }
}

pub type AdminResult<T> = Result<T, AdminError>;
