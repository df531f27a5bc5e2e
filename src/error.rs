/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// No interaction history to compute from (cold start)
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("External source error: {0}")]
    ExternalSource(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization error: {}", e))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Computation(format!("Background computation aborted: {}", e))
    }
}

pub type AppResult<T> = Result<T, AppError>;
