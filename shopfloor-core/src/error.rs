use thiserror::Error;

#[derive(Error, Debug)]
pub enum ShopfloorError {
    #[error("Event {0} not found")]
    NotFound(i64),

    #[error("Event {0} has no stored embedding")]
    MissingEmbedding(i64),

    #[error("Invalid vector: expected {expected} dimensions, got {actual}")]
    InvalidVector { expected: usize, actual: usize },

    #[error("No events available")]
    NoDataAvailable,

    #[error("Question cannot be empty")]
    EmptyQuestion,

    #[error("Generation service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("External lookup failed: {0}")]
    ExternalLookupFailed(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
}

impl ShopfloorError {
    /// Errors caused by the caller's input rather than by the system.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::MissingEmbedding(_)
                | Self::InvalidVector { .. }
                | Self::NoDataAvailable
                | Self::EmptyQuestion
        )
    }
}

pub type Result<T, E = ShopfloorError> = std::result::Result<T, E>;
