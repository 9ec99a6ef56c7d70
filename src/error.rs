use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] tokio_cron_scheduler::JobSchedulerError),

    #[error("Provider error ({provider}): {message}")]
    Provider { provider: &'static str, message: String },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Vector is empty")]
    EmptyVector,

    #[error("Vector has zero magnitude")]
    ZeroMagnitude,

    #[error("No interest profile for user {0}")]
    ProfileNotFound(i64),

    #[error("User {0} not found")]
    UserNotFound(i64),

    #[error("Feed {feed_id} does not belong to user {user_id}")]
    FeedNotOwned { feed_id: i64, user_id: i64 },

    #[error("Episode {0} not found")]
    EpisodeNotFound(i64),

    #[error("No recent articles available for user {0}")]
    NoRecentArticles(i64),

    #[error("Failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("Job queue is closed")]
    QueueClosed,

    /// Every item of a job failed and none of the failures can clear up.
    #[error("{0}")]
    BatchFailed(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn provider(provider: &'static str, message: impl Into<String>) -> Self {
        Self::Provider {
            provider,
            message: message.into(),
        }
    }

    /// Whether a retry has any chance of a different outcome.
    ///
    /// Validation and not-found kinds are deterministic and never retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Http(_)
            | AppError::Provider { .. }
            | AppError::Database(_)
            | AppError::Sqlite(_)
            | AppError::Io(_)
            | AppError::Other(_) => true,
            AppError::Validation(_)
            | AppError::DimensionMismatch { .. }
            | AppError::EmptyVector
            | AppError::ZeroMagnitude
            | AppError::ProfileNotFound(_)
            | AppError::UserNotFound(_)
            | AppError::FeedNotOwned { .. }
            | AppError::EpisodeNotFound(_)
            | AppError::NoRecentArticles(_)
            | AppError::RetriesExhausted { .. }
            | AppError::FeedParse(_)
            | AppError::Json(_)
            | AppError::TomlParse(_)
            | AppError::Config(_)
            | AppError::Scheduler(_)
            | AppError::QueueClosed
            | AppError::BatchFailed(_) => false,
        }
    }

    /// Whether the failure came from conditions that can clear up, including
    /// retries that ran out against such conditions.
    pub fn is_transient(&self) -> bool {
        self.is_retryable() || matches!(self, AppError::RetriesExhausted { .. })
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
