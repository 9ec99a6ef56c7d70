//! Typed background jobs: queue, workers, handlers and in-memory history.

mod history;
mod queue;
mod runner;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub use history::{JobHistory, JobRecord, JobStatus};
pub use queue::{JobHandler, JobQueue};
pub use runner::{JobReport, PipelineJobs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobType {
    FetchArticles,
    SummarizeArticles,
    GenerateEmbeddings,
    GenerateEpisodes,
}

impl JobType {
    pub const ALL: [JobType; 4] = [
        JobType::FetchArticles,
        JobType::SummarizeArticles,
        JobType::GenerateEmbeddings,
        JobType::GenerateEpisodes,
    ];

    /// Jobs of this type allowed to run at once.
    pub fn concurrency(self) -> usize {
        match self {
            JobType::FetchArticles => 1,
            JobType::SummarizeArticles => 2,
            JobType::GenerateEmbeddings => 2,
            // Serialized to bound concurrent LLM and TTS spend.
            JobType::GenerateEpisodes => 1,
        }
    }

    pub fn max_attempts(self) -> u32 {
        match self {
            JobType::FetchArticles => 5,
            _ => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobType::FetchArticles => "fetch-articles",
            JobType::SummarizeArticles => "summarize-articles",
            JobType::GenerateEmbeddings => "generate-embeddings",
            JobType::GenerateEpisodes => "generate-episodes",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("unknown job type '{}'", s)))
    }
}

/// Optional id lists that scope a run; `None` means all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_ids: Option<Vec<i64>>,
}

impl JobPayload {
    pub fn for_users(user_ids: Vec<i64>) -> Self {
        Self {
            user_ids: Some(user_ids),
            ..Default::default()
        }
    }
}
