//! Daily episode generation for one user or a batch of users.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::ai::EpisodeScriptAssembler;
use crate::audio::{estimate_minutes, AudioGenerator};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::NewEpisode;
use crate::pipeline::ArticleProcessingPipeline;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EpisodeOutcome {
    Created {
        episode_id: i64,
        audio_url: String,
        duration_minutes: u32,
        from_cache: bool,
    },
    /// An episode already exists for the user today.
    AlreadyGenerated,
    /// Nothing recent to talk about.
    NoContent,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EpisodeBatchReport {
    pub created: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    #[serde(skip)]
    pub retryable_errors: usize,
}

pub struct EpisodeGenerator {
    repo: Arc<Repository>,
    pipeline: Option<Arc<ArticleProcessingPipeline>>,
    assembler: EpisodeScriptAssembler,
    audio: AudioGenerator,
}

impl EpisodeGenerator {
    pub fn new(
        repo: Arc<Repository>,
        assembler: EpisodeScriptAssembler,
        audio: AudioGenerator,
    ) -> Self {
        Self {
            repo,
            pipeline: None,
            assembler,
            audio,
        }
    }

    /// Refresh the user's feeds through the pipeline before each episode.
    pub fn with_pipeline(mut self, pipeline: Arc<ArticleProcessingPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub async fn generate_for_user(&self, user_id: i64) -> Result<EpisodeOutcome> {
        let today = Utc::now().date_naive();
        if self.repo.exists_episode_for_user_on_date(user_id, today).await? {
            info!(user_id, %today, "Episode already generated today");
            return Ok(EpisodeOutcome::AlreadyGenerated);
        }

        if let Some(pipeline) = &self.pipeline {
            match pipeline.process_user(user_id).await {
                Ok(result) if !result.success => {
                    warn!(user_id, errors = result.errors.len(), "Feed refresh finished with errors")
                }
                Ok(_) => {}
                Err(e) => warn!(user_id, error = %e, "Feed refresh failed"),
            }
        }

        let draft = match self.assembler.assemble(user_id).await {
            Ok(draft) => draft,
            Err(AppError::NoRecentArticles(_)) => {
                info!(user_id, "No recent articles, skipping episode");
                return Ok(EpisodeOutcome::NoContent);
            }
            Err(e) => return Err(e),
        };

        let audio = self.audio.generate(&draft.script_text).await?;
        let duration_minutes = estimate_minutes(&draft.script_text).min(draft.duration_minutes);

        let episode_id = self
            .repo
            .insert_episode(NewEpisode {
                user_id,
                script_text: draft.script_text,
                audio_url: audio.audio_url.clone(),
                duration_minutes,
                article_ids: draft.article_ids,
            })
            .await?;

        info!(user_id, episode_id, duration_minutes, from_cache = audio.from_cache, "Episode created");
        Ok(EpisodeOutcome::Created {
            episode_id,
            audio_url: audio.audio_url,
            duration_minutes,
            from_cache: audio.from_cache,
        })
    }

    /// Generates for each user in turn; one user's failure never stops the rest.
    pub async fn generate_for_users(&self, user_ids: Option<Vec<i64>>) -> Result<EpisodeBatchReport> {
        let users = self.repo.get_users(user_ids).await?;
        let mut report = EpisodeBatchReport::default();

        for user in users {
            match self.generate_for_user(user.id).await {
                Ok(EpisodeOutcome::Created { .. }) => report.created += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    error!(user_id = user.id, error = %e, "Episode generation failed");
                    if e.is_transient() {
                        report.retryable_errors += 1;
                    }
                    report.errors.push(format!("User {}: {}", user.id, e));
                }
            }
        }
        Ok(report)
    }
}
