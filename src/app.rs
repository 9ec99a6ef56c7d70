//! Wiring from configuration to the running services.

use std::sync::Arc;

use chrono::Duration;
use tracing::{info, warn};

use crate::ai::{EpisodeScriptAssembler, Summarizer};
use crate::audio::AudioGenerator;
use crate::config::Config;
use crate::db::{Repository, SearchScope};
use crate::embedding::EmbeddingService;
use crate::episode::EpisodeGenerator;
use crate::error::{AppError, Result};
use crate::feed::{validate_feed_url, FeedFetcher};
use crate::jobs::{JobHistory, JobPayload, JobQueue, JobReport, JobType, PipelineJobs};
use crate::models::{Article, NewFeed, Tier, UserPreferences};
use crate::pipeline::{ArticleProcessingPipeline, PipelineResult};
use crate::profile::InterestProfileManager;
use crate::providers::{LocalBlobStorage, OpenAiClient};
use crate::retry::RetryPolicy;
use crate::scheduler::BriefingScheduler;

/// Everything that needs provider credentials.
struct Services {
    embeddings: EmbeddingService,
    profiles: Arc<InterestProfileManager>,
    pipeline: Arc<ArticleProcessingPipeline>,
    jobs: Arc<PipelineJobs>,
}

pub struct App {
    config: Config,
    pub repository: Arc<Repository>,
    fetcher: Arc<FeedFetcher>,
    services: Option<Services>,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let repository = Arc::new(Repository::new(&config.db_path).await?);
        let fetcher = Arc::new(FeedFetcher::new(&config.fetch)?);

        let services = match OpenAiClient::new(&config.providers) {
            Ok(client) => Some(build_services(&config, &repository, &fetcher, Arc::new(client))),
            Err(AppError::Config(reason)) => {
                warn!(%reason, "Provider features disabled");
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            config,
            repository,
            fetcher,
            services,
        })
    }

    fn services(&self) -> Result<&Services> {
        self.services.as_ref().ok_or_else(|| {
            AppError::Config("no provider API key (set providers.api_key or OPENAI_API_KEY)".into())
        })
    }

    pub async fn add_user(&self, email: &str, tier: Tier) -> Result<i64> {
        let id = self.repository.insert_user(email, tier).await?;
        info!(user_id = id, email, %tier, "User added");
        Ok(id)
    }

    /// Adds a feed for the user. Without a title the URL is probed, which
    /// also resolves an HTML page to its advertised feed.
    pub async fn add_feed(
        &self,
        user_id: i64,
        url: &str,
        title: Option<String>,
        category: Option<String>,
    ) -> Result<i64> {
        validate_feed_url(url)?;
        self.repository.get_user(user_id).await?;

        let (title, url) = match title {
            Some(title) => (title, url.to_string()),
            None => {
                let discovered = self.fetcher.discover_feed(url).await?;
                (discovered.title, discovered.url)
            }
        };

        let id = self
            .repository
            .insert_feed(NewFeed {
                user_id,
                title,
                url,
                category,
                popularity: None,
            })
            .await?;
        info!(user_id, feed_id = id, "Feed added");
        Ok(id)
    }

    pub async fn set_interests(
        &self,
        user_id: i64,
        topics: &[String],
        keywords: &[String],
        threshold: Option<i64>,
    ) -> Result<UserPreferences> {
        let profiles = &self.services()?.profiles;
        let mut prefs = if topics.is_empty() {
            profiles.update_profile(user_id, topics, keywords).await?
        } else {
            profiles.complete_onboarding(user_id, topics, keywords).await?
        };
        if let Some(threshold) = threshold {
            profiles.set_threshold(user_id, threshold).await?;
            prefs = profiles.get_profile(user_id).await?;
        }
        Ok(prefs)
    }

    pub async fn process_user(&self, user_id: i64) -> Result<PipelineResult> {
        self.services()?.pipeline.process_user(user_id).await
    }

    pub async fn run_job(&self, job_type: JobType, payload: &JobPayload) -> Result<JobReport> {
        self.services()?.jobs.run(job_type, payload).await
    }

    /// Articles from the user's feeds closest in meaning to `query`.
    pub async fn search(&self, user_id: i64, query: &str, limit: usize) -> Result<Vec<(Article, f32)>> {
        self.repository.get_user(user_id).await?;
        let vector = self.services()?.embeddings.embed(query).await?;
        self.repository
            .nearest_by_embedding(
                &vector,
                limit,
                SearchScope {
                    user_id: Some(user_id),
                    feed_ids: None,
                },
            )
            .await
    }

    /// Runs the scheduler and workers until Ctrl-C, then drains the queue.
    pub async fn run_daemon(&self) -> Result<()> {
        let jobs = self.services()?.jobs.clone();
        let history = Arc::new(JobHistory::new(
            Duration::hours(self.config.jobs.completed_retention_hours),
            Duration::hours(self.config.jobs.failed_retention_hours),
        ));
        let queue = JobQueue::start(jobs, history, RetryPolicy::job(1));

        let scheduler = BriefingScheduler::new().await?;
        scheduler.register(queue.clone(), &self.config.jobs).await?;
        scheduler.start().await?;

        tokio::signal::ctrl_c().await?;
        info!("Shutting down");

        scheduler.shutdown().await?;
        queue.shutdown().await;
        Ok(())
    }
}

fn build_services(
    config: &Config,
    repository: &Arc<Repository>,
    fetcher: &Arc<FeedFetcher>,
    client: Arc<OpenAiClient>,
) -> Services {
    let embeddings = EmbeddingService::new(client.clone(), config.providers.embedding_dimensions);
    let profiles = Arc::new(InterestProfileManager::new(
        repository.clone(),
        embeddings.clone(),
    ));
    let pipeline = Arc::new(ArticleProcessingPipeline::new(
        repository.clone(),
        fetcher.clone(),
        embeddings.clone(),
        profiles.clone(),
    ));

    let assembler = EpisodeScriptAssembler::new(
        repository.clone(),
        profiles.clone(),
        client.clone(),
        &config.pipeline,
    );
    let storage = Arc::new(LocalBlobStorage::new(
        &config.storage.audio_dir,
        &config.storage.public_base_url,
    ));
    let audio = AudioGenerator::new(repository.clone(), client.clone(), storage, &config.providers);
    let mut episodes = EpisodeGenerator::new(repository.clone(), assembler, audio);
    if config.pipeline.refresh_before_episode {
        episodes = episodes.with_pipeline(pipeline.clone());
    }

    let jobs = Arc::new(PipelineJobs::new(
        repository.clone(),
        fetcher.clone(),
        Summarizer::new(client, config.pipeline.summary_max_tokens),
        embeddings.clone(),
        episodes,
        config.pipeline.batch_size,
    ));

    Services {
        embeddings,
        profiles,
        pipeline,
        jobs,
    }
}
