use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::ai::Summarizer;
use crate::db::Repository;
use crate::embedding::EmbeddingService;
use crate::episode::EpisodeGenerator;
use crate::error::{AppError, Result};
use crate::feed::{Deduplicator, FeedFetcher};

use super::queue::JobHandler;
use super::{JobPayload, JobType};

/// Outcome of one job run. Per-item failures land in `errors`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct JobReport {
    pub processed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    /// How many of `errors` could clear up if the job ran again.
    #[serde(skip)]
    pub retryable_errors: usize,
}

impl JobReport {
    fn fail(&mut self, message: String, retryable: bool) {
        if retryable {
            self.retryable_errors += 1;
        }
        self.errors.push(message);
    }

    /// A run where every item failed is an error. It is retryable only when
    /// at least one failure was transient.
    fn into_result(self, job_type: JobType) -> Result<Self> {
        if self.processed == 0 && self.skipped == 0 && !self.errors.is_empty() {
            let message = format!(
                "{}: all {} items failed, first: {}",
                job_type,
                self.errors.len(),
                self.errors[0]
            );
            if self.retryable_errors == 0 {
                return Err(AppError::BatchFailed(message));
            }
            return Err(anyhow::anyhow!(message).into());
        }
        Ok(self)
    }
}

/// The handlers behind the four job types.
pub struct PipelineJobs {
    repo: Arc<Repository>,
    fetcher: Arc<FeedFetcher>,
    summarizer: Summarizer,
    embeddings: EmbeddingService,
    episodes: EpisodeGenerator,
    batch_size: usize,
}

impl PipelineJobs {
    pub fn new(
        repo: Arc<Repository>,
        fetcher: Arc<FeedFetcher>,
        summarizer: Summarizer,
        embeddings: EmbeddingService,
        episodes: EpisodeGenerator,
        batch_size: usize,
    ) -> Self {
        Self {
            repo,
            fetcher,
            summarizer,
            embeddings,
            episodes,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(&self, job_type: JobType, payload: &JobPayload) -> Result<JobReport> {
        let report = match job_type {
            JobType::FetchArticles => self.fetch_articles(payload.feed_ids.clone()).await?,
            JobType::SummarizeArticles => self.summarize_articles(payload.article_ids.clone()).await?,
            JobType::GenerateEmbeddings => self.generate_embeddings(payload.article_ids.clone()).await?,
            JobType::GenerateEpisodes => self.generate_episodes(payload.user_ids.clone()).await?,
        };
        report.into_result(job_type)
    }

    /// Fetches feeds and stores unseen articles.
    pub async fn fetch_articles(&self, feed_ids: Option<Vec<i64>>) -> Result<JobReport> {
        let feeds = self.repo.get_feeds(feed_ids).await?;
        let dedup = Deduplicator::new(&self.repo);
        let mut report = JobReport::default();

        for (feed, outcome) in self.fetcher.fetch_all(feeds).await {
            if !outcome.success {
                let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
                report.fail(format!("Feed '{}': {}", feed.title, error), outcome.retryable);
                continue;
            }
            let stored = dedup.store_new(feed.id, outcome.articles).await;
            debug!(feed_id = feed.id, stored = stored.stored, skipped = stored.skipped, "Stored feed articles");
            report.processed += stored.stored;
            report.skipped += stored.skipped;
            report.retryable_errors += stored.retryable_errors;
            report.errors.extend(stored.errors);

            if let Err(e) = self.repo.update_feed_last_fetched(feed.id).await {
                warn!(feed_id = feed.id, error = %e, "Failed to stamp feed fetch time");
            }
        }

        info!(stored = report.processed, skipped = report.skipped, errors = report.errors.len(), "Fetch finished");
        Ok(report)
    }

    pub async fn summarize_articles(&self, article_ids: Option<Vec<i64>>) -> Result<JobReport> {
        let articles = self
            .repo
            .get_articles_without_summary(article_ids, self.batch_size)
            .await?;
        let mut report = JobReport::default();

        for article in articles {
            let content = article.content.as_deref().unwrap_or_default();
            let summary = match self.summarizer.generate_summary(&article.title, content).await {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(article_id = article.id, error = %e, "Summary failed");
                    if let Err(mark) = self.repo.record_summary_failure(article.id).await {
                        warn!(article_id = article.id, error = %mark, "Failed to record summary failure");
                    }
                    report.fail(format!("Article {}: {}", article.id, e), e.is_transient());
                    continue;
                }
            };
            match self.repo.update_article_summary(article.id, summary).await {
                Ok(()) => report.processed += 1,
                Err(e) => report.fail(format!("Article {}: {}", article.id, e), e.is_transient()),
            }
        }

        info!(summarized = report.processed, errors = report.errors.len(), "Summarization finished");
        Ok(report)
    }

    /// Embeds summarized articles that have no vector yet.
    pub async fn generate_embeddings(&self, article_ids: Option<Vec<i64>>) -> Result<JobReport> {
        let articles = self
            .repo
            .get_articles_pending_embedding(article_ids, self.batch_size)
            .await?;
        let mut report = JobReport::default();

        for article in articles {
            let embedding = match self.embeddings.embed(&article.embedding_text()).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!(article_id = article.id, error = %e, "Embedding failed");
                    if let Err(mark) = self.repo.record_embedding_failure(article.id).await {
                        warn!(article_id = article.id, error = %mark, "Failed to record embedding failure");
                    }
                    report.fail(format!("Article {}: {}", article.id, e), e.is_transient());
                    continue;
                }
            };
            match self.repo.update_article_embedding(article.id, &embedding).await {
                Ok(()) => report.processed += 1,
                Err(e) => report.fail(format!("Article {}: {}", article.id, e), e.is_transient()),
            }
        }

        info!(embedded = report.processed, errors = report.errors.len(), "Embedding finished");
        Ok(report)
    }

    pub async fn generate_episodes(&self, user_ids: Option<Vec<i64>>) -> Result<JobReport> {
        let batch = self.episodes.generate_for_users(user_ids).await?;
        Ok(JobReport {
            processed: batch.created,
            skipped: batch.skipped,
            errors: batch.errors,
            retryable_errors: batch.retryable_errors,
        })
    }
}

#[async_trait]
impl JobHandler for PipelineJobs {
    async fn handle(&self, job_type: JobType, payload: &JobPayload) -> Result<serde_json::Value> {
        let report = self.run(job_type, payload).await?;
        serde_json::to_value(report).map_err(AppError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::EpisodeScriptAssembler;
    use crate::audio::AudioGenerator;
    use crate::config::{FetchConfig, PipelineConfig, ProviderConfig};
    use crate::db::MAX_WORK_ATTEMPTS;
    use crate::jobs::{JobHistory, JobQueue, JobStatus};
    use crate::models::{NewArticle, NewFeed, Tier};
    use crate::profile::InterestProfileManager;
    use crate::providers::fakes::{
        sparse_vector, FakeChat, FakeEmbedder, FakeSynthesizer, MemoryStorage,
    };
    use crate::retry::RetryPolicy;

    struct Fixture {
        repo: Arc<Repository>,
        jobs: PipelineJobs,
        feed_id: i64,
    }

    async fn fixture(feed_url: &str) -> Fixture {
        fixture_with(feed_url, FakeChat::new("Two sentences. Exactly two."), 100).await
    }

    async fn fixture_with(feed_url: &str, chat: FakeChat, batch_size: usize) -> Fixture {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let user_id = repo.insert_user("jobs@example.com", Tier::Free).await.unwrap();
        let feed_id = repo
            .insert_feed(NewFeed {
                user_id,
                title: "Feed".into(),
                url: feed_url.into(),
                category: None,
                popularity: None,
            })
            .await
            .unwrap();

        let chat = Arc::new(chat);
        let embedder = Arc::new(
            FakeEmbedder::new(sparse_vector(&[(0, 1.0)])).fail_on("poison"),
        );
        let embeddings = EmbeddingService::new(embedder, 1536).with_policy(RetryPolicy::immediate(1));
        let profiles = Arc::new(InterestProfileManager::new(repo.clone(), embeddings.clone()));
        let assembler = EpisodeScriptAssembler::new(
            repo.clone(),
            profiles,
            chat.clone(),
            &PipelineConfig::default(),
        );
        let audio = AudioGenerator::new(
            repo.clone(),
            Arc::new(FakeSynthesizer::new()),
            Arc::new(MemoryStorage::default()),
            &ProviderConfig::default(),
        );
        let jobs = PipelineJobs::new(
            repo.clone(),
            Arc::new(FeedFetcher::new(&FetchConfig::default()).unwrap()),
            Summarizer::new(chat, 150),
            embeddings,
            EpisodeGenerator::new(repo.clone(), assembler, audio),
            batch_size,
        );
        Fixture { repo, jobs, feed_id }
    }

    async fn add_article(fx: &Fixture, title: &str) -> i64 {
        fx.repo
            .insert_article(
                fx.feed_id,
                NewArticle {
                    title: title.into(),
                    content: Some(format!("{} content", title)),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_summarize_then_embed_then_episode() {
        let fx = fixture("https://feed.example.com/rss").await;
        let a = add_article(&fx, "Budget vote").await;
        let b = add_article(&fx, "Storm warning").await;

        let summarized = tokio_test::assert_ok!(
            fx.jobs.run(JobType::SummarizeArticles, &JobPayload::default()).await
        );
        assert_eq!(summarized.processed, 2);

        let embedded = tokio_test::assert_ok!(
            fx.jobs.run(JobType::GenerateEmbeddings, &JobPayload::default()).await
        );
        assert_eq!(embedded.processed, 2);
        let stored = fx.repo.get_articles(vec![a, b]).await.unwrap();
        assert!(stored.iter().all(|a| a.summary.is_some() && a.embedding.is_some()));

        let episodes = fx.jobs.run(JobType::GenerateEpisodes, &JobPayload::default()).await.unwrap();
        assert_eq!(episodes.processed, 1);
        let again = fx.jobs.run(JobType::GenerateEpisodes, &JobPayload::default()).await.unwrap();
        assert_eq!((again.processed, again.skipped), (0, 1));
    }

    #[tokio::test]
    async fn test_payload_scopes_articles() {
        let fx = fixture("https://feed.example.com/rss").await;
        let a = add_article(&fx, "One").await;
        add_article(&fx, "Two").await;

        let payload = JobPayload {
            article_ids: Some(vec![a]),
            ..Default::default()
        };
        let report = fx.jobs.run(JobType::SummarizeArticles, &payload).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(fx.repo.get_articles_without_summary(None, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_partial_embedding_failure_is_reported_not_raised() {
        let fx = fixture("https://feed.example.com/rss").await;
        let good = add_article(&fx, "Good").await;
        let bad = add_article(&fx, "poison pill").await;
        fx.repo.update_article_summary(good, "fine".into()).await.unwrap();
        fx.repo.update_article_summary(bad, "poison".into()).await.unwrap();

        let report = fx.jobs.run(JobType::GenerateEmbeddings, &JobPayload::default()).await.unwrap();
        assert_eq!(report.processed, 1);
        assert_eq!(report.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_with_every_feed_rejected_is_not_retryable() {
        let fx = fixture("ftp://feed.example.com/rss").await;
        let result = fx.jobs.run(JobType::FetchArticles, &JobPayload::default()).await;
        let err = tokio_test::assert_err!(result);
        assert!(matches!(err, AppError::BatchFailed(_)));
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unsupported feed URL scheme"));
    }

    #[tokio::test]
    async fn test_queue_runs_rejected_fetch_once() {
        let Fixture { jobs, .. } = fixture("ftp://feed.example.com/rss").await;
        let history = Arc::new(JobHistory::new(
            chrono::Duration::hours(24),
            chrono::Duration::days(7),
        ));
        let queue = JobQueue::start(Arc::new(jobs), history, RetryPolicy::immediate(1));

        let id = queue.enqueue(JobType::FetchArticles, JobPayload::default()).unwrap();
        queue.shutdown().await;

        let record = queue.history().get(&id).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.attempts, 1);
    }

    #[test]
    fn test_all_failed_report_is_retryable_when_any_failure_is_transient() {
        let mut report = JobReport::default();
        report.fail("Feed 'A': rejected".into(), false);
        report.fail("Feed 'B': timed out".into(), true);
        let err = report.into_result(JobType::FetchArticles).unwrap_err();
        assert!(err.is_retryable());

        let mut report = JobReport::default();
        report.fail("Article 1: rejected".into(), false);
        report.skipped = 1;
        assert!(report.into_result(JobType::SummarizeArticles).is_ok());
    }

    #[tokio::test]
    async fn test_failing_rows_do_not_starve_the_batch() {
        let chat = FakeChat::new("Two sentences. Exactly two.").fail_on("poison");
        let fx = fixture_with("https://feed.example.com/rss", chat, 2).await;
        let bad_a = add_article(&fx, "poison one").await;
        let bad_b = add_article(&fx, "poison two").await;
        let good = add_article(&fx, "Harbor reopens").await;

        let first = fx.jobs.run(JobType::SummarizeArticles, &JobPayload::default()).await;
        assert!(matches!(first, Err(AppError::BatchFailed(_))));

        let second = fx
            .jobs
            .run(JobType::SummarizeArticles, &JobPayload::default())
            .await
            .unwrap();
        assert_eq!(second.processed, 1);
        let stored = fx.repo.get_articles(vec![good]).await.unwrap();
        assert!(stored[0].summary.is_some());

        // Poisoned rows keep being tried until they run out of attempts.
        for _ in 0..MAX_WORK_ATTEMPTS {
            let _ = fx.jobs.run(JobType::SummarizeArticles, &JobPayload::default()).await;
        }
        let pending = fx.repo.get_articles_without_summary(None, 10).await.unwrap();
        assert!(pending.is_empty(), "{:?}", pending.iter().map(|a| a.id).collect::<Vec<_>>());
        let rows = fx.repo.get_articles(vec![bad_a, bad_b]).await.unwrap();
        assert!(rows.iter().all(|a| a.summary.is_none()));
    }

    #[tokio::test]
    async fn test_fetch_with_nothing_to_do_succeeds() {
        let fx = fixture("https://feed.example.com/rss").await;
        let payload = JobPayload {
            feed_ids: Some(vec![]),
            ..Default::default()
        };
        let report = fx.jobs.run(JobType::FetchArticles, &payload).await.unwrap();
        assert_eq!(report, JobReport::default());
    }
}
