//! Per-user ingestion: fetch, embed, filter, store, record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::db::Repository;
use crate::embedding::EmbeddingService;
use crate::error::{AppError, Result};
use crate::feed::{Deduplicator, FeedFetcher, FetchOutcome};
use crate::models::{Feed, FilteringStats, NewArticle};
use crate::profile::InterestProfileManager;
use crate::relevance::{FilterStats, RelevanceFilter};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineResult {
    pub total_fetched: usize,
    /// Candidates rejected by the relevance filter.
    pub total_filtered: usize,
    pub total_stored: usize,
    pub total_skipped: usize,
    pub errors: Vec<String>,
    pub success: bool,
}

pub struct ArticleProcessingPipeline {
    repo: Arc<Repository>,
    fetcher: Arc<FeedFetcher>,
    embeddings: EmbeddingService,
    profiles: Arc<InterestProfileManager>,
}

impl ArticleProcessingPipeline {
    pub fn new(
        repo: Arc<Repository>,
        fetcher: Arc<FeedFetcher>,
        embeddings: EmbeddingService,
        profiles: Arc<InterestProfileManager>,
    ) -> Self {
        Self {
            repo,
            fetcher,
            embeddings,
            profiles,
        }
    }

    /// Fetches every feed the user owns and stores what their profile admits.
    pub async fn process_user(&self, user_id: i64) -> Result<PipelineResult> {
        self.repo.get_user(user_id).await?;
        let feeds = self.repo.get_feeds_for_user(user_id).await?;
        debug!(user_id, feeds = feeds.len(), "Processing user feeds");

        let fetched = self.fetcher.fetch_all(feeds).await;
        Ok(self.process_fetched(user_id, fetched).await)
    }

    /// Runs the post-fetch stages over already fetched feeds.
    pub async fn process_fetched(
        &self,
        user_id: i64,
        fetched: Vec<(Feed, FetchOutcome)>,
    ) -> PipelineResult {
        let mut result = PipelineResult::default();
        let mut candidates: Vec<(usize, NewArticle)> = Vec::new();
        let mut origin: Vec<i64> = Vec::new();
        let mut feed_order: Vec<i64> = Vec::new();

        for (feed, outcome) in fetched {
            if !outcome.success {
                let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
                result.errors.push(format!("Feed '{}': {}", feed.title, error));
                continue;
            }
            if let Err(e) = self.repo.update_feed_last_fetched(feed.id).await {
                warn!(feed_id = feed.id, error = %e, "Failed to stamp feed fetch time");
            }

            result.total_fetched += outcome.articles.len();
            feed_order.push(feed.id);

            for mut article in outcome.articles {
                match self.embeddings.embed(&article.embedding_text()).await {
                    Ok(embedding) => article.embedding = Some(embedding),
                    Err(e) => {
                        warn!(feed_id = feed.id, title = %article.title, error = %e, "Failed to embed article");
                        result
                            .errors
                            .push(format!("Embedding '{}' failed: {}", article.title, e));
                    }
                }
                candidates.push((candidates.len(), article));
                origin.push(feed.id);
            }
        }

        let (admitted, stats) = match self.admit(user_id, &candidates).await {
            Ok(admitted) => admitted,
            Err(e) => {
                result.errors.push(format!("Relevance filtering failed: {}", e));
                result.success = false;
                return result;
            }
        };
        result.total_filtered = stats.filtered_out_articles;

        // Regroup admitted candidates by their feed, keeping fetch order.
        let mut by_feed: HashMap<i64, Vec<NewArticle>> = HashMap::new();
        for (index, mut article) in candidates {
            if let Some(similarity) = admitted.get(&index) {
                article.relevance = *similarity;
                by_feed.entry(origin[index]).or_default().push(article);
            }
        }

        let dedup = Deduplicator::new(&self.repo);
        for feed_id in feed_order {
            let Some(articles) = by_feed.remove(&feed_id) else {
                continue;
            };
            let outcome = dedup.store_new(feed_id, articles).await;
            result.total_stored += outcome.stored;
            result.total_skipped += outcome.skipped;
            result.errors.extend(outcome.errors);
        }

        if stats.total_articles > 0 {
            let row = FilteringStats {
                user_id,
                date: Utc::now().date_naive(),
                included_articles: stats.included_articles,
                filtered_out_articles: stats.filtered_out_articles,
            };
            if let Err(e) = self.repo.insert_filtering_stats(&row).await {
                warn!(user_id, error = %e, "Failed to record filtering statistics");
            }
        }

        result.success = result.errors.is_empty();
        info!(
            user_id,
            fetched = result.total_fetched,
            filtered = result.total_filtered,
            stored = result.total_stored,
            skipped = result.total_skipped,
            errors = result.errors.len(),
            "Processed user feeds"
        );
        result
    }

    /// Candidate index to recorded similarity. Without a profile everything
    /// is admitted and no similarity is recorded.
    async fn admit(
        &self,
        user_id: i64,
        candidates: &[(usize, NewArticle)],
    ) -> Result<(HashMap<usize, Option<f32>>, FilterStats)> {
        let filter = RelevanceFilter::new(&self.profiles);
        match filter.filter_by_relevance(user_id, candidates).await {
            Ok(outcome) => Ok((
                outcome
                    .admitted
                    .into_iter()
                    .map(|a| (a.id, Some(a.similarity)))
                    .collect(),
                outcome.stats,
            )),
            Err(AppError::ProfileNotFound(_)) => {
                debug!(user_id, "No interest profile, admitting every candidate");
                let stats = FilterStats {
                    total_articles: candidates.len(),
                    included_articles: candidates.len(),
                    filtered_out_articles: 0,
                };
                Ok((candidates.iter().map(|(i, _)| (*i, None)).collect(), stats))
            }
            Err(e) => Err(e),
        }
    }
}
