use serde::Serialize;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::NewArticle;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreOutcome {
    pub stored: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    /// How many of `errors` could clear up on a later attempt.
    #[serde(skip)]
    pub retryable_errors: usize,
}

impl StoreOutcome {
    fn fail(&mut self, title: &str, error: &AppError) {
        if error.is_transient() {
            self.retryable_errors += 1;
        }
        self.errors.push(format!("'{}': {}", title, error));
    }
}

/// Decides which fetched articles are new for a feed.
///
/// The key is `(feed_id, title)`: a second article with a title already
/// stored for that feed is skipped whatever its other fields say.
pub struct Deduplicator<'a> {
    repo: &'a Repository,
}

impl<'a> Deduplicator<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    pub async fn exists(&self, feed_id: i64, title: &str) -> Result<bool> {
        self.repo.article_exists(feed_id, title).await
    }

    /// Stores each article independently; one failure never stops the rest.
    pub async fn store_new(&self, feed_id: i64, articles: Vec<NewArticle>) -> StoreOutcome {
        let mut outcome = StoreOutcome::default();

        for article in articles {
            let title = article.title.clone();
            match self.exists(feed_id, &title).await {
                Ok(true) => {
                    outcome.skipped += 1;
                    self.record_admission(
                        feed_id,
                        &title,
                        article.relevance,
                        article.embedding.as_deref(),
                        &mut outcome,
                    )
                    .await;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    outcome.fail(&title, &e);
                    continue;
                }
            }

            // The insert ignores conflicts, which also covers a concurrent writer.
            let relevance = article.relevance;
            let embedding = article.embedding.clone();
            match self.repo.insert_article(feed_id, article).await {
                Ok(Some(_)) => outcome.stored += 1,
                Ok(None) => {
                    outcome.skipped += 1;
                    self.record_admission(
                        feed_id,
                        &title,
                        relevance,
                        embedding.as_deref(),
                        &mut outcome,
                    )
                    .await;
                }
                Err(e) => {
                    tracing::warn!(feed_id, title = %title, error = %e, "Failed to store article");
                    outcome.fail(&title, &e);
                }
            }
        }

        outcome
    }

    /// A skipped article that carries a relevance score still marks the
    /// stored row as admitted, so rows stored unscored by an earlier fetch
    /// become visible to relevance-based selection.
    async fn record_admission(
        &self,
        feed_id: i64,
        title: &str,
        relevance: Option<f32>,
        embedding: Option<&[f32]>,
        outcome: &mut StoreOutcome,
    ) {
        let Some(relevance) = relevance else {
            return;
        };
        if let Err(e) = self
            .repo
            .set_article_relevance(feed_id, title, relevance, embedding)
            .await
        {
            tracing::warn!(feed_id, title = %title, error = %e, "Failed to record relevance");
            outcome.fail(title, &e);
        }
    }
}
