use serde::Serialize;

use crate::error::{AppError, Result};
use crate::models::{Article, NewArticle};
use crate::profile::{InterestProfile, InterestProfileManager};
use crate::similarity::cosine_similarity;

/// Anything the relevance filter can score.
pub trait Scorable {
    type Id: Clone;

    fn score_id(&self) -> Self::Id;
    fn embedding(&self) -> Option<&[f32]>;
}

impl Scorable for Article {
    type Id = i64;

    fn score_id(&self) -> i64 {
        self.id
    }

    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }
}

/// In-memory candidates are identified by their position in the batch.
impl Scorable for (usize, NewArticle) {
    type Id = usize;

    fn score_id(&self) -> usize {
        self.0
    }

    fn embedding(&self) -> Option<&[f32]> {
        self.1.embedding.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Admitted<Id> {
    pub id: Id,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub total_articles: usize,
    pub included_articles: usize,
    pub filtered_out_articles: usize,
}

#[derive(Debug, Clone)]
pub struct FilterOutcome<Id> {
    pub admitted: Vec<Admitted<Id>>,
    pub stats: FilterStats,
}

/// Scores `articles` against a profile embedding.
///
/// Articles without an embedding, or whose embedding cannot be compared,
/// are never admitted but still count toward the total.
pub fn filter_with_profile<T: Scorable>(
    profile_embedding: &[f32],
    threshold: u8,
    articles: &[T],
) -> FilterOutcome<T::Id> {
    let cutoff = f32::from(threshold) / 100.0;
    let mut admitted = Vec::new();

    for article in articles {
        let Some(embedding) = article.embedding().filter(|e| !e.is_empty()) else {
            continue;
        };
        match cosine_similarity(embedding, profile_embedding) {
            Ok(similarity) if similarity >= cutoff => admitted.push(Admitted {
                id: article.score_id(),
                similarity,
            }),
            Ok(_) => {}
            Err(e) => tracing::debug!(error = %e, "Skipping article with incomparable embedding"),
        }
    }

    let stats = FilterStats {
        total_articles: articles.len(),
        included_articles: admitted.len(),
        filtered_out_articles: articles.len() - admitted.len(),
    };
    FilterOutcome { admitted, stats }
}

pub struct RelevanceFilter<'a> {
    profiles: &'a InterestProfileManager,
}

impl<'a> RelevanceFilter<'a> {
    pub fn new(profiles: &'a InterestProfileManager) -> Self {
        Self { profiles }
    }

    /// Fails with `ProfileNotFound` when the user has no interest profile.
    pub async fn filter_by_relevance<T: Scorable>(
        &self,
        user_id: i64,
        articles: &[T],
    ) -> Result<FilterOutcome<T::Id>> {
        match self.profiles.resolve(user_id, false).await? {
            InterestProfile::Profiled {
                embedding,
                threshold,
            } => Ok(filter_with_profile(&embedding, threshold, articles)),
            InterestProfile::Unprofiled => Err(AppError::ProfileNotFound(user_id)),
        }
    }
}
