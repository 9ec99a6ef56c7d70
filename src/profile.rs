use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use crate::db::Repository;
use crate::embedding::EmbeddingService;
use crate::error::{AppError, Result};
use crate::models::{UserPreferences, DEFAULT_RELEVANCE_THRESHOLD};

/// A user's interests as the filter and the script assembler see them.
#[derive(Debug, Clone, PartialEq)]
pub enum InterestProfile {
    Profiled {
        embedding: Vec<f32>,
        /// Percentage in 0..=100.
        threshold: u8,
    },
    /// No usable profile; callers fail open.
    Unprofiled,
}

impl InterestProfile {
    pub fn is_profiled(&self) -> bool {
        matches!(self, InterestProfile::Profiled { .. })
    }
}

/// Canonical text encoding of topics and keywords.
pub fn profile_text(topics: &[String], keywords: &[String]) -> String {
    let mut parts = Vec::new();
    if !topics.is_empty() {
        parts.push(format!("Topics: {}", topics.join(", ")));
    }
    if !keywords.is_empty() {
        parts.push(format!("Keywords: {}", keywords.join(", ")));
    }
    if parts.is_empty() {
        "General interest".to_string()
    } else {
        parts.join(". ")
    }
}

/// Trims entries, drops blanks and repeats, keeps first-seen order.
fn normalize_terms(terms: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(terms.len());
    for term in terms {
        let term = term.trim();
        if !term.is_empty() && !out.iter().any(|t| t.eq_ignore_ascii_case(term)) {
            out.push(term.to_string());
        }
    }
    out
}

pub struct InterestProfileManager {
    repo: Arc<Repository>,
    embeddings: EmbeddingService,
}

impl InterestProfileManager {
    pub fn new(repo: Arc<Repository>, embeddings: EmbeddingService) -> Self {
        Self { repo, embeddings }
    }

    pub async fn embed_profile(&self, topics: &[String], keywords: &[String]) -> Result<Vec<f32>> {
        self.embeddings.embed(&profile_text(topics, keywords)).await
    }

    /// Stores the topics and keywords and always recomputes the embedding.
    pub async fn update_profile(
        &self,
        user_id: i64,
        topics: &[String],
        keywords: &[String],
    ) -> Result<UserPreferences> {
        self.repo.get_user(user_id).await?;

        let topics = normalize_terms(topics);
        let keywords = normalize_terms(keywords);
        let embedding = self.embed_profile(&topics, &keywords).await?;

        let existing = self.repo.get_preferences(user_id).await?;
        let prefs = UserPreferences {
            user_id,
            selected_topics: topics,
            custom_keywords: keywords,
            relevance_threshold: existing
                .as_ref()
                .map(|p| p.relevance_threshold)
                .unwrap_or(DEFAULT_RELEVANCE_THRESHOLD),
            interest_profile_embedding: Some(embedding),
            onboarding_completed: existing.map(|p| p.onboarding_completed).unwrap_or(false),
            updated_at: Utc::now(),
        };
        self.repo.upsert_preferences(prefs.clone()).await?;

        info!(
            user_id,
            topics = prefs.selected_topics.len(),
            keywords = prefs.custom_keywords.len(),
            "Interest profile updated"
        );
        Ok(prefs)
    }

    /// Saves the first set of interests and marks onboarding complete.
    pub async fn complete_onboarding(
        &self,
        user_id: i64,
        topics: &[String],
        keywords: &[String],
    ) -> Result<UserPreferences> {
        if normalize_terms(topics).is_empty() {
            return Err(AppError::Validation("select at least one topic".into()));
        }
        let mut prefs = self.update_profile(user_id, topics, keywords).await?;
        prefs.onboarding_completed = true;
        self.repo.upsert_preferences(prefs.clone()).await?;
        Ok(prefs)
    }

    pub async fn set_threshold(&self, user_id: i64, threshold: i64) -> Result<()> {
        let threshold = u8::try_from(threshold)
            .ok()
            .filter(|t| *t <= 100)
            .ok_or_else(|| {
                AppError::Validation(format!("threshold {} outside 0..=100", threshold))
            })?;
        if !self.repo.set_relevance_threshold(user_id, threshold).await? {
            return Err(AppError::ProfileNotFound(user_id));
        }
        Ok(())
    }

    pub async fn get_profile(&self, user_id: i64) -> Result<UserPreferences> {
        self.repo
            .get_preferences(user_id)
            .await?
            .ok_or(AppError::ProfileNotFound(user_id))
    }

    /// Resolves the profile the filter should use.
    ///
    /// With `require_onboarding`, a profile whose owner has not finished
    /// onboarding counts as absent.
    pub async fn resolve(&self, user_id: i64, require_onboarding: bool) -> Result<InterestProfile> {
        let Some(prefs) = self.repo.get_preferences(user_id).await? else {
            return Ok(InterestProfile::Unprofiled);
        };
        if require_onboarding && !prefs.onboarding_completed {
            return Ok(InterestProfile::Unprofiled);
        }
        Ok(match prefs.interest_profile_embedding {
            Some(embedding) if !embedding.is_empty() => InterestProfile::Profiled {
                embedding,
                threshold: prefs.relevance_threshold,
            },
            _ => InterestProfile::Unprofiled,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Tier;
    use crate::providers::fakes::{sparse_vector, FakeEmbedder};
    use std::sync::atomic::Ordering;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn manager() -> (InterestProfileManager, Arc<FakeEmbedder>, i64) {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        let user_id = repo.insert_user("p@example.com", Tier::Free).await.unwrap();
        let embedder = Arc::new(
            FakeEmbedder::new(sparse_vector(&[(0, 1.0)])).rule("Keywords: AI", sparse_vector(&[(1, 1.0)])),
        );
        let service = EmbeddingService::new(embedder.clone(), 1536);
        (InterestProfileManager::new(repo, service), embedder, user_id)
    }

    #[test]
    fn test_profile_text_encodings() {
        assert_eq!(profile_text(&[], &[]), "General interest");
        assert_eq!(
            profile_text(&strings(&["Tech", "Science"]), &[]),
            "Topics: Tech, Science"
        );
        assert_eq!(profile_text(&[], &strings(&["AI"])), "Keywords: AI");
        assert_eq!(
            profile_text(&strings(&["Tech"]), &strings(&["AI", "Rust"])),
            "Topics: Tech. Keywords: AI, Rust"
        );
    }

    #[test]
    fn test_normalize_drops_blanks_and_repeats() {
        assert_eq!(
            normalize_terms(&strings(&[" AI ", "", "ai", "Rust"])),
            strings(&["AI", "Rust"])
        );
    }

    #[tokio::test]
    async fn test_missing_profile_is_not_found() {
        let (manager, _, user_id) = manager().await;
        assert!(matches!(
            manager.get_profile(user_id).await,
            Err(AppError::ProfileNotFound(_))
        ));
        assert_eq!(
            manager.resolve(user_id, false).await.unwrap(),
            InterestProfile::Unprofiled
        );
    }

    #[tokio::test]
    async fn test_update_always_recomputes_embedding() {
        let (manager, embedder, user_id) = manager().await;
        let keywords = strings(&["AI"]);
        manager.update_profile(user_id, &[], &keywords).await.unwrap();
        manager.update_profile(user_id, &[], &keywords).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);

        let prefs = manager.get_profile(user_id).await.unwrap();
        assert_eq!(prefs.relevance_threshold, DEFAULT_RELEVANCE_THRESHOLD);
        assert_eq!(prefs.interest_profile_embedding, Some(sparse_vector(&[(1, 1.0)])));
        assert!(!prefs.onboarding_completed);
    }

    #[tokio::test]
    async fn test_onboarding_gate_in_resolve() {
        let (manager, _, user_id) = manager().await;
        manager.update_profile(user_id, &strings(&["Tech"]), &[]).await.unwrap();
        assert!(manager.resolve(user_id, false).await.unwrap().is_profiled());
        assert!(!manager.resolve(user_id, true).await.unwrap().is_profiled());

        manager
            .complete_onboarding(user_id, &strings(&["Tech"]), &[])
            .await
            .unwrap();
        assert!(manager.resolve(user_id, true).await.unwrap().is_profiled());
    }

    #[tokio::test]
    async fn test_onboarding_requires_a_topic() {
        let (manager, _, user_id) = manager().await;
        let result = manager.complete_onboarding(user_id, &strings(&[" "]), &[]).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_threshold_validation() {
        let (manager, _, user_id) = manager().await;
        assert!(matches!(
            manager.set_threshold(user_id, 50).await,
            Err(AppError::ProfileNotFound(_))
        ));
        manager.update_profile(user_id, &[], &[]).await.unwrap();
        assert!(matches!(
            manager.set_threshold(user_id, 101).await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            manager.set_threshold(user_id, -1).await,
            Err(AppError::Validation(_))
        ));
        manager.set_threshold(user_id, 55).await.unwrap();
        assert_eq!(manager.get_profile(user_id).await.unwrap().relevance_threshold, 55);
    }
}
