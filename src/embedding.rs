use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::providers::EmbeddingProvider;
use crate::retry::{with_retry, RetryPolicy};

/// Longest text sent to the provider; longer input is cut on a char boundary.
const MAX_INPUT_CHARS: usize = 8000;

/// Turns text into a fixed-length vector.
///
/// Articles and interest profiles both go through this adapter so that
/// their vectors live in the same space.
#[derive(Clone)]
pub struct EmbeddingService {
    provider: Arc<dyn EmbeddingProvider>,
    policy: RetryPolicy,
    dimensions: usize,
}

impl EmbeddingService {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimensions: usize) -> Self {
        Self {
            provider,
            policy: RetryPolicy::provider(),
            dimensions,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AppError::Validation("cannot embed empty text".into()));
        }
        let input = truncate_chars(text, MAX_INPUT_CHARS);

        let embedding = with_retry(&self.policy, || self.provider.embed(input)).await?;

        if embedding.len() != self.dimensions {
            return Err(AppError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::{sparse_vector, FakeEmbedder};

    #[tokio::test]
    async fn test_returns_provider_vector() {
        let provider = Arc::new(FakeEmbedder::new(sparse_vector(&[(0, 1.0)])));
        let service = EmbeddingService::new(provider, 1536);
        let v = service.embed("hello world").await.unwrap();
        assert_eq!(v.len(), 1536);
    }

    #[tokio::test]
    async fn test_wrong_dimension_fails() {
        let provider = Arc::new(FakeEmbedder::new(vec![1.0, 2.0, 3.0]));
        let service = EmbeddingService::new(provider, 1536);
        assert!(matches!(
            service.embed("hello").await,
            Err(AppError::DimensionMismatch { expected: 1536, actual: 3 })
        ));
    }

    #[tokio::test]
    async fn test_blank_text_is_rejected_without_provider_call() {
        let provider = Arc::new(FakeEmbedder::new(sparse_vector(&[(0, 1.0)])));
        let service = EmbeddingService::new(provider.clone(), 1536);
        assert!(matches!(service.embed("   ").await, Err(AppError::Validation(_))));
        assert_eq!(provider.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
