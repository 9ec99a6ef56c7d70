use std::sync::Arc;

use crate::embedding::truncate_chars;
use crate::error::{AppError, Result};
use crate::providers::ChatProvider;
use crate::retry::{with_retry, RetryPolicy};

const MAX_CONTENT_CHARS: usize = 10_000;

const INSTRUCTIONS: &str = "You summarize news articles for a spoken daily briefing.
Write a concise summary of 2-3 sentences covering the key facts.
Use clear, accessible language and no markdown.";

pub struct Summarizer {
    chat: Arc<dyn ChatProvider>,
    policy: RetryPolicy,
    max_tokens: u32,
}

impl Summarizer {
    pub fn new(chat: Arc<dyn ChatProvider>, max_tokens: u32) -> Self {
        Self {
            chat,
            policy: RetryPolicy::provider(),
            max_tokens,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn generate_summary(&self, title: &str, content: &str) -> Result<String> {
        let content = truncate_chars(content.trim(), MAX_CONTENT_CHARS);

        let prompt = format!(
            "{}\n\nTitle: {}\n\nContent:\n{}",
            INSTRUCTIONS,
            title,
            if content.is_empty() { "(no content)" } else { content }
        );

        let summary = with_retry(&self.policy, || self.chat.complete(&prompt, self.max_tokens)).await?;
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(AppError::provider("chat", "empty summary returned"));
        }
        Ok(summary.to_string())
    }
}
