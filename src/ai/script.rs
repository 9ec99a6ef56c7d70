use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::audio::WORDS_PER_MINUTE;
use crate::config::PipelineConfig;
use crate::db::{ArticleSelection, Repository};
use crate::embedding::truncate_chars;
use crate::error::{AppError, Result};
use crate::models::Article;
use crate::profile::{InterestProfile, InterestProfileManager};
use crate::providers::ChatProvider;
use crate::retry::{with_retry, RetryPolicy};

/// Body text per story when an admitted article has no summary yet.
const FALLBACK_BODY_CHARS: usize = 600;

#[derive(Debug, Clone, Serialize)]
pub struct ScriptDraft {
    pub script_text: String,
    pub article_ids: Vec<i64>,
    /// The tier cap the script was written for.
    pub duration_minutes: u32,
}

/// Picks a user's recent stories and asks the chat model for a spoken script.
pub struct EpisodeScriptAssembler {
    repo: Arc<Repository>,
    profiles: Arc<InterestProfileManager>,
    chat: Arc<dyn ChatProvider>,
    policy: RetryPolicy,
    lookback: Duration,
    max_articles: usize,
}

impl EpisodeScriptAssembler {
    pub fn new(
        repo: Arc<Repository>,
        profiles: Arc<InterestProfileManager>,
        chat: Arc<dyn ChatProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            repo,
            profiles,
            chat,
            policy: RetryPolicy::provider(),
            lookback: Duration::hours(config.lookback_hours.max(1)),
            max_articles: config.max_script_articles.max(1),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub async fn assemble(&self, user_id: i64) -> Result<ScriptDraft> {
        let user = self.repo.get_user(user_id).await?;
        let duration_minutes = user.tier.duration_limit_minutes();

        let articles = self.select_articles(user_id).await?;
        if articles.is_empty() {
            return Err(AppError::NoRecentArticles(user_id));
        }

        let owned: HashSet<i64> = self
            .repo
            .get_feeds_for_user(user_id)
            .await?
            .into_iter()
            .map(|f| f.id)
            .collect();
        ensure_owned(user_id, &owned, &articles)?;

        let prompt = script_prompt(&articles, duration_minutes);
        let max_tokens = token_budget(duration_minutes);
        let script = with_retry(&self.policy, || self.chat.complete(&prompt, max_tokens)).await?;
        let script_text = script.trim().to_string();
        if script_text.is_empty() {
            return Err(AppError::provider("chat", "empty script returned"));
        }

        info!(
            user_id,
            articles = articles.len(),
            duration_minutes,
            "Assembled episode script"
        );
        Ok(ScriptDraft {
            script_text,
            article_ids: articles.iter().map(|a| a.id).collect(),
            duration_minutes,
        })
    }

    async fn select_articles(&self, user_id: i64) -> Result<Vec<Article>> {
        let since = Utc::now() - self.lookback;
        let selection = match self.profiles.resolve(user_id, true).await? {
            InterestProfile::Profiled { .. } => ArticleSelection::Admitted,
            InterestProfile::Unprofiled => ArticleSelection::Summarized,
        };
        debug!(user_id, ?selection, "Selecting script articles");
        self.repo
            .get_recent_articles_for_user(user_id, since, selection, self.max_articles)
            .await
    }
}

/// Output token budget: two tokens per word at the narration pace.
pub(crate) fn token_budget(duration_minutes: u32) -> u32 {
    duration_minutes * WORDS_PER_MINUTE as u32 * 2
}

/// Rejects articles from feeds the user does not own.
///
/// Selection already joins on the user's feeds, so this only fails if that
/// query's scoping breaks. It is checked against a separate feed lookup.
fn ensure_owned(user_id: i64, owned_feeds: &HashSet<i64>, articles: &[Article]) -> Result<()> {
    match articles.iter().find(|a| !owned_feeds.contains(&a.feed_id)) {
        Some(article) => Err(AppError::FeedNotOwned {
            feed_id: article.feed_id,
            user_id,
        }),
        None => Ok(()),
    }
}

fn script_prompt(articles: &[Article], duration_minutes: u32) -> String {
    let target_words = duration_minutes as usize * WORDS_PER_MINUTE;
    let mut prompt = format!(
        "Write the script for a personal daily audio news briefing of about {} minutes \
         (roughly {} words, never more). Open with a short greeting, cover the stories \
         below with natural spoken transitions, and close with a brief sign-off. \
         Write plain spoken prose only: no headings, lists, markdown or stage directions.\n\nStories:\n",
        duration_minutes, target_words
    );
    for (i, article) in articles.iter().enumerate() {
        let body = article
            .summary
            .as_deref()
            .or(article.content.as_deref())
            .map(|b| truncate_chars(b.trim(), FALLBACK_BODY_CHARS))
            .unwrap_or_default();
        prompt.push_str(&format!("\n{}. {}\n{}\n", i + 1, article.title, body));
    }
    prompt
}
