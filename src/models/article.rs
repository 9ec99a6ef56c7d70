use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: Option<String>,
    pub title: String,
    pub link: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    /// Similarity to the owner's interest profile when admitted by the pipeline.
    pub relevance: Option<f32>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

impl Article {
    /// Text used to embed a stored article: title plus summary, falling back to content.
    pub fn embedding_text(&self) -> String {
        let body = self
            .summary
            .as_deref()
            .or(self.content.as_deref())
            .unwrap_or_default();
        join_title_body(&self.title, body)
    }
}

/// A normalized article as produced by the feed parser, before it has an id.
#[derive(Debug, Clone, Default)]
pub struct NewArticle {
    pub guid: Option<String>,
    pub title: String,
    pub link: String,
    pub content: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
    pub relevance: Option<f32>,
}

impl NewArticle {
    pub fn embedding_text(&self) -> String {
        join_title_body(&self.title, self.content.as_deref().unwrap_or_default())
    }
}

fn join_title_body(title: &str, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        title.to_string()
    } else {
        format!("{}\n\n{}", title, body)
    }
}
