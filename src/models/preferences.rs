use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RELEVANCE_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPreferences {
    pub user_id: i64,
    pub selected_topics: Vec<String>,
    pub custom_keywords: Vec<String>,
    /// Percentage in 0..=100; compared as a fraction.
    pub relevance_threshold: u8,
    #[serde(skip)]
    pub interest_profile_embedding: Option<Vec<f32>>,
    pub onboarding_completed: bool,
    pub updated_at: DateTime<Utc>,
}

/// One append-only row of filtering counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilteringStats {
    pub user_id: i64,
    pub date: NaiveDate,
    pub included_articles: usize,
    pub filtered_out_articles: usize,
}
