use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub url: String,
    pub category: Option<String>,
    pub popularity: Option<i64>,
    pub last_fetched: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFeed {
    pub user_id: i64,
    pub title: String,
    pub url: String,
    pub category: Option<String>,
    pub popularity: Option<i64>,
}
