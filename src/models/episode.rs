use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: i64,
    pub user_id: i64,
    pub script_text: String,
    pub audio_url: String,
    pub duration_minutes: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEpisode {
    pub user_id: i64,
    pub script_text: String,
    pub audio_url: String,
    pub duration_minutes: u32,
    pub article_ids: Vec<i64>,
}
