use chrono::{DateTime, Days, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::{AppError, Result};
use crate::models::{Episode, FilteringStats, NewEpisode};

use super::repository::{conversion_error, format_date, format_timestamp, timestamp_column};
use super::Repository;

impl Repository {
    // Episode operations

    /// Inserts the episode and its article links in one transaction.
    pub async fn insert_episode(&self, episode: NewEpisode) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO episodes (user_id, script_text, audio_url, duration_minutes, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        episode.user_id,
                        episode.script_text,
                        episode.audio_url,
                        episode.duration_minutes,
                        format_timestamp(Utc::now()),
                    ],
                )?;
                let episode_id = tx.last_insert_rowid();
                {
                    let mut stmt = tx.prepare(
                        "INSERT OR IGNORE INTO episode_articles (episode_id, article_id) VALUES (?1, ?2)",
                    )?;
                    for article_id in &episode.article_ids {
                        stmt.execute(params![episode_id, article_id])?;
                    }
                }
                tx.commit()?;
                Ok(episode_id)
            })
            .await?;
        Ok(id)
    }

    pub async fn get_episode(&self, id: i64) -> Result<Episode> {
        let episode = self
            .conn
            .call(move |conn| {
                let episode = conn
                    .query_row(
                        &format!("{} WHERE id = ?1", EPISODE_COLUMNS),
                        params![id],
                        episode_from_row,
                    )
                    .optional()?;
                Ok(episode)
            })
            .await?;
        episode.ok_or(AppError::EpisodeNotFound(id))
    }

    pub async fn get_episodes_for_user(&self, user_id: i64) -> Result<Vec<Episode>> {
        let episodes = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE user_id = ?1 ORDER BY created_at DESC, id DESC",
                    EPISODE_COLUMNS
                ))?;
                let episodes = stmt
                    .query_map(params![user_id], episode_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(episodes)
            })
            .await?;
        Ok(episodes)
    }

    pub async fn get_episode_article_ids(&self, episode_id: i64) -> Result<Vec<i64>> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT article_id FROM episode_articles WHERE episode_id = ?1 ORDER BY article_id",
                )?;
                let ids = stmt
                    .query_map(params![episode_id], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    /// True if the user has an episode created within `[date 00:00, date+1 00:00)` UTC.
    pub async fn exists_episode_for_user_on_date(
        &self,
        user_id: i64,
        date: NaiveDate,
    ) -> Result<bool> {
        let (start, end) = day_bounds(date)?;
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM episodes WHERE user_id = ?1 AND created_at >= ?2 AND created_at < ?3",
                    params![user_id, start, end],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    pub async fn delete_episode(&self, id: i64) -> Result<()> {
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM episodes WHERE id = ?1", params![id])?))
            .await?;
        if deleted == 0 {
            return Err(AppError::EpisodeNotFound(id));
        }
        Ok(())
    }

    // Audio cache operations

    pub async fn get_cached_audio(&self, script_hash: &str) -> Result<Option<String>> {
        let script_hash = script_hash.to_string();
        let url = self
            .conn
            .call(move |conn| {
                let url = conn
                    .query_row(
                        "SELECT audio_url FROM audio_cache WHERE script_hash = ?1",
                        params![script_hash],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(url)
            })
            .await?;
        Ok(url)
    }

    /// Last writer wins.
    pub async fn upsert_audio_cache(&self, script_hash: &str, audio_url: &str) -> Result<()> {
        let script_hash = script_hash.to_string();
        let audio_url = audio_url.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO audio_cache (script_hash, audio_url, created_at)
                       VALUES (?1, ?2, ?3)
                       ON CONFLICT(script_hash) DO UPDATE SET
                           audio_url = excluded.audio_url,
                           created_at = excluded.created_at"#,
                    params![script_hash, audio_url, format_timestamp(Utc::now())],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Filtering statistics

    pub async fn insert_filtering_stats(&self, stats: &FilteringStats) -> Result<()> {
        let stats = stats.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO filtering_statistics (user_id, date, included_articles, filtered_out_articles, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        stats.user_id,
                        format_date(stats.date),
                        stats.included_articles as i64,
                        stats.filtered_out_articles as i64,
                        format_timestamp(Utc::now()),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_filtering_stats(&self, user_id: i64) -> Result<Vec<FilteringStats>> {
        let stats = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT user_id, date, included_articles, filtered_out_articles
                       FROM filtering_statistics WHERE user_id = ?1 ORDER BY id"#,
                )?;
                let stats = stmt
                    .query_map(params![user_id], stats_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(stats)
            })
            .await?;
        Ok(stats)
    }
}

const EPISODE_COLUMNS: &str =
    "SELECT id, user_id, script_text, audio_url, duration_minutes, created_at FROM episodes";

fn day_bounds(date: NaiveDate) -> Result<(String, String)> {
    let out_of_range = || AppError::Validation(format!("date out of range: {}", date));
    let start: DateTime<Utc> = date.and_hms_opt(0, 0, 0).ok_or_else(out_of_range)?.and_utc();
    let end: DateTime<Utc> = date
        .checked_add_days(Days::new(1))
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .ok_or_else(out_of_range)?
        .and_utc();
    Ok((format_timestamp(start), format_timestamp(end)))
}

fn episode_from_row(row: &Row) -> rusqlite::Result<Episode> {
    Ok(Episode {
        id: row.get(0)?,
        user_id: row.get(1)?,
        script_text: row.get(2)?,
        audio_url: row.get(3)?,
        duration_minutes: row.get(4)?,
        created_at: timestamp_column(row, 5)?,
    })
}

fn stats_from_row(row: &Row) -> rusqlite::Result<FilteringStats> {
    let date: String = row.get(1)?;
    Ok(FilteringStats {
        user_id: row.get(0)?,
        date: NaiveDate::parse_from_str(&date, "%Y-%m-%d")
            .map_err(|e| conversion_error(1, e.to_string()))?,
        included_articles: row.get::<_, i64>(2)? as usize,
        filtered_out_articles: row.get::<_, i64>(3)? as usize,
    })
}
