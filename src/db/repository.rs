use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{Article, Feed, NewArticle, NewFeed, Tier, User, UserPreferences};
use crate::similarity::cosine_similarity;

use super::schema::SCHEMA;

/// Which stored articles a briefing may draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArticleSelection {
    /// Articles the processing pipeline admitted against the interest profile.
    Admitted,
    /// Any article that has a summary.
    Summarized,
}

/// Restricts a vector search to a user's feeds and/or explicit feed ids.
#[derive(Debug, Clone, Default)]
pub struct SearchScope {
    pub user_id: Option<i64>,
    pub feed_ids: Option<Vec<i64>>,
}

pub struct Repository {
    pub(super) conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // User operations

    pub async fn insert_user(&self, email: &str, tier: Tier) -> Result<i64> {
        let email = email.trim().to_string();
        if email.is_empty() {
            return Err(AppError::Validation("email must not be empty".into()));
        }
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO users (email, tier, created_at) VALUES (?1, ?2, ?3)",
                    params![email, tier.as_str(), format_timestamp(Utc::now())],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_user(&self, id: i64) -> Result<User> {
        let user = self
            .conn
            .call(move |conn| {
                let user = conn
                    .query_row(
                        "SELECT id, email, tier, created_at FROM users WHERE id = ?1",
                        params![id],
                        user_from_row,
                    )
                    .optional()?;
                Ok(user)
            })
            .await?;
        user.ok_or(AppError::UserNotFound(id))
    }

    /// All users, or only the listed ones. Ordered by id.
    pub async fn get_users(&self, ids: Option<Vec<i64>>) -> Result<Vec<User>> {
        let users = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare("SELECT id, email, tier, created_at FROM users ORDER BY id")?;
                let users = stmt
                    .query_map([], user_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await?;
        Ok(retain_ids(users, ids.as_deref(), |u| u.id))
    }

    // Feed operations

    pub async fn insert_feed(&self, feed: NewFeed) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feeds (user_id, title, url, category, popularity, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        feed.user_id,
                        feed.title,
                        feed.url,
                        feed.category,
                        feed.popularity,
                        format_timestamp(Utc::now()),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let feed = conn
                    .query_row(
                        &format!("{} WHERE id = ?1", FEED_COLUMNS),
                        params![id],
                        feed_from_row,
                    )
                    .optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_feeds_for_user(&self, user_id: i64) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("{} WHERE user_id = ?1 ORDER BY id", FEED_COLUMNS))?;
                let feeds = stmt
                    .query_map(params![user_id], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    /// All feeds, or only the listed ones. Ordered by id.
    pub async fn get_feeds(&self, ids: Option<Vec<i64>>) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(&format!("{} ORDER BY id", FEED_COLUMNS))?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(retain_ids(feeds, ids.as_deref(), |f| f.id))
    }

    pub async fn update_feed_last_fetched(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET last_fetched = ?1 WHERE id = ?2",
                    params![format_timestamp(Utc::now()), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn delete_feed(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?))
            .await?;
        Ok(deleted > 0)
    }

    // Article operations

    pub async fn article_exists(&self, feed_id: i64, title: &str) -> Result<bool> {
        let title = title.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM articles WHERE feed_id = ?1 AND title = ?2",
                    params![feed_id, title],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    /// Inserts an article unless its (feed, title) pair is already stored.
    ///
    /// Returns `None` when the row already existed.
    pub async fn insert_article(&self, feed_id: i64, article: NewArticle) -> Result<Option<i64>> {
        let id = self
            .conn
            .call(move |conn| {
                let inserted = conn.execute(
                    r#"INSERT INTO articles (feed_id, guid, title, link, content, embedding, relevance, published_at, fetched_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                       ON CONFLICT(feed_id, title) DO NOTHING"#,
                    params![
                        feed_id,
                        article.guid,
                        article.title,
                        article.link,
                        article.content,
                        article.embedding.as_deref().map(encode_embedding),
                        article.relevance,
                        article.published_at.map(format_timestamp),
                        format_timestamp(Utc::now()),
                    ],
                )?;
                Ok((inserted > 0).then(|| conn.last_insert_rowid()))
            })
            .await?;
        Ok(id)
    }

    pub async fn get_articles(&self, ids: Vec<i64>) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE a.id = ?1", ARTICLE_COLUMNS))?;
                let mut articles = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(article) =
                        stmt.query_row(params![id], article_from_row).optional()?
                    {
                        articles.push(article);
                    }
                }
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Articles that still need a summary, least attempted first, then oldest.
    ///
    /// Rows that failed [`MAX_WORK_ATTEMPTS`] times are left out.
    pub async fn get_articles_without_summary(
        &self,
        ids: Option<Vec<i64>>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        self.pending_articles("a.summary IS NULL", "a.summary_attempts", ids, limit)
            .await
    }

    /// Summarized articles that have no embedding yet, least attempted first.
    pub async fn get_articles_pending_embedding(
        &self,
        ids: Option<Vec<i64>>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        self.pending_articles(
            "a.summary IS NOT NULL AND a.embedding IS NULL",
            "a.embedding_attempts",
            ids,
            limit,
        )
        .await
    }

    async fn pending_articles(
        &self,
        condition: &'static str,
        attempts_column: &'static str,
        ids: Option<Vec<i64>>,
        limit: usize,
    ) -> Result<Vec<Article>> {
        // The id scope travels as a JSON array so the filter stays in SQL.
        let scope = ids.map(|ids| serde_json::to_string(&ids)).transpose()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"{columns}
                       WHERE {condition}
                         AND {attempts} < ?1
                         AND (?2 IS NULL OR a.id IN (SELECT value FROM json_each(?2)))
                       ORDER BY {attempts}, a.id
                       LIMIT ?3"#,
                    columns = ARTICLE_COLUMNS,
                    condition = condition,
                    attempts = attempts_column,
                ))?;
                let articles = stmt
                    .query_map(params![MAX_WORK_ATTEMPTS, scope, limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn record_summary_failure(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET summary_attempts = summary_attempts + 1 WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn record_embedding_failure(&self, id: i64) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET embedding_attempts = embedding_attempts + 1 WHERE id = ?1",
                    params![id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Records an admission on an article that was already stored.
    ///
    /// An existing embedding is kept. Returns false when no row matched.
    pub async fn set_article_relevance(
        &self,
        feed_id: i64,
        title: &str,
        relevance: f32,
        embedding: Option<&[f32]>,
    ) -> Result<bool> {
        let title = title.to_string();
        let blob = embedding.map(encode_embedding);
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    r#"UPDATE articles
                       SET relevance = ?1, embedding = COALESCE(embedding, ?2)
                       WHERE feed_id = ?3 AND title = ?4"#,
                    params![relevance, blob, feed_id, title],
                )?)
            })
            .await?;
        Ok(updated > 0)
    }

    pub async fn update_article_summary(&self, id: i64, summary: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET summary = ?1 WHERE id = ?2",
                    params![summary, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn update_article_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        let blob = encode_embedding(embedding);
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE articles SET embedding = ?1 WHERE id = ?2",
                    params![blob, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Recent articles from feeds owned by `user_id`, newest first.
    ///
    /// An article is recent when it was published, or failing that fetched,
    /// at or after `since`.
    pub async fn get_recent_articles_for_user(
        &self,
        user_id: i64,
        since: DateTime<Utc>,
        selection: ArticleSelection,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let since = format_timestamp(since);
        let filter = match selection {
            ArticleSelection::Admitted => "a.relevance IS NOT NULL",
            ArticleSelection::Summarized => "a.summary IS NOT NULL",
        };
        let articles = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"{} JOIN feeds f ON a.feed_id = f.id
                       WHERE f.user_id = ?1
                         AND COALESCE(a.published_at, a.fetched_at) >= ?2
                         AND {}
                       ORDER BY COALESCE(a.published_at, a.fetched_at) DESC, a.id DESC
                       LIMIT ?3"#,
                    ARTICLE_COLUMNS, filter
                );
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params![user_id, since, limit as i64], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    /// Nearest stored articles to `query`, most similar first.
    ///
    /// Similarity is `1 - cosine distance`. Articles whose embedding has a
    /// different dimensionality than the query are ignored.
    pub async fn nearest_by_embedding(
        &self,
        query: &[f32],
        limit: usize,
        scope: SearchScope,
    ) -> Result<Vec<(Article, f32)>> {
        let articles = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"{} JOIN feeds f ON a.feed_id = f.id
                       WHERE a.embedding IS NOT NULL AND (?1 IS NULL OR f.user_id = ?1)"#,
                    ARTICLE_COLUMNS
                );
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(params![scope.user_id], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(retain_ids(articles, scope.feed_ids.as_deref(), |a| a.feed_id))
            })
            .await?;

        let mut scored: Vec<(Article, f32)> = articles
            .into_iter()
            .filter_map(|article| {
                let score = article
                    .embedding
                    .as_deref()
                    .and_then(|e| cosine_similarity(query, e).ok())?;
                Some((article, score))
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(limit);
        Ok(scored)
    }

    // Preference operations

    pub async fn get_preferences(&self, user_id: i64) -> Result<Option<UserPreferences>> {
        let prefs = self
            .conn
            .call(move |conn| {
                let prefs = conn
                    .query_row(
                        r#"SELECT user_id, selected_topics, custom_keywords, relevance_threshold,
                                  interest_profile_embedding, onboarding_completed, updated_at
                           FROM user_preferences WHERE user_id = ?1"#,
                        params![user_id],
                        preferences_from_row,
                    )
                    .optional()?;
                Ok(prefs)
            })
            .await?;
        Ok(prefs)
    }

    pub async fn upsert_preferences(&self, prefs: UserPreferences) -> Result<()> {
        let topics = serde_json::to_string(&prefs.selected_topics)?;
        let keywords = serde_json::to_string(&prefs.custom_keywords)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO user_preferences (user_id, selected_topics, custom_keywords,
                           relevance_threshold, interest_profile_embedding, onboarding_completed, updated_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                       ON CONFLICT(user_id) DO UPDATE SET
                           selected_topics = excluded.selected_topics,
                           custom_keywords = excluded.custom_keywords,
                           relevance_threshold = excluded.relevance_threshold,
                           interest_profile_embedding = excluded.interest_profile_embedding,
                           onboarding_completed = excluded.onboarding_completed,
                           updated_at = excluded.updated_at"#,
                    params![
                        prefs.user_id,
                        topics,
                        keywords,
                        prefs.relevance_threshold,
                        prefs.interest_profile_embedding.as_deref().map(encode_embedding),
                        prefs.onboarding_completed,
                        format_timestamp(prefs.updated_at),
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Returns false when the user has no preferences row.
    pub async fn set_relevance_threshold(&self, user_id: i64, threshold: u8) -> Result<bool> {
        let updated = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE user_preferences SET relevance_threshold = ?1, updated_at = ?2 WHERE user_id = ?3",
                    params![threshold, format_timestamp(Utc::now()), user_id],
                )?)
            })
            .await?;
        Ok(updated > 0)
    }
}

/// Summary or embedding failures after which an article stops being picked up.
pub const MAX_WORK_ATTEMPTS: i64 = 3;

const FEED_COLUMNS: &str =
    "SELECT id, user_id, title, url, category, popularity, last_fetched, created_at FROM feeds";

const ARTICLE_COLUMNS: &str = r#"SELECT a.id, a.feed_id, a.guid, a.title, a.link, a.content, a.summary,
                              a.embedding, a.relevance, a.published_at, a.fetched_at
                       FROM articles a"#;

/// Timestamps are stored as fixed-width RFC 3339 UTC so they compare lexically.
pub(crate) fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

pub(crate) fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

fn retain_ids<T>(items: Vec<T>, ids: Option<&[i64]>, key: impl Fn(&T) -> i64) -> Vec<T> {
    match ids {
        Some(ids) => items.into_iter().filter(|item| ids.contains(&key(item))).collect(),
        None => items,
    }
}

pub(super) fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp '{}'", raw)))
}

fn optional_timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

pub(super) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, anyhow::anyhow!(message).into())
}

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    let tier: String = row.get(2)?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        tier: tier
            .parse()
            .map_err(|e: AppError| conversion_error(2, e.to_string()))?,
        created_at: timestamp_column(row, 3)?,
    })
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        url: row.get(3)?,
        category: row.get(4)?,
        popularity: row.get(5)?,
        last_fetched: optional_timestamp_column(row, 6)?,
        created_at: timestamp_column(row, 7)?,
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        guid: row.get(2)?,
        title: row.get(3)?,
        link: row.get(4)?,
        content: row.get(5)?,
        summary: row.get(6)?,
        embedding: row
            .get::<_, Option<Vec<u8>>>(7)?
            .map(|blob| decode_embedding(&blob)),
        relevance: row.get::<_, Option<f64>>(8)?.map(|v| v as f32),
        published_at: optional_timestamp_column(row, 9)?,
        fetched_at: timestamp_column(row, 10)?,
    })
}

fn preferences_from_row(row: &Row) -> rusqlite::Result<UserPreferences> {
    let topics: String = row.get(1)?;
    let keywords: String = row.get(2)?;
    Ok(UserPreferences {
        user_id: row.get(0)?,
        selected_topics: serde_json::from_str(&topics)
            .map_err(|e| conversion_error(1, e.to_string()))?,
        custom_keywords: serde_json::from_str(&keywords)
            .map_err(|e| conversion_error(2, e.to_string()))?,
        relevance_threshold: row.get(3)?,
        interest_profile_embedding: row
            .get::<_, Option<Vec<u8>>>(4)?
            .map(|blob| decode_embedding(&blob)),
        onboarding_completed: row.get(5)?,
        updated_at: timestamp_column(row, 6)?,
    })
}
