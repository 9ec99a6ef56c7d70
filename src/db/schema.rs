pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- users table
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    email TEXT NOT NULL UNIQUE,
    tier TEXT NOT NULL DEFAULT 'free' CHECK (tier IN ('free', 'pro')),
    created_at TEXT NOT NULL
);

-- feeds table
CREATE TABLE IF NOT EXISTS feeds (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    category TEXT,
    popularity INTEGER,
    last_fetched TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(user_id, url)
);

CREATE INDEX IF NOT EXISTS idx_feeds_user_id ON feeds(user_id);

-- articles table; (feed_id, title) is the deduplication key
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid TEXT,
    title TEXT NOT NULL,
    link TEXT NOT NULL,
    content TEXT,
    summary TEXT,
    embedding BLOB,
    relevance REAL,
    published_at TEXT,
    fetched_at TEXT NOT NULL,
    summary_attempts INTEGER NOT NULL DEFAULT 0,
    embedding_attempts INTEGER NOT NULL DEFAULT 0,
    UNIQUE(feed_id, title)
);

CREATE INDEX IF NOT EXISTS idx_articles_feed_id ON articles(feed_id);
CREATE INDEX IF NOT EXISTS idx_articles_fetched_at ON articles(fetched_at DESC);

-- user_preferences table
CREATE TABLE IF NOT EXISTS user_preferences (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    selected_topics TEXT NOT NULL DEFAULT '[]',
    custom_keywords TEXT NOT NULL DEFAULT '[]',
    relevance_threshold INTEGER NOT NULL DEFAULT 80
        CHECK (relevance_threshold BETWEEN 0 AND 100),
    interest_profile_embedding BLOB,
    onboarding_completed INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

-- episodes table (one per user per day is enforced by the episode generator)
CREATE TABLE IF NOT EXISTS episodes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    script_text TEXT NOT NULL,
    audio_url TEXT NOT NULL,
    duration_minutes INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_episodes_user_created ON episodes(user_id, created_at);

CREATE TABLE IF NOT EXISTS episode_articles (
    episode_id INTEGER NOT NULL REFERENCES episodes(id) ON DELETE CASCADE,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    PRIMARY KEY (episode_id, article_id)
);

-- audio_cache table; survives episode deletion
CREATE TABLE IF NOT EXISTS audio_cache (
    script_hash TEXT PRIMARY KEY,
    audio_url TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- filtering_statistics table (append-only)
CREATE TABLE IF NOT EXISTS filtering_statistics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    date TEXT NOT NULL,
    included_articles INTEGER NOT NULL,
    filtered_out_articles INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_filtering_statistics_user_date ON filtering_statistics(user_id, date);
"#;
