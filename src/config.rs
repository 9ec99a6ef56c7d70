use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{AppError, Result};
use crate::models::EMBEDDING_DIMENSIONS;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    #[serde(default)]
    pub providers: ProviderConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Falls back to `OPENAI_API_KEY` when unset.
    pub api_key: Option<String>,
    pub base_url: String,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub chat_model: String,
    pub tts_model: String,
    pub tts_voice: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            embedding_dimensions: EMBEDDING_DIMENSIONS,
            chat_model: "gpt-4o-mini".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl ProviderConfig {
    pub fn resolved_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .ok_or_else(|| {
                AppError::Config("no provider API key (set providers.api_key or OPENAI_API_KEY)".into())
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Feeds fetched at once within a single job.
    pub concurrency: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            user_agent: "briefcast/1.0".to_string(),
            concurrency: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub lookback_hours: i64,
    pub max_script_articles: usize,
    pub summary_max_tokens: u32,
    /// Rows handled per summarize / embed job run.
    pub batch_size: usize,
    /// Run the per-user processing pipeline before assembling an episode.
    pub refresh_before_episode: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lookback_hours: 48,
            max_script_articles: 20,
            summary_max_tokens: 150,
            batch_size: 100,
            refresh_before_episode: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub audio_dir: String,
    pub public_base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            audio_dir: data_dir().join("audio").to_string_lossy().to_string(),
            public_base_url: "http://localhost:8080/audio".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub fetch_cron: String,
    pub summarize_cron: String,
    pub embed_cron: String,
    pub episodes_cron: String,
    pub completed_retention_hours: i64,
    pub failed_retention_hours: i64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            fetch_cron: "0 0 * * * *".to_string(),
            summarize_cron: "0 10,40 * * * *".to_string(),
            embed_cron: "0 20,50 * * * *".to_string(),
            episodes_cron: "0 0 6 * * *".to_string(),
            completed_retention_hours: 24,
            failed_retention_hours: 24 * 7,
        }
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("briefcast")
}

fn default_db_path() -> String {
    let data_dir = data_dir();
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("briefcast.db").to_string_lossy().to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            providers: ProviderConfig::default(),
            fetch: FetchConfig::default(),
            pipeline: PipelineConfig::default(),
            storage: StorageConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &std::path::Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, config_path: &std::path::Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("briefcast")
            .join("config.toml")
    }
}
