use std::time::Duration;

use feed_rs::parser;
use futures::stream::{self, StreamExt};
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use url::Url;

use crate::config::FetchConfig;
use crate::error::{AppError, Result};
use crate::models::{Feed, NewArticle};

/// Result of fetching one feed. Failures are reported, never raised.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchOutcome {
    pub success: bool,
    #[serde(skip)]
    pub articles: Vec<NewArticle>,
    pub error: Option<String>,
    /// Whether fetching again could succeed. Only meaningful on failure.
    #[serde(skip)]
    pub retryable: bool,
}

impl FetchOutcome {
    fn failed(error: impl Into<String>, retryable: bool) -> Self {
        Self {
            success: false,
            articles: Vec::new(),
            error: Some(error.into()),
            retryable,
        }
    }
}

/// A feed discovered from a user-supplied URL.
#[derive(Debug, Clone)]
pub struct DiscoveredFeed {
    pub title: String,
    pub url: String,
}

/// Accepts only absolute http(s) URLs.
pub fn validate_feed_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| AppError::Validation(format!("invalid feed URL '{}': {}", raw, e)))?;
    let supported = matches!(url.scheme(), "http" | "https") && url.host_str().is_some();
    if !supported {
        return Err(AppError::Validation(format!(
            "unsupported feed URL scheme '{}' in '{}'",
            url.scheme(),
            raw
        )));
    }
    Ok(url)
}

/// Parses RSS or Atom bytes into normalized articles.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<NewArticle>> {
    let feed = parser::parse(bytes)?;

    let articles = feed
        .entries
        .into_iter()
        .map(|entry| {
            // content, then summary/description
            let body_html = entry
                .content
                .as_ref()
                .and_then(|c| c.body.as_ref())
                .or_else(|| entry.summary.as_ref().map(|s| &s.content));

            let content = body_html
                .and_then(|html| html2text::from_read(html.as_bytes(), 10_000).ok())
                .map(|text| collapse_whitespace(&text))
                .filter(|text| !text.is_empty());

            NewArticle {
                guid: Some(entry.id).filter(|id| !id.is_empty()),
                title: entry
                    .title
                    .map(|t| collapse_whitespace(&t.content))
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| "Untitled".to_string()),
                link: entry
                    .links
                    .first()
                    .map(|l| l.href.clone())
                    .unwrap_or_default(),
                content,
                published_at: entry.published.or(entry.updated),
                embedding: None,
                relevance: None,
            }
        })
        .collect();

    Ok(articles)
}

fn collapse_whitespace(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct FeedFetcher {
    client: Client,
    concurrency: usize,
}

impl FeedFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self {
            client,
            concurrency: config.concurrency.max(1),
        })
    }

    /// Fetches and parses one feed.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        match self.try_fetch(url).await {
            Ok(articles) => FetchOutcome {
                success: true,
                articles,
                error: None,
                retryable: false,
            },
            Err(e) => FetchOutcome::failed(describe_fetch_error(url, &e), e.is_retryable()),
        }
    }

    async fn try_fetch(&self, url: &str) -> Result<Vec<NewArticle>> {
        let url = validate_feed_url(url)?;
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            // Client errors other than timeouts and throttling will not change on retry.
            let transient = status.is_server_error()
                || status == StatusCode::REQUEST_TIMEOUT
                || status == StatusCode::TOO_MANY_REQUESTS;
            if !transient {
                return Err(AppError::Validation(format!("HTTP {}", status)));
            }
            return Err(anyhow::anyhow!("HTTP {}", status).into());
        }

        let bytes = response.bytes().await?;
        parse_feed(&bytes)
    }

    /// Fetches several feeds concurrently; results keep the input order.
    pub async fn fetch_all(&self, feeds: Vec<Feed>) -> Vec<(Feed, FetchOutcome)> {
        stream::iter(feeds)
            .map(|feed| async move {
                let outcome = self.fetch(&feed.url).await;
                match &outcome.error {
                    None => tracing::debug!(
                        feed_id = feed.id,
                        articles = outcome.articles.len(),
                        "Fetched feed"
                    ),
                    Some(error) => tracing::warn!(feed_id = feed.id, %error, "Feed fetch failed"),
                }
                (feed, outcome)
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Resolves a URL to a feed, following an HTML page's alternate link if needed.
    pub async fn discover_feed(&self, url: &str) -> Result<DiscoveredFeed> {
        let url = validate_feed_url(url)?;
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Failed to fetch URL: HTTP {}", response.status()).into());
        }

        let final_url = response.url().to_string();
        let bytes = response.bytes().await?;

        if let Ok(feed) = parser::parse(&bytes[..]) {
            return Ok(DiscoveredFeed {
                title: feed
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled Feed".to_string()),
                url: final_url,
            });
        }

        let html = String::from_utf8_lossy(&bytes);
        if let Some(feed_url) = find_feed_link(&html, &final_url) {
            validate_feed_url(&feed_url)?;
            let feed_bytes = self.client.get(&feed_url).send().await?.bytes().await?;
            let feed = parser::parse(&feed_bytes[..])?;
            return Ok(DiscoveredFeed {
                title: feed
                    .title
                    .map(|t| t.content)
                    .unwrap_or_else(|| "Untitled Feed".to_string()),
                url: feed_url,
            });
        }

        Err(anyhow::anyhow!("Could not find RSS/Atom feed at this URL").into())
    }
}

fn describe_fetch_error(url: &str, error: &AppError) -> String {
    match error {
        AppError::Http(e) if e.is_timeout() => format!("Timed out fetching {}", url),
        AppError::Http(e) if e.is_connect() => format!("Could not connect to {}", url),
        AppError::FeedParse(e) => format!("Could not parse feed at {}: {}", url, e),
        other => format!("Failed to fetch {}: {}", url, other),
    }
}

/// Looks for `<link rel="alternate" type="application/rss+xml" href="...">`.
fn find_feed_link(html: &str, base_url: &str) -> Option<String> {
    let link_re = Regex::new(
        r#"<link[^>]*rel=["']alternate["'][^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#,
    )
    .ok()?;
    // type before rel
    let link_re2 = Regex::new(
        r#"<link[^>]*type=["']application/(rss|atom)\+xml["'][^>]*href=["']([^"']+)["']"#,
    )
    .ok()?;

    let href = link_re
        .captures(html)
        .or_else(|| link_re2.captures(html))
        .and_then(|cap| cap.get(2))
        .map(|m| m.as_str().to_string())?;

    Some(resolve_url(&href, base_url))
}

fn resolve_url(href: &str, base_url: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        return href.to_string();
    }
    Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}
