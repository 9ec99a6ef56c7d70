mod dedup;
mod fetcher;

pub use dedup::{Deduplicator, StoreOutcome};
pub use fetcher::{parse_feed, validate_feed_url, DiscoveredFeed, FeedFetcher, FetchOutcome};
