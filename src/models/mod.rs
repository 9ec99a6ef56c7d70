mod article;
mod episode;
mod feed;
mod preferences;
mod user;

pub use article::{Article, NewArticle};
pub use episode::{Episode, NewEpisode};
pub use feed::{Feed, NewFeed};
pub use preferences::{FilteringStats, UserPreferences, DEFAULT_RELEVANCE_THRESHOLD};
pub use user::{Tier, User};

/// Dimensionality shared by every article and interest-profile embedding.
pub const EMBEDDING_DIMENSIONS: usize = 1536;
