//! Personalized daily audio news briefings.
//!
//! Feeds are fetched and deduplicated, articles are embedded and filtered
//! against each user's interest profile, and the admitted stories are turned
//! into a script and a cached audio episode by background jobs.

pub mod ai;
pub mod app;
pub mod audio;
pub mod config;
pub mod db;
pub mod embedding;
pub mod episode;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod models;
pub mod pipeline;
pub mod profile;
pub mod providers;
pub mod relevance;
pub mod retry;
pub mod scheduler;
pub mod similarity;

pub use error::{AppError, Result};
