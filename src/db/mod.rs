mod episodes;
mod repository;
mod schema;

pub use repository::{ArticleSelection, Repository, SearchScope, MAX_WORK_ATTEMPTS};
