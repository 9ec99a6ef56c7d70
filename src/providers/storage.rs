use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::{AppError, Result};

use super::BlobStorage;

/// Stores blobs on the local filesystem behind a public base URL.
pub struct LocalBlobStorage {
    root: PathBuf,
    public_base_url: String,
}

impl LocalBlobStorage {
    pub fn new(root: impl Into<PathBuf>, public_base_url: &str) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if path.is_empty() || !safe {
            return Err(AppError::Validation(format!("invalid blob path '{}'", path)));
        }
        Ok(self.root.join(relative))
    }

    fn path_from_url<'a>(&self, public_url: &'a str) -> Option<&'a str> {
        public_url
            .strip_prefix(&self.public_base_url)
            .and_then(|rest| rest.strip_prefix('/'))
    }
}

#[async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn upload(&self, bytes: Vec<u8>, path: &str) -> Result<String> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, bytes).await?;
        tracing::debug!(path, "Stored blob");
        Ok(format!("{}/{}", self.public_base_url, path))
    }

    async fn delete(&self, public_url: &str) -> Result<bool> {
        let Some(path) = self.path_from_url(public_url) else {
            return Ok(false);
        };
        let target = self.resolve(path)?;
        match tokio::fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
