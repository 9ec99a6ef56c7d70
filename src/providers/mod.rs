//! Seams to the external services the pipeline consumes.
//!
//! Every collaborator is an object-safe trait so the pipeline, audio
//! generator and workers receive them through their constructors.

mod openai;
mod storage;

#[cfg(test)]
pub(crate) mod fakes;

use async_trait::async_trait;

use crate::error::Result;

pub use openai::OpenAiClient;
pub use storage::LocalBlobStorage;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String>;
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, voice: &str, model: &str) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stores `bytes` under `path` and returns its public URL.
    async fn upload(&self, bytes: Vec<u8>, path: &str) -> Result<String>;

    /// Returns false when nothing was stored at that URL.
    async fn delete(&self, public_url: &str) -> Result<bool>;
}
