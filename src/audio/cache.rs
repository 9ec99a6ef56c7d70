use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info};

use crate::config::ProviderConfig;
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::providers::{BlobStorage, SpeechSynthesizer};
use crate::retry::{with_retry, RetryPolicy};

use super::chunker::{split_text, TTS_MAX_CHARS};
use super::script_hash;

#[derive(Debug, Clone, Serialize)]
pub struct GeneratedAudio {
    pub audio_url: String,
    pub script_hash: String,
    pub from_cache: bool,
    /// Speech calls made; zero on a cache hit.
    pub chunks: usize,
}

/// Renders scripts to audio, reusing earlier renders of identical text.
pub struct AudioGenerator {
    repo: Arc<Repository>,
    tts: Arc<dyn SpeechSynthesizer>,
    storage: Arc<dyn BlobStorage>,
    policy: RetryPolicy,
    voice: String,
    model: String,
    max_chunk_chars: usize,
}

impl AudioGenerator {
    pub fn new(
        repo: Arc<Repository>,
        tts: Arc<dyn SpeechSynthesizer>,
        storage: Arc<dyn BlobStorage>,
        config: &ProviderConfig,
    ) -> Self {
        Self {
            repo,
            tts,
            storage,
            policy: RetryPolicy::provider(),
            voice: config.tts_voice.clone(),
            model: config.tts_model.clone(),
            max_chunk_chars: TTS_MAX_CHARS,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_chunk_chars(mut self, max_chunk_chars: usize) -> Self {
        self.max_chunk_chars = max_chunk_chars.max(1);
        self
    }

    pub async fn generate(&self, script_text: &str) -> Result<GeneratedAudio> {
        if script_text.trim().is_empty() {
            return Err(AppError::Validation("script text is empty".into()));
        }

        let hash = script_hash(script_text);
        if let Some(audio_url) = self.repo.get_cached_audio(&hash).await? {
            debug!(script_hash = %hash, "Audio cache hit");
            return Ok(GeneratedAudio {
                audio_url,
                script_hash: hash,
                from_cache: true,
                chunks: 0,
            });
        }

        let chunks = split_text(script_text, self.max_chunk_chars);
        let mut audio = Vec::new();
        for (index, chunk) in chunks.iter().enumerate() {
            let bytes = with_retry(&self.policy, || {
                self.tts.synthesize(chunk, &self.voice, &self.model)
            })
            .await?;
            debug!(chunk = index, bytes = bytes.len(), "Synthesized chunk");
            // MP3 frames are self-delimiting, so byte concatenation plays back in order.
            audio.extend_from_slice(&bytes);
        }

        let path = format!("episodes/{}.mp3", hash);
        let audio_url = self.storage.upload(audio, &path).await?;
        self.repo.upsert_audio_cache(&hash, &audio_url).await?;

        info!(script_hash = %hash, chunks = chunks.len(), url = %audio_url, "Generated episode audio");
        Ok(GeneratedAudio {
            audio_url,
            script_hash: hash,
            from_cache: false,
            chunks: chunks.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fakes::{FakeSynthesizer, MemoryStorage};
    use std::sync::atomic::Ordering;

    async fn generator(
        tts: Arc<FakeSynthesizer>,
        storage: Arc<MemoryStorage>,
    ) -> AudioGenerator {
        let repo = Arc::new(Repository::open_in_memory().await.unwrap());
        AudioGenerator::new(repo, tts, storage, &ProviderConfig::default())
            .with_policy(RetryPolicy::immediate(4))
    }

    #[tokio::test]
    async fn test_identical_script_is_served_from_cache() {
        let tts = Arc::new(FakeSynthesizer::new());
        let storage = Arc::new(MemoryStorage::default());
        let generator = generator(tts.clone(), storage.clone()).await;

        let first = generator.generate("Hello listeners. Here is the news.").await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.chunks, 1);
        assert_eq!(
            first.audio_url,
            format!("https://cdn.test/episodes/{}.mp3", first.script_hash)
        );

        let second = generator.generate("Hello listeners. Here is the news.").await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.audio_url, first.audio_url);
        assert_eq!(tts.calls.load(Ordering::SeqCst), 1);
        assert_eq!(storage.blobs.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_long_script_is_chunked_and_concatenated_in_order() {
        let tts = Arc::new(FakeSynthesizer::new());
        let storage = Arc::new(MemoryStorage::default());
        let generator = generator(tts.clone(), storage.clone())
            .await
            .with_max_chunk_chars(20);

        let script = "One short line. Two short lines. Three short lines.";
        let audio = generator.generate(script).await.unwrap();
        assert_eq!(audio.chunks, 3);

        let inputs = tts.inputs.lock().unwrap().clone();
        assert_eq!(
            inputs,
            vec!["One short line.", "Two short lines.", "Three short lines."]
        );
        let blobs = storage.blobs.lock().unwrap();
        let stored = blobs.get(&format!("episodes/{}.mp3", audio.script_hash)).unwrap();
        assert_eq!(stored, &inputs.concat().into_bytes());
    }

    #[tokio::test]
    async fn test_transient_synthesis_failures_are_retried() {
        let tts = Arc::new(FakeSynthesizer::failing(2));
        let storage = Arc::new(MemoryStorage::default());
        let generator = generator(tts.clone(), storage).await;

        let audio = generator.generate("Retry me.").await.unwrap();
        assert!(!audio.from_cache);
        assert_eq!(tts.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_persistent_failure_stores_nothing() {
        let tts = Arc::new(FakeSynthesizer::failing(10));
        let storage = Arc::new(MemoryStorage::default());
        let generator = generator(tts.clone(), storage.clone()).await;

        let result = generator.generate("Never works.").await;
        assert!(matches!(result, Err(AppError::RetriesExhausted { attempts: 4, .. })));
        assert!(storage.blobs.lock().unwrap().is_empty());
        assert!(generator
            .repo
            .get_cached_audio(&script_hash("Never works."))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_empty_script_is_rejected() {
        let tts = Arc::new(FakeSynthesizer::new());
        let generator = generator(tts.clone(), Arc::new(MemoryStorage::default())).await;
        assert!(matches!(generator.generate("  ").await, Err(AppError::Validation(_))));
        assert_eq!(tts.calls.load(Ordering::SeqCst), 0);
    }
}
