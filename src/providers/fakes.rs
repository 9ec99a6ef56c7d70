//! In-process stand-ins for the external services.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::EMBEDDING_DIMENSIONS;

use super::{BlobStorage, ChatProvider, EmbeddingProvider, SpeechSynthesizer};

/// Builds a full-length vector with the given `(index, value)` entries set.
pub fn sparse_vector(entries: &[(usize, f32)]) -> Vec<f32> {
    let mut v = vec![0.0; EMBEDDING_DIMENSIONS];
    for &(i, value) in entries {
        v[i] = value;
    }
    v
}

/// Maps text to vectors by substring rules; the first matching rule wins.
pub struct FakeEmbedder {
    rules: Vec<(String, Vec<f32>)>,
    default: Vec<f32>,
    fail_on: Vec<String>,
    pub calls: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(default: Vec<f32>) -> Self {
        Self {
            rules: Vec::new(),
            default,
            fail_on: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn rule(mut self, needle: &str, vector: Vec<f32>) -> Self {
        self.rules.push((needle.to_string(), vector));
        self
    }

    /// Texts containing `needle` fail with a non-retryable provider error.
    pub fn fail_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on.iter().any(|n| text.contains(n.as_str())) {
            return Err(AppError::Validation(format!("cannot embed '{}'", text)));
        }
        Ok(self
            .rules
            .iter()
            .find(|(needle, _)| text.contains(needle.as_str()))
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default.clone()))
    }
}

/// Returns a canned reply and records every prompt.
pub struct FakeChat {
    reply: String,
    fail_on: Vec<String>,
    pub prompts: Mutex<Vec<(String, u32)>>,
}

impl FakeChat {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fail_on: Vec::new(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts containing `needle` are rejected as invalid.
    pub fn fail_on(mut self, needle: &str) -> Self {
        self.fail_on.push(needle.to_string());
        self
    }
}

#[async_trait]
impl ChatProvider for FakeChat {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String> {
        self.prompts
            .lock()
            .unwrap()
            .push((prompt.to_string(), max_tokens));
        if self.fail_on.iter().any(|n| prompt.contains(n.as_str())) {
            return Err(AppError::Validation("prompt rejected".into()));
        }
        Ok(self.reply.clone())
    }
}

/// Echoes the text back as "audio" and can fail the first N calls.
pub struct FakeSynthesizer {
    pub calls: AtomicUsize,
    failures_left: AtomicUsize,
    pub inputs: Mutex<Vec<String>>,
}

impl FakeSynthesizer {
    pub fn new() -> Self {
        Self::failing(0)
    }

    pub fn failing(failures: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(failures),
            inputs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynthesizer {
    async fn synthesize(&self, text: &str, _voice: &str, _model: &str) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(AppError::provider("fake-tts", "service unavailable"));
        }
        self.inputs.lock().unwrap().push(text.to_string());
        Ok(text.as_bytes().to_vec())
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    pub blobs: Mutex<HashMap<String, Vec<u8>>>,
}

#[async_trait]
impl BlobStorage for MemoryStorage {
    async fn upload(&self, bytes: Vec<u8>, path: &str) -> Result<String> {
        self.blobs.lock().unwrap().insert(path.to_string(), bytes);
        Ok(format!("https://cdn.test/{}", path))
    }

    async fn delete(&self, public_url: &str) -> Result<bool> {
        let path = public_url.trim_start_matches("https://cdn.test/");
        Ok(self.blobs.lock().unwrap().remove(path).is_some())
    }
}
