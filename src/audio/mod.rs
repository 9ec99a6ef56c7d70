//! Content-addressed audio rendering of episode scripts.

mod cache;
mod chunker;

pub use cache::{AudioGenerator, GeneratedAudio};
pub use chunker::{split_text, TTS_MAX_CHARS};

use sha2::{Digest, Sha256};

/// Narration pace used for budgeting scripts and estimating durations.
pub const WORDS_PER_MINUTE: usize = 150;

/// Hex SHA-256 of the whole script, the audio cache key.
pub fn script_hash(script_text: &str) -> String {
    hex::encode(Sha256::digest(script_text.as_bytes()))
}

/// Spoken length of `text` in whole minutes, rounded up, at least one.
pub fn estimate_minutes(text: &str) -> u32 {
    let words = text.split_whitespace().count();
    words.div_ceil(WORDS_PER_MINUTE).max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic_and_distinct() {
        let a = script_hash("Good morning, here is your briefing.");
        assert_eq!(a, script_hash("Good morning, here is your briefing."));
        assert_ne!(a, script_hash("Good morning, here is your briefing!"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            script_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_estimate_minutes() {
        assert_eq!(estimate_minutes(""), 1);
        assert_eq!(estimate_minutes(&"word ".repeat(150)), 1);
        assert_eq!(estimate_minutes(&"word ".repeat(151)), 2);
        assert_eq!(estimate_minutes(&"word ".repeat(4500)), 30);
    }
}
