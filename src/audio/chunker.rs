use std::sync::OnceLock;

use regex::Regex;

/// Per-call character limit of the speech provider.
pub const TTS_MAX_CHARS: usize = 4000;

fn sentence_end() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Terminal punctuation, optional closing quotes/brackets, then whitespace.
    RE.get_or_init(|| Regex::new(r#"[.!?]+["'\u{201D}\u{2019})\]]*\s+"#).expect("valid regex"))
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Splits `text` into pieces of at most `max_chars` characters.
///
/// Sentence boundaries are preferred, then word boundaries; a single word
/// longer than the limit is hard-cut rather than dropped. Joining the pieces
/// with single spaces reproduces the text up to whitespace normalization.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if char_len(text) <= max_chars {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences(text) {
        if char_len(sentence) > max_chars {
            flush(&mut chunks, &mut current);
            // The partial tail stays open for the sentences that follow.
            current = split_words(sentence, max_chars, &mut chunks);
            continue;
        }
        let needed = if current.is_empty() {
            char_len(sentence)
        } else {
            char_len(&current) + 1 + char_len(sentence)
        };
        if needed > max_chars {
            flush(&mut chunks, &mut current);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }
    flush(&mut chunks, &mut current);

    chunks
}

fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    for m in sentence_end().find_iter(text) {
        let sentence = text[start..m.end()].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        start = m.end();
    }
    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

/// Packs the words of an over-long sentence, hard-cutting over-long words.
/// Full pieces go to `chunks`; the unfinished last piece is returned.
fn split_words(sentence: &str, max_chars: usize, chunks: &mut Vec<String>) -> String {
    let mut current = String::new();
    for word in sentence.split_whitespace() {
        if char_len(word) > max_chars {
            flush(chunks, &mut current);
            let chars: Vec<char> = word.chars().collect();
            for piece in chars.chunks(max_chars) {
                chunks.push(piece.iter().collect());
            }
            continue;
        }
        let needed = if current.is_empty() {
            char_len(word)
        } else {
            char_len(&current) + 1 + char_len(word)
        };
        if needed > max_chars {
            flush(chunks, &mut current);
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    current
}

fn flush(chunks: &mut Vec<String>, current: &mut String) {
    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<&str> {
        s.split_whitespace().collect()
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(split_text("Hello there.", 4000), vec!["Hello there."]);
        assert!(split_text("   ", 10).is_empty());
    }

    #[test]
    fn test_prefers_sentence_boundaries() {
        let text = "First sentence here. Second one follows! Third? Last.";
        let chunks = split_text(text, 25);
        assert_eq!(
            chunks,
            vec!["First sentence here.", "Second one follows!", "Third? Last."]
        );
        assert!(chunks.iter().all(|c| c.chars().count() <= 25));
    }

    #[test]
    fn test_falls_back_to_word_boundaries() {
        let text = "alpha beta gamma delta epsilon zeta eta theta";
        let chunks = split_text(text, 12);
        assert!(chunks.iter().all(|c| c.chars().count() <= 12));
        // No word is ever split.
        for chunk in &chunks {
            for w in words(chunk) {
                assert!(words(text).contains(&w), "{} was split", w);
            }
        }
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_oversized_word_is_hard_cut_not_dropped() {
        let long = "x".repeat(25);
        let text = format!("short {} end", long);
        let chunks = split_text(&text, 10);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks.concat().replace(' ', ""), text.replace(' ', ""));
        assert_eq!(chunks.first().map(String::as_str), Some("short"));
    }

    #[test]
    fn test_word_split_tail_packs_with_next_sentence() {
        let text = "Tiny. alpha beta gamma delta. Next one.";
        let chunks = split_text(text, 20);
        assert_eq!(chunks, vec!["Tiny.", "alpha beta gamma", "delta. Next one."]);
    }

    #[test]
    fn test_multibyte_text_respects_char_limit() {
        let text = "Ünïcödé wörds àré fïné. ".repeat(40);
        let chunks = split_text(&text, 50);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 50));
        assert_eq!(words(&chunks.join(" ")), words(&text));
    }

    #[test]
    fn test_long_script_reassembles_in_order() {
        let text: String = (0..600)
            .map(|i| format!("Sentence number {} of the briefing. ", i))
            .collect();
        let chunks = split_text(&text, TTS_MAX_CHARS);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= TTS_MAX_CHARS));
        assert_eq!(words(&chunks.join(" ")), words(&text));
    }
}
