//! Language-model work: article summaries and episode scripts.

mod script;
mod summarizer;

pub use script::{EpisodeScriptAssembler, ScriptDraft};
pub use summarizer::Summarizer;
