//! Markup stripping for text sent to speech synthesis.
//!
//! Assistant replies are Markdown. Read aloud verbatim, a synthesizer would
//! pronounce asterisks, hashes and URLs, so replies are flattened first:
//!
//! 1. Horizontal rules, heading `#`s, quote `>`s and list bullets at line starts are dropped
//! 2. `[text](url)` and `![alt](url)` collapse to `text` / `alt`
//! 3. Emphasis and code markers (`*`, `_`, `~`, `` ` ``) are removed
//! 4. Each run of newlines becomes a sentence break
//! 5. Whitespace runs collapse to one space

use regex::Regex;
use std::sync::LazyLock;

static HORIZONTAL_RULE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:[-*_=][ \t]*){3,}$").expect("horizontal rule pattern")
});

static LINE_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^[ \t]*(?:#{1,6}[ \t]*|>+[ \t]*|[-*+][ \t]+)").expect("line markup pattern")
});

static LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("link pattern"));

static EMPHASIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[*_~`]+").expect("emphasis pattern"));

static NEWLINE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[ \t]*(?:\r?\n[ \t]*)+").expect("newline pattern"));

static WHITESPACE_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Characters that already end a sentence, including the Devanagari danda.
const SENTENCE_END: [char; 7] = ['.', '!', '?', ':', ';', '।', '॥'];

/// Flatten Markdown into plain text suitable for speech.
///
/// Returns an empty string when nothing speakable remains.
pub fn sanitize_for_speech(text: &str) -> String {
    let text = HORIZONTAL_RULE.replace_all(text, "");
    let text = LINE_MARKUP.replace_all(&text, "");
    let text = LINK.replace_all(&text, "$1");
    let text = EMPHASIS.replace_all(&text, "");

    let mut spoken = String::with_capacity(text.len());
    for segment in NEWLINE_RUN.split(&text) {
        let segment = segment.trim();
        if segment.is_empty() {
            continue;
        }
        if !spoken.is_empty() {
            if spoken.ends_with(SENTENCE_END) {
                spoken.push(' ');
            } else {
                spoken.push_str(". ");
            }
        }
        spoken.push_str(segment);
    }

    WHITESPACE_RUN.replace_all(&spoken, " ").trim().to_owned()
}
