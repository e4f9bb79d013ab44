//! Response sanitizer
//!
//! The model's `response` string must be pure speakable text before it
//! reaches synthesis. Structural leakage happens — fences, stray JSON,
//! markup — and a caller should never hear a brace read aloud.

use once_cell::sync::Lazy;
use regex::Regex;

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"```[a-zA-Z]*|```").unwrap());
static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"</?[a-zA-Z][^>]*>").unwrap());
static JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r#"\{[^{}]*"[^"]+"\s*:[^{}]*\}"#).unwrap());
static EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[*_]{1,3}([^*_]+)[*_]{1,3}").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Strip structural markers from a response, leaving speakable text.
pub fn sanitize(text: &str) -> String {
    let text = CODE_FENCE.replace_all(text, " ");
    let text = JSON_OBJECT.replace_all(&text, " ");
    let text = TAG.replace_all(&text, " ");
    let text = EMPHASIS.replace_all(&text, "$1");
    let text = WHITESPACE.replace_all(&text, " ");
    text.trim().to_string()
}
