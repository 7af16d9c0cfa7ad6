//! Typed decoding of structured policy output.
//!
//! Models wrap JSON in markdown fences or prose more often than not, so the
//! decoder tries, in order: the whole text, the first fenced block, and the
//! outermost `{...}` or `[...]` span.

use regex::Regex;
use serde::de::DeserializeOwned;
use std::sync::LazyLock;
use stepwise_ai::Message;
use thiserror::Error;

static FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z0-9_-]*\s*\n?(.*?)```").unwrap());

const PREVIEW_CHARS: usize = 200;

/// The policy answered, but not with the shape we asked for
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("policy returned no text")]
    Empty,

    #[error("no JSON found in policy output: {preview}")]
    NoJson { preview: String },

    #[error("policy output did not match the expected shape: {source}")]
    Invalid {
        preview: String,
        #[source]
        source: serde_json::Error,
    },

    /// Well-formed but semantically unusable (e.g. an empty step list)
    #[error("policy output rejected: {0}")]
    Rejected(String),
}

fn preview(text: &str) -> String {
    let mut p: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().count() > PREVIEW_CHARS {
        p.push_str("...");
    }
    p
}

/// Candidate JSON substrings, most specific first
fn candidates(text: &str) -> Vec<&str> {
    let mut out = vec![text];

    if let Some(inner) = FENCE.captures(text).and_then(|c| c.get(1)) {
        out.push(inner.as_str().trim());
    }

    let open = text.find(['{', '[']);
    if let Some(start) = open {
        let close = if text[start..].starts_with('{') { '}' } else { ']' };
        if let Some(end) = text.rfind(close) {
            if end > start {
                out.push(text[start..=end].trim());
            }
        }
    }
    out
}

/// Decode a JSON value of type `T` out of free text
pub fn decode_str<T: DeserializeOwned>(text: &str) -> Result<T, DecodeError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(DecodeError::Empty);
    }

    let mut last_err = None;
    for candidate in candidates(text) {
        match serde_json::from_str::<T>(candidate) {
            Ok(value) => return Ok(value),
            Err(e) => last_err = Some(e),
        }
    }

    match last_err {
        Some(source) if source.is_data() => Err(DecodeError::Invalid {
            preview: preview(text),
            source,
        }),
        _ => Err(DecodeError::NoJson {
            preview: preview(text),
        }),
    }
}

/// Decode the text of a policy response message
pub fn decode<T: DeserializeOwned>(message: &Message) -> Result<T, DecodeError> {
    decode_str(&message.text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Paths {
        paths: Vec<String>,
    }

    #[test]
    fn test_plain_json() {
        let p: Paths = decode_str(r#"{"paths": ["a.rs"]}"#).unwrap();
        assert_eq!(p.paths, vec!["a.rs"]);
    }

    #[test]
    fn test_fenced_json() {
        let text = "Here you go:\n```json\n{\"paths\": [\"src/main.rs\"]}\n```\nThanks";
        let p: Paths = decode_str(text).unwrap();
        assert_eq!(p.paths, vec!["src/main.rs"]);
    }

    #[test]
    fn test_json_inside_prose() {
        let text = "I think {\"paths\": []} covers it.";
        let p: Paths = decode_str(text).unwrap();
        assert!(p.paths.is_empty());
    }

    #[test]
    fn test_top_level_array() {
        let v: Vec<String> = decode_str("Steps: [\"one\", \"two\"]").unwrap();
        assert_eq!(v, vec!["one", "two"]);
    }

    #[test]
    fn test_wrong_shape_is_invalid() {
        let err = decode_str::<Paths>(r#"{"files": ["a"]}"#).unwrap_err();
        assert!(matches!(err, DecodeError::Invalid { .. }), "{err:?}");
    }

    #[test]
    fn test_no_json() {
        let err = decode_str::<Paths>("I could not find anything").unwrap_err();
        assert!(matches!(err, DecodeError::NoJson { .. }));
        assert!(matches!(decode_str::<Paths>("  "), Err(DecodeError::Empty)));
    }

    #[test]
    fn test_decode_message() {
        let msg = Message::ai_text("{\"paths\": [\"x\"]}");
        let p: Paths = decode(&msg).unwrap();
        assert_eq!(p.paths, vec!["x"]);
    }
}
