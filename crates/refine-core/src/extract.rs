//! Lenient extraction of structured payloads from oracle text
//!
//! Oracles wrap JSON in prose, code fences or both. The scanner finds the
//! first balanced `{...}` / `[...]` region (string and escape aware) and only
//! that region is deserialized. Everything outside it is discarded.

use crate::error::ExtractError;
use serde::de::DeserializeOwned;

/// The first balanced delimiter region
///
/// An opening delimiter that never closes is skipped and scanning resumes
/// after it.
///
/// # Errors
/// [`ExtractError::NoDelimitedRegion`] if no `{` or `[` occurs at all;
/// [`ExtractError::Unbalanced`] if delimiters occur but none close.
pub fn first_balanced_region(text: &str) -> Result<&str, ExtractError> {
    let bytes = text.as_bytes();
    let mut first_open = None;
    let mut pos = 0;

    while let Some(offset) = bytes[pos..].iter().position(|b| matches!(b, b'{' | b'[')) {
        let start = pos + offset;
        first_open.get_or_insert(start);
        match region_end(bytes, start) {
            Some(end) => return Ok(&text[start..=end]),
            None => pos = start + 1,
        }
    }

    match first_open {
        None => Err(ExtractError::NoDelimitedRegion),
        Some(start) => Err(ExtractError::Unbalanced(start)),
    }
}

/// Index of the delimiter closing the region opened at `start`
fn region_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut stack: Vec<u8> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => stack.push(b'}'),
            b'[' => stack.push(b']'),
            b'}' | b']' => {
                if stack.pop() != Some(b) {
                    return None;
                }
                if stack.is_empty() {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deserialize the first balanced region as `T`
///
/// # Errors
/// Returns the scan error, or [`ExtractError::Json`] if the first region is
/// not a `T`. Later regions are never consulted.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T, ExtractError> {
    let region = first_balanced_region(text)?;
    serde_json::from_str(region).map_err(ExtractError::Json)
}

/// A fenced code block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FencedBlock {
    /// Language tag, lowercased (empty when absent)
    pub lang: String,
    /// Text between the fences
    pub body: String,
}

/// Collect fenced code blocks; an unterminated fence runs to end of text
#[must_use]
pub fn extract_fenced_blocks(text: &str) -> Vec<FencedBlock> {
    let mut blocks = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match (current.take(), trimmed.strip_prefix("```")) {
            (None, Some(tag)) => {
                let lang = tag.trim().split_whitespace().next().unwrap_or_default();
                current = Some((lang.to_ascii_lowercase(), Vec::new()));
            }
            (None, None) => {}
            (Some((lang, body)), Some(_)) => blocks.push(FencedBlock {
                lang,
                body: body.join("\n"),
            }),
            (Some((lang, mut body)), None) => {
                body.push(line);
                current = Some((lang, body));
            }
        }
    }
    if let Some((lang, body)) = current {
        blocks.push(FencedBlock {
            lang,
            body: body.join("\n"),
        });
    }
    blocks
}
