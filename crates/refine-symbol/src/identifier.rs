//! Identifiers and identifier candidates
//!
//! An [`Identifier`] is a selector-like reference to an entity on the
//! observable surface (`#submit`, `.card`, `nav > a.active`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Selector-like reference to a surface entity
///
/// Whitespace is normalized on construction so `"nav   a"` and `"nav a"`
/// compare equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Identifier with whitespace runs collapsed
    #[must_use]
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(raw.as_ref().split_whitespace().collect::<Vec<_>>().join(" "))
    }

    /// Normalized text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for the empty identifier
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compound parts separated by combinators, with pseudo-classes removed
    ///
    /// `"nav > a.active:hover"` yields `["nav", "a.active"]`.
    #[must_use]
    pub fn parts(&self) -> Vec<&str> {
        self.0
            .split(|c: char| c.is_whitespace() || matches!(c, '>' | '+' | '~'))
            .filter(|p| !p.is_empty())
            .map(|p| match p.find(':') {
                Some(0) | None => p,
                Some(i) => &p[..i],
            })
            .collect()
    }

    /// Lowercase word tokens, used for keyword matching
    #[must_use]
    pub fn tokens(&self) -> Vec<String> {
        tokenize(&self.0)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// An identifier proposed by the index for a target descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierCandidate {
    /// Proposed identifier
    pub identifier: Identifier,
    /// Match confidence, 0-100
    pub confidence: u8,
    /// Entity kind, if the index knows it
    pub entity_kind: Option<String>,
    /// Human-readable label
    pub label: String,
}

/// Split text into lowercase alphanumeric words
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}
