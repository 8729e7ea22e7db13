//! Candidate and accepted artifacts
//!
//! A [`Candidate`] is whatever the generative oracle proposed. An [`Artifact`]
//! is a candidate that survived validation and was accepted by a session; it is
//! immutable and replaced wholesale on the next acceptance.

use crate::hash::ContentHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A proposed pair of fragments, not yet accepted
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Candidate {
    /// Declarative appearance rules (CSS-like)
    pub appearance_rules: String,
    /// Imperative behavior instructions (script)
    pub behavior_instructions: String,
}

impl Candidate {
    /// Create a candidate from its two fragments
    #[must_use]
    pub fn new(appearance_rules: impl Into<String>, behavior_instructions: impl Into<String>) -> Self {
        Self {
            appearance_rules: appearance_rules.into(),
            behavior_instructions: behavior_instructions.into(),
        }
    }

    /// Content hash over both fragments
    #[must_use]
    pub fn hash(&self) -> ContentHash {
        ContentHash::compute_parts(&[&self.appearance_rules, &self.behavior_instructions])
    }

    /// Total size in characters across both fragments
    #[must_use]
    pub fn size(&self) -> usize {
        self.appearance_rules.chars().count() + self.behavior_instructions.chars().count()
    }

    /// True if both fragments are blank
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.appearance_rules.trim().is_empty() && self.behavior_instructions.trim().is_empty()
    }
}

/// An accepted artifact owned by a session
///
/// # Invariants
/// - `hash` is always `candidate.hash()`
/// - Immutable after construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    candidate: Candidate,
    version: u64,
    accepted_at: DateTime<Utc>,
    hash: ContentHash,
}

impl Artifact {
    /// Accept a validated candidate as the given version
    #[must_use]
    pub fn accept(candidate: Candidate, version: u64) -> Self {
        let hash = candidate.hash();
        Self {
            candidate,
            version,
            accepted_at: Utc::now(),
            hash,
        }
    }

    /// The accepted fragments
    #[inline]
    #[must_use]
    pub fn candidate(&self) -> &Candidate {
        &self.candidate
    }

    /// Declarative appearance fragment
    #[inline]
    #[must_use]
    pub fn appearance_rules(&self) -> &str {
        &self.candidate.appearance_rules
    }

    /// Imperative behavior fragment
    #[inline]
    #[must_use]
    pub fn behavior_instructions(&self) -> &str {
        &self.candidate.behavior_instructions
    }

    /// Monotonic version, 1 for the first accepted artifact
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// When this version was accepted
    #[inline]
    #[must_use]
    pub const fn accepted_at(&self) -> DateTime<Utc> {
        self.accepted_at
    }

    /// Content hash over both fragments
    #[inline]
    #[must_use]
    pub const fn hash(&self) -> ContentHash {
        self.hash
    }

    /// True when this artifact carries exactly the given fragments
    #[must_use]
    pub fn same_content(&self, candidate: &Candidate) -> bool {
        self.hash == candidate.hash()
    }

    /// Recompute the content hash and compare with the stored one
    ///
    /// # Errors
    /// Returns [`ArtifactError::HashMismatch`] if the content was tampered with
    /// after deserialization.
    pub fn verify(&self) -> Result<(), ArtifactError> {
        let actual = self.candidate.hash();
        if actual == self.hash {
            Ok(())
        } else {
            Err(ArtifactError::HashMismatch {
                expected: self.hash,
                actual,
            })
        }
    }
}

/// Errors related to artifact operations
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Hash mismatch (integrity check failed)
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_records_hash_and_version() {
        let candidate = Candidate::new(".btn { color: red; }", "");
        let artifact = Artifact::accept(candidate.clone(), 3);

        assert_eq!(artifact.version(), 3);
        assert_eq!(artifact.hash(), candidate.hash());
        assert!(artifact.same_content(&candidate));
        assert!(artifact.verify().is_ok());
    }

    #[test]
    fn hash_distinguishes_fragment_boundaries() {
        let a = Candidate::new("ab", "c");
        let b = Candidate::new("a", "bc");
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn verify_detects_tampering() {
        let artifact = Artifact::accept(Candidate::new("a {}", "x()"), 1);
        let mut json = serde_json::to_value(&artifact).unwrap();
        json["candidate"]["behavior_instructions"] = serde_json::Value::from("y()");
        let tampered: Artifact = serde_json::from_value(json).unwrap();

        assert!(matches!(
            tampered.verify(),
            Err(ArtifactError::HashMismatch { .. })
        ));
    }

    #[test]
    fn size_counts_chars_of_both_fragments() {
        let candidate = Candidate::new("é{}", "ab");
        assert_eq!(candidate.size(), 5);
        assert!(!candidate.is_empty());
        assert!(Candidate::new("  ", "\n").is_empty());
    }
}
