//! Identifier index
//!
//! [`IdentifierIndex`] is the seam to whatever knows which entities exist on
//! the observable surface. [`InMemoryIdentifierIndex`] keeps them in a radix
//! trie so selector-hint prefixes can be matched cheaply.

use crate::identifier::{tokenize, Identifier, IdentifierCandidate};
use crate::view::IdentifierIndexView;
use async_trait::async_trait;
use parking_lot::RwLock;
use radix_trie::{Trie, TrieCommon};
use refine_artifact::TargetDescriptor;
use std::collections::{BTreeSet, HashMap};

/// Maximum candidates returned per query
pub const MAX_CANDIDATES: usize = 10;

/// Confidence for an exact selector-hint match
const EXACT_CONFIDENCE: u8 = 95;
/// Confidence for a selector-hint prefix match
const PREFIX_CONFIDENCE: u8 = 70;
/// Keyword matches score `KEYWORD_BASE + KEYWORD_SPAN * overlap`
const KEYWORD_BASE: f64 = 40.0;
const KEYWORD_SPAN: f64 = 50.0;

/// Source of identifier candidates for surface entities
#[async_trait]
pub trait IdentifierIndex: Send + Sync {
    /// Candidates for the described entity, best first
    async fn query(
        &self,
        descriptor: &TargetDescriptor,
    ) -> Result<Vec<IdentifierCandidate>, IndexError>;

    /// Snapshot of every known identifier
    async fn view(&self) -> Result<IdentifierIndexView, IndexError>;
}

/// Errors from identifier index operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// Backing index could not be reached
    #[error("identifier index unavailable: {0}")]
    Unavailable(String),

    /// Descriptor carries nothing to search for
    #[error("invalid target descriptor: {0}")]
    InvalidDescriptor(String),

    /// Identifier already indexed
    #[error("identifier already indexed: {identifier}")]
    Duplicate { identifier: String },
}

/// Indexed entity with metadata
#[derive(Debug, Clone)]
struct IndexedEntry {
    identifier: Identifier,
    entity_kind: Option<String>,
    label: String,
    tokens: BTreeSet<String>,
}

/// Thread-safe in-memory index backed by a radix trie
#[derive(Debug, Default)]
pub struct InMemoryIdentifierIndex {
    trie: RwLock<Trie<String, IndexedEntry>>,
}

impl InMemoryIdentifierIndex {
    /// Create empty index
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an entity
    ///
    /// # Errors
    /// Returns [`IndexError::Duplicate`] if the identifier is already present
    pub fn insert(
        &self,
        identifier: impl Into<Identifier>,
        entity_kind: Option<&str>,
        label: &str,
    ) -> Result<(), IndexError> {
        let identifier = identifier.into();
        let key = identifier.as_str().to_owned();

        let mut trie = self.trie.write();
        if trie.get(&key).is_some() {
            return Err(IndexError::Duplicate { identifier: key });
        }

        let mut tokens: BTreeSet<String> = identifier.tokens().into_iter().collect();
        tokens.extend(tokenize(label));
        if let Some(kind) = entity_kind {
            tokens.extend(tokenize(kind));
        }

        trie.insert(
            key,
            IndexedEntry {
                identifier,
                entity_kind: entity_kind.map(str::to_owned),
                label: label.to_owned(),
                tokens,
            },
        );
        Ok(())
    }

    /// Remove an entity; returns true if it was present
    pub fn remove(&self, identifier: &Identifier) -> bool {
        self.trie.write().remove(identifier.as_str()).is_some()
    }

    /// Number of indexed identifiers
    #[must_use]
    pub fn len(&self) -> usize {
        self.trie.read().len()
    }

    /// True if nothing is indexed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Score every entry against the descriptor
    fn score(&self, descriptor: &TargetDescriptor) -> Vec<IdentifierCandidate> {
        let trie = self.trie.read();
        let mut best: HashMap<String, IdentifierCandidate> = HashMap::new();

        if let Some(hint) = descriptor.selector_hint.as_deref().map(str::trim) {
            if !hint.is_empty() {
                let hint = Identifier::new(hint);
                if let Some(entry) = trie.get(hint.as_str()) {
                    keep_best(&mut best, EXACT_CONFIDENCE, entry);
                }
                if let Some(subtrie) = trie.get_raw_descendant(hint.as_str()) {
                    for entry in subtrie.values() {
                        if entry.identifier.as_str().starts_with(hint.as_str())
                            && entry.identifier != hint
                        {
                            keep_best(&mut best, PREFIX_CONFIDENCE, entry);
                        }
                    }
                }
            }
        }

        let mut wanted: BTreeSet<String> = tokenize(&descriptor.description).into_iter().collect();
        if let Some(kind) = &descriptor.entity_kind {
            wanted.extend(tokenize(kind));
        }
        if !wanted.is_empty() {
            for entry in trie.values() {
                let shared = entry.tokens.intersection(&wanted).count();
                if shared == 0 {
                    continue;
                }
                #[allow(clippy::cast_precision_loss)]
                let ratio = shared as f64 / wanted.len() as f64;
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let confidence = (KEYWORD_BASE + KEYWORD_SPAN * ratio).round() as u8;
                keep_best(&mut best, confidence, entry);
            }
        }

        let mut candidates: Vec<IdentifierCandidate> = best.into_values().collect();
        candidates.sort_by(|a, b| {
            b.confidence
                .cmp(&a.confidence)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        candidates.truncate(MAX_CANDIDATES);
        candidates
    }
}

fn keep_best(
    best: &mut HashMap<String, IdentifierCandidate>,
    confidence: u8,
    entry: &IndexedEntry,
) {
    let slot = best
        .entry(entry.identifier.as_str().to_owned())
        .or_insert_with(|| IdentifierCandidate {
            identifier: entry.identifier.clone(),
            confidence,
            entity_kind: entry.entity_kind.clone(),
            label: entry.label.clone(),
        });
    slot.confidence = slot.confidence.max(confidence);
}

#[async_trait]
impl IdentifierIndex for InMemoryIdentifierIndex {
    async fn query(
        &self,
        descriptor: &TargetDescriptor,
    ) -> Result<Vec<IdentifierCandidate>, IndexError> {
        if descriptor.is_blank() {
            return Err(IndexError::InvalidDescriptor(
                "descriptor has neither a selector hint nor a description".into(),
            ));
        }
        let candidates = self.score(descriptor);
        tracing::debug!(
            description = %descriptor.description,
            matches = candidates.len(),
            "identifier index query"
        );
        Ok(candidates)
    }

    async fn view(&self) -> Result<IdentifierIndexView, IndexError> {
        let trie = self.trie.read();
        Ok(IdentifierIndexView::new(
            trie.values().map(|e| e.identifier.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> InMemoryIdentifierIndex {
        let index = InMemoryIdentifierIndex::new();
        index.insert("#submit", Some("button"), "Submit order").unwrap();
        index.insert("#submit-secondary", Some("button"), "Save draft").unwrap();
        index.insert(".card", Some("container"), "Product card").unwrap();
        index.insert("#title", Some("heading"), "Page title").unwrap();
        index
    }

    #[test]
    fn rejects_duplicate() {
        let index = sample();
        let result = index.insert("#submit", None, "again");
        assert!(matches!(result, Err(IndexError::Duplicate { .. })));
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn remove_entry() {
        let index = sample();
        assert!(index.remove(&Identifier::new(".card")));
        assert!(!index.remove(&Identifier::new(".card")));
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn exact_hint_beats_prefix() {
        let index = sample();
        let descriptor = TargetDescriptor::default().with_selector("#submit");
        let candidates = index.query(&descriptor).await.unwrap();

        assert_eq!(candidates[0].identifier, Identifier::new("#submit"));
        assert_eq!(candidates[0].confidence, 95);
        assert_eq!(candidates[1].identifier, Identifier::new("#submit-secondary"));
        assert_eq!(candidates[1].confidence, 70);
    }

    #[tokio::test]
    async fn keyword_overlap_scores_by_ratio() {
        let index = sample();
        let descriptor = TargetDescriptor::from_text("product card");
        let candidates = index.query(&descriptor).await.unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].identifier, Identifier::new(".card"));
        assert_eq!(candidates[0].confidence, 90);
    }

    #[tokio::test]
    async fn blank_descriptor_is_invalid() {
        let index = sample();
        let result = index.query(&TargetDescriptor::default()).await;
        assert!(matches!(result, Err(IndexError::InvalidDescriptor(_))));
    }

    #[tokio::test]
    async fn view_lists_all_identifiers() {
        let view = sample().view().await.unwrap();
        assert_eq!(view.len(), 4);
        assert!(view.contains(&Identifier::new("#title")));
    }
}
