//! Immutable view of the identifier index
//!
//! A view is captured alongside every accepted artifact so that a rollback
//! restores the identifier set the artifact was validated against.

use crate::identifier::{Identifier, IdentifierCandidate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot of known identifiers plus freshly proposed candidates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierIndexView {
    known: BTreeSet<Identifier>,
    fresh: BTreeMap<Identifier, u8>,
}

impl IdentifierIndexView {
    /// View over `known` with no fresh candidates
    #[must_use]
    pub fn new(known: impl IntoIterator<Item = Identifier>) -> Self {
        Self {
            known: known.into_iter().collect(),
            fresh: BTreeMap::new(),
        }
    }

    /// Attach the fresh candidates returned by an index query
    #[must_use]
    pub fn with_fresh(mut self, candidates: &[IdentifierCandidate]) -> Self {
        for candidate in candidates {
            let entry = self.fresh.entry(candidate.identifier.clone()).or_insert(0);
            *entry = (*entry).max(candidate.confidence);
        }
        self
    }

    /// True if the identifier resolves against the known set.
    ///
    /// A compound selector resolves when it is known as a whole or when every
    /// combinator-separated part is known.
    #[must_use]
    pub fn contains(&self, identifier: &Identifier) -> bool {
        resolves(identifier, |part| self.known.contains(&Identifier::new(part)))
            || self.known.contains(identifier)
    }

    /// True if the identifier is among the fresh candidates
    #[must_use]
    pub fn is_fresh(&self, identifier: &Identifier) -> bool {
        if self.fresh.contains_key(identifier) {
            return true;
        }
        !self.contains(identifier)
            && resolves(identifier, |part| {
                let part = Identifier::new(part);
                self.fresh.contains_key(&part) || self.known.contains(&part)
            })
    }

    /// Confidence of a fresh candidate; compound selectors take their weakest part
    #[must_use]
    pub fn fresh_confidence(&self, identifier: &Identifier) -> Option<u8> {
        if let Some(c) = self.fresh.get(identifier) {
            return Some(*c);
        }
        identifier
            .parts()
            .into_iter()
            .filter_map(|part| self.fresh.get(&Identifier::new(part)).copied())
            .min()
    }

    /// Indexed identifiers
    #[must_use]
    pub fn known(&self) -> &BTreeSet<Identifier> {
        &self.known
    }

    /// Fresh candidates with their confidence
    #[must_use]
    pub fn fresh(&self) -> &BTreeMap<Identifier, u8> {
        &self.fresh
    }

    /// Number of indexed identifiers, fresh ones excluded
    #[must_use]
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// True if no identifiers are indexed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

fn resolves(identifier: &Identifier, known: impl Fn(&str) -> bool) -> bool {
    let parts = identifier.parts();
    !parts.is_empty() && parts.into_iter().all(known)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> IdentifierIndexView {
        IdentifierIndexView::new(["#form", ".row", "button.primary"].map(Identifier::new))
    }

    #[test]
    fn compound_selectors_resolve_by_parts() {
        let view = view();
        assert!(view.contains(&Identifier::new("#form")));
        assert!(view.contains(&Identifier::new("#form > .row button.primary:hover")));
        assert!(!view.contains(&Identifier::new("#form .missing")));
    }

    #[test]
    fn fresh_candidates_are_tracked_separately() {
        let fresh = IdentifierCandidate {
            identifier: Identifier::new("#banner"),
            confidence: 70,
            entity_kind: None,
            label: "banner".into(),
        };
        let view = view().with_fresh(&[fresh]);

        assert!(!view.contains(&Identifier::new("#banner")));
        assert!(view.is_fresh(&Identifier::new("#banner")));
        assert!(view.is_fresh(&Identifier::new("#form #banner")));
        assert!(!view.is_fresh(&Identifier::new("#form")));
        assert_eq!(view.fresh_confidence(&Identifier::new("#banner")), Some(70));
        assert_eq!(view.fresh_confidence(&Identifier::new("#nope")), None);
    }
}
