//! Change requests and target descriptors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique identifier for a change request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(Ulid);

impl RequestId {
    /// Fresh time-ordered id
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req_{}", self.0)
    }
}

/// Describes the entity a request is aimed at
///
/// The caller may attach one when it already knows what the user pointed at;
/// the identifier index turns it into concrete identifier candidates.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Selector-like hint such as `#submit` or `.card`
    pub selector_hint: Option<String>,
    /// Free-form description ("the blue submit button")
    pub description: String,
    /// Kind of entity, e.g. `button`
    pub entity_kind: Option<String>,
}

impl TargetDescriptor {
    /// Descriptor with only a free-form description
    #[must_use]
    pub fn from_text(description: impl Into<String>) -> Self {
        Self {
            selector_hint: None,
            description: description.into(),
            entity_kind: None,
        }
    }

    /// Attach a selector hint
    #[must_use]
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.selector_hint = Some(selector.into());
        self
    }

    /// Attach an entity kind such as `button`
    #[must_use]
    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.entity_kind = Some(kind.into());
        self
    }

    /// True if neither a hint nor a description is present
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.selector_hint.as_deref().map_or(true, |s| s.trim().is_empty())
            && self.description.trim().is_empty()
    }
}

/// A natural-language change request. Immutable once submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    id: RequestId,
    text: String,
    target: Option<TargetDescriptor>,
    timestamp: DateTime<Utc>,
}

impl ChangeRequest {
    /// New request stamped with a fresh id and the current time
    #[must_use]
    pub fn new(text: impl Into<String>, target: Option<TargetDescriptor>) -> Self {
        Self {
            id: RequestId::new(),
            text: text.into(),
            target,
            timestamp: Utc::now(),
        }
    }

    /// Request id
    #[inline]
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Natural-language change text
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Optional target hint supplied by the caller
    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<&TargetDescriptor> {
        self.target.as_ref()
    }

    /// Submission time
    #[inline]
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Derive a follow-up request that keeps the target but carries new text
    #[must_use]
    pub fn follow_up(&self, text: impl Into<String>) -> Self {
        Self::new(text, self.target.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
        assert!(RequestId::new().to_string().starts_with("req_"));
    }

    #[test]
    fn blank_descriptor_detection() {
        assert!(TargetDescriptor::default().is_blank());
        assert!(TargetDescriptor::from_text("  ").with_selector(" ").is_blank());
        assert!(!TargetDescriptor::from_text("submit button").is_blank());
        assert!(!TargetDescriptor::default().with_selector("#go").is_blank());
    }

    #[test]
    fn follow_up_keeps_target() {
        let target = TargetDescriptor::from_text("header").with_kind("heading");
        let request = ChangeRequest::new("make it bigger", Some(target.clone()));
        let next = request.follow_up("fix: overlaps nav");

        assert_eq!(next.target(), Some(&target));
        assert_eq!(next.text(), "fix: overlaps nav");
        assert_ne!(next.id(), request.id());
    }
}
