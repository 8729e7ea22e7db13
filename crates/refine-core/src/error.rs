//! Error types for Refine Core
//!
//! Validation failures are data ([`crate::ValidationResult`]) and never show up
//! here. These types cover pipeline-level faults:
//! - Busy sessions and cancellation
//! - Oracle transport failures and unparseable responses
//! - Identifier index failures
//! - Configuration errors

use refine_symbol::IndexError;
use std::time::Duration;

/// Main refinement error type
#[derive(Debug, thiserror::Error)]
pub enum RefineError {
    /// Another change request is already in flight for this session
    #[error("session busy: a change request is already in flight")]
    Busy,

    /// Pipeline was cancelled before completion
    #[error("operation cancelled")]
    Cancelled,

    /// Change request is unusable as submitted
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Classifier reported ambiguity without enough interpretations to ask about
    #[error("ambiguous request with {found} interpretation(s); at least 2 are required")]
    AmbiguityWithoutOptions { found: usize },

    /// Identifier index failure
    #[error("identifier index error: {0}")]
    Index(#[from] IndexError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Generative oracle failure
    #[error("oracle error: {0}")]
    Oracle(#[from] OracleError),
}

impl RefineError {
    /// Check if error is retryable
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Busy => true,
            Self::Oracle(e) => e.is_retryable(),
            Self::Index(IndexError::Unavailable(_)) => true,
            _ => false,
        }
    }
}

/// Failures talking to an external oracle
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    /// Call exceeded its deadline
    #[error("oracle call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// Oracle could not be reached or refused the call
    #[error("oracle unavailable: {0}")]
    Unavailable(String),

    /// Oracle answered with something unusable
    #[error("malformed oracle response: {0}")]
    Malformed(String),
}

impl OracleError {
    /// True for timeouts and outages
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// Lenient extraction failures
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// No `{` or `[` found in the response
    #[error("response contains no delimited region")]
    NoDelimitedRegion,

    /// A region was opened but never closed
    #[error("unbalanced delimiters starting at byte {0}")]
    Unbalanced(usize),

    /// Every balanced region failed to deserialize
    #[error("no region parsed as the expected structure: {0}")]
    Json(#[from] serde_json::Error),
}

/// Visual-assessment tooling failures; these fail open
#[derive(Debug, thiserror::Error)]
pub enum AssessmentError {
    /// Snapshot capture failed
    #[error("capture failed: {0}")]
    Capture(SurfaceError),

    /// Applying the artifact to the surface failed
    #[error("apply failed: {0}")]
    Apply(SurfaceError),

    /// Resetting the surface to baseline failed
    #[error("reset failed: {0}")]
    Reset(SurfaceError),

    /// Qualitative oracle failure
    #[error("assessment oracle failed: {0}")]
    Oracle(#[from] OracleError),

    /// Oracle response could not be parsed
    #[error("unparseable assessment: {0}")]
    Parse(#[from] ExtractError),
}

impl AssessmentError {
    /// Timeouts consume an iteration instead of skipping the loop
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::Oracle(OracleError::Timeout(_))
                | Self::Capture(SurfaceError::Timeout(_))
                | Self::Apply(SurfaceError::Timeout(_))
                | Self::Reset(SurfaceError::Timeout(_))
        )
    }
}

/// Observable-surface collaborator failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SurfaceError {
    /// No response within the budget
    #[error("surface call timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// The surface could not be reached
    #[error("surface unavailable: {0}")]
    Unavailable(String),

    /// The surface refused to apply the candidate
    #[error("surface rejected artifact: {0}")]
    Rejected(String),
}

/// Configuration loading and validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML syntax or type error
    #[error("failed to parse config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Value out of range
    #[error("invalid config value `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Result alias for refinement operations
pub type Result<T, E = RefineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(RefineError::Busy.is_retryable());
        assert!(RefineError::Oracle(OracleError::Timeout(Duration::from_secs(1))).is_retryable());
        assert!(!RefineError::Oracle(OracleError::Malformed("x".into())).is_retryable());
        assert!(!RefineError::Cancelled.is_retryable());
        assert!(RefineError::Index(IndexError::Unavailable("down".into())).is_retryable());
    }

    #[test]
    fn timeout_display_uses_millis() {
        let err = OracleError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "oracle call timed out after 1500ms");
    }

    #[test]
    fn assessment_timeouts_are_detected() {
        assert!(AssessmentError::Oracle(OracleError::Timeout(Duration::from_secs(1))).is_timeout());
        assert!(AssessmentError::Apply(SurfaceError::Timeout(Duration::from_secs(1))).is_timeout());
        assert!(!AssessmentError::Capture(SurfaceError::Unavailable("x".into())).is_timeout());
    }
}
