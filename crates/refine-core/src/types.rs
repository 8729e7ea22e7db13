//! Core types for the refinement pipeline

use crate::assessment::AssessmentOutcome;
use crate::quality::QualityReport;
use chrono::{DateTime, Utc};
use refine_artifact::{Artifact, Candidate};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(Ulid);

impl SessionId {
    /// Fresh time-ordered id
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ses_{}", self.0)
    }
}

/// What a change request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    /// Adjust something the artifact already does
    Refinement,
    /// Add something new
    NewFeature,
    /// Undo the direction taken so far
    CourseReversal,
    /// Cannot tell; ask the caller
    Ambiguous,
}

impl Intent {
    /// Map an oracle string onto an intent.
    ///
    /// Case-insensitive; `_`, `-` and spaces are interchangeable. Returns
    /// `None` for unknown values.
    #[must_use]
    pub fn from_oracle_str(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .chars()
            .filter_map(|c| match c {
                '_' | '-' | ' ' => None,
                c => Some(c.to_ascii_lowercase()),
            })
            .collect();
        match normalized.as_str() {
            "refinement" | "refine" => Some(Self::Refinement),
            "newfeature" | "feature" => Some(Self::NewFeature),
            "coursereversal" | "reversal" | "revert" => Some(Self::CourseReversal),
            "ambiguous" | "unclear" | "unknown" => Some(Self::Ambiguous),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Refinement => "REFINEMENT",
            Self::NewFeature => "NEW_FEATURE",
            Self::CourseReversal => "COURSE_REVERSAL",
            Self::Ambiguous => "AMBIGUOUS",
        })
    }
}

/// Classifier output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentClassification {
    /// Classified intent
    pub intent: Intent,
    /// 0-100
    pub confidence: u8,
    /// Why the oracle chose it
    pub rationale: String,
    /// Candidate readings of the request; required (2+) when ambiguous
    pub interpretations: Vec<String>,
}

/// Question to put back to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clarification {
    /// Question text
    pub question: String,
    /// Readings to choose from
    pub options: Vec<String>,
}

/// Identifier-handling policy for a change request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Strategy {
    /// Reuse identifiers bound in the current artifact
    PreserveIdentifiers,
    /// Query the identifier index for fresh candidates
    SearchIndex,
    /// Discard continuity and regenerate from the baseline
    FullRewrite,
    /// Halt and ask the caller
    AskUser(Clarification),
}

impl Strategy {
    /// The generation policy, or `None` when the pipeline must halt
    #[must_use]
    pub fn generation(&self) -> Option<GenerationStrategy> {
        match self {
            Self::PreserveIdentifiers => Some(GenerationStrategy::PreserveIdentifiers),
            Self::SearchIndex => Some(GenerationStrategy::SearchIndex),
            Self::FullRewrite => Some(GenerationStrategy::FullRewrite),
            Self::AskUser(_) => None,
        }
    }
}

/// Strategies under which generation actually runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStrategy {
    /// See [`Strategy::PreserveIdentifiers`]
    PreserveIdentifiers,
    /// See [`Strategy::SearchIndex`]
    SearchIndex,
    /// See [`Strategy::FullRewrite`]
    FullRewrite,
}

impl fmt::Display for GenerationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreserveIdentifiers => "PRESERVE_IDENTIFIERS",
            Self::SearchIndex => "SEARCH_INDEX",
            Self::FullRewrite => "FULL_REWRITE",
        })
    }
}

/// Defect severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Blocks acceptance of the visual result
    Critical,
    /// Worth correcting but not fatal
    Major,
}

impl Severity {
    /// Unknown strings map to `Major`
    #[must_use]
    pub fn from_oracle_str(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("critical") {
            Self::Critical
        } else {
            Self::Major
        }
    }
}

/// A flaw found by the count pre-check or the assessment oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defect {
    /// How bad the defect is
    pub severity: Severity,
    /// Category such as `layout` or `duplication`
    #[serde(rename = "type")]
    pub kind: String,
    /// What is wrong
    pub description: String,
    /// How to fix it, if the oracle said
    pub suggested_fix: Option<String>,
}

impl Defect {
    /// Critical defect without a fix
    #[must_use]
    pub fn critical(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity: Severity::Critical,
            kind: kind.into(),
            description: description.into(),
            suggested_fix: None,
        }
    }

    /// Attach a suggested fix
    #[must_use]
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let severity = match self.severity {
            Severity::Critical => "critical",
            Severity::Major => "major",
        };
        write!(f, "[{severity}] {}: {}", self.kind, self.description)?;
        if let Some(fix) = &self.suggested_fix {
            write!(f, " (fix: {fix})")?;
        }
        Ok(())
    }
}

/// Validator check categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    /// Referenced identifier is not indexed
    IdentifierExistence,
    /// A fragment does not parse
    Syntax,
    /// A large fragment shrank without a deletion request
    NonRegression,
    /// An effect is applied to one identifier more than once
    Duplication,
}

impl fmt::Display for CheckCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IdentifierExistence => "identifier",
            Self::Syntax => "syntax",
            Self::NonRegression => "regression",
            Self::Duplication => "duplication",
        })
    }
}

/// One validator finding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Check that raised the issue
    pub category: CheckCategory,
    /// Feedback text sent back to the oracle
    pub message: String,
}

impl ValidationIssue {
    /// Issue in `category`
    #[must_use]
    pub fn new(category: CheckCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// Aggregated validator output for one candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True if no errors were raised
    pub passed: bool,
    /// Blocking issues
    pub errors: Vec<ValidationIssue>,
    /// Advisory issues
    pub warnings: Vec<ValidationIssue>,
    /// 0-100
    pub confidence: u8,
}

impl ValidationResult {
    /// Errors joined into one feedback line
    #[must_use]
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// True if an error of `category` was raised
    #[must_use]
    pub fn has_error(&self, category: CheckCategory) -> bool {
        self.errors.iter().any(|e| e.category == category)
    }
}

/// Which loop produced an iteration record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Generation attempt loop
    Generation,
    /// Visual assessment loop
    Assessment,
}

/// Append-only log entry for one attempt or visual iteration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based attempt or iteration number
    pub attempt_number: u32,
    /// Loop that produced the record
    pub phase: Phase,
    /// Candidate under test
    pub candidate: Option<Candidate>,
    /// Validator result, for generation attempts
    pub validation: Option<ValidationResult>,
    /// Defects found, for visual iterations
    pub defects: Vec<Defect>,
    /// Free-form note such as a timeout
    pub note: Option<String>,
    /// When the record was made
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    /// Empty record stamped now
    #[must_use]
    pub fn new(phase: Phase, attempt_number: u32) -> Self {
        Self {
            attempt_number,
            phase,
            candidate: None,
            validation: None,
            defects: Vec::new(),
            note: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the candidate
    #[must_use]
    pub fn with_candidate(mut self, candidate: Candidate) -> Self {
        self.candidate = Some(candidate);
        self
    }

    /// Attach the validator result
    #[must_use]
    pub fn with_validation(mut self, validation: ValidationResult) -> Self {
        self.validation = Some(validation);
        self
    }

    /// Attach defects
    #[must_use]
    pub fn with_defects(mut self, defects: Vec<Defect>) -> Self {
        self.defects = defects;
        self
    }

    /// Attach a note
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Outcome status returned to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmitStatus {
    /// A new artifact version was accepted
    Accepted,
    /// The caller must pick an interpretation
    NeedsClarification,
    /// Nothing changed
    Rejected,
}

impl fmt::Display for SubmitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Accepted => "ACCEPTED",
            Self::NeedsClarification => "NEEDS_CLARIFICATION",
            Self::Rejected => "REJECTED",
        })
    }
}

/// One request/outcome pair kept for classifier context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Request text
    pub request: String,
    /// Classified intent, if classification ran
    pub intent: Option<Intent>,
    /// Outcome
    pub status: SubmitStatus,
    /// One-line outcome such as `accepted version 3`
    pub summary: String,
}

/// Caller-facing result of a change request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    /// Outcome
    pub status: SubmitStatus,
    /// Accepted artifact, or the unchanged current artifact on rejection
    pub artifact: Option<Artifact>,
    /// Confidence in the accepted artifact, 0-100
    pub confidence: Option<u8>,
    /// Clarifying question
    pub question: Option<String>,
    /// Interpretations to choose from
    pub options: Vec<String>,
    /// Advisory quality metrics and flags
    pub quality_report: Option<QualityReport>,
    /// Errors that caused a rejection
    pub errors: Vec<String>,
    /// Non-blocking problems
    pub warnings: Vec<String>,
    /// Informational notes
    pub notes: Vec<String>,
    /// Classifier output
    pub intent: Option<IntentClassification>,
    /// Generation attempts used across the request
    pub attempts: u32,
    /// Visual assessment outcome, if the loop ran
    pub assessment: Option<AssessmentOutcome>,
    /// Every attempt and iteration in order
    pub iterations: Vec<IterationRecord>,
}

impl SubmitResponse {
    fn empty(status: SubmitStatus) -> Self {
        Self {
            status,
            artifact: None,
            confidence: None,
            question: None,
            options: Vec::new(),
            quality_report: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            notes: Vec::new(),
            intent: None,
            attempts: 0,
            assessment: None,
            iterations: Vec::new(),
        }
    }

    /// Accepted response for `artifact`
    #[must_use]
    pub fn accepted(artifact: Artifact, confidence: u8) -> Self {
        Self {
            artifact: Some(artifact),
            confidence: Some(confidence),
            ..Self::empty(SubmitStatus::Accepted)
        }
    }

    /// Response asking the caller to choose
    #[must_use]
    pub fn clarification(clarification: Clarification) -> Self {
        Self {
            question: Some(clarification.question),
            options: clarification.options,
            ..Self::empty(SubmitStatus::NeedsClarification)
        }
    }

    /// Rejected response carrying the unchanged artifact
    #[must_use]
    pub fn rejected(current: Option<Artifact>, errors: Vec<String>) -> Self {
        Self {
            artifact: current,
            errors,
            ..Self::empty(SubmitStatus::Rejected)
        }
    }

    /// True for [`SubmitStatus::Accepted`]
    #[inline]
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status == SubmitStatus::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_strings_are_lenient() {
        assert_eq!(Intent::from_oracle_str("REFINEMENT"), Some(Intent::Refinement));
        assert_eq!(Intent::from_oracle_str("new-feature"), Some(Intent::NewFeature));
        assert_eq!(Intent::from_oracle_str(" New Feature "), Some(Intent::NewFeature));
        assert_eq!(
            Intent::from_oracle_str("course_reversal"),
            Some(Intent::CourseReversal)
        );
        assert_eq!(Intent::from_oracle_str("banana"), None);
    }

    #[test]
    fn unknown_severity_is_major() {
        assert_eq!(Severity::from_oracle_str("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::from_oracle_str("blocker"), Severity::Major);
    }

    #[test]
    fn defect_serializes_kind_as_type() {
        let defect = Defect::critical("duplication", "three banners").with_fix("guard insert");
        let json = serde_json::to_value(&defect).unwrap();
        assert_eq!(json["type"], "duplication");
        assert_eq!(json["severity"], "critical");
        assert_eq!(
            defect.to_string(),
            "[critical] duplication: three banners (fix: guard insert)"
        );
    }

    #[test]
    fn ask_user_has_no_generation_strategy() {
        let ask = Strategy::AskUser(Clarification {
            question: "which?".into(),
            options: vec!["a".into(), "b".into()],
        });
        assert_eq!(ask.generation(), None);
        assert_eq!(
            Strategy::FullRewrite.generation(),
            Some(GenerationStrategy::FullRewrite)
        );
    }

    #[test]
    fn validation_summary_joins_errors() {
        let result = ValidationResult {
            passed: false,
            errors: vec![
                ValidationIssue::new(CheckCategory::Syntax, "missing `)`"),
                ValidationIssue::new(CheckCategory::Duplication, "#a bound twice"),
            ],
            warnings: Vec::new(),
            confidence: 45,
        };
        assert_eq!(
            result.summary(),
            "[syntax] missing `)`; [duplication] #a bound twice"
        );
        assert!(result.has_error(CheckCategory::Syntax));
        assert!(!result.has_error(CheckCategory::NonRegression));
    }
}
