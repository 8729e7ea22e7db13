//! Engine configuration
//!
//! Every section deserializes with defaults, so a TOML file only needs the
//! keys it changes:
//!
//! ```toml
//! concurrency = "queue"
//!
//! [generation]
//! call_timeout_ms = 20000
//!
//! [assessment]
//! similarity_threshold = 0.7
//! ```

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Hard ceiling on generation attempts per change request
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// Hard ceiling on visual assessment iterations per change request
pub const MAX_VISUAL_ITERATIONS: u32 = 5;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineConfig {
    /// Intent classifier
    pub classifier: ClassifierConfig,
    /// Generation attempt loop
    pub generation: GenerationConfig,
    /// Structural validator
    pub validator: ValidatorConfig,
    /// Visual assessment loop
    pub assessment: AssessmentConfig,
    /// Quality monitor
    pub quality: QualityConfig,
    /// Behavior when a request arrives while another is running
    pub concurrency: ConcurrencyMode,
}

impl RefineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document
    ///
    /// # Errors
    /// Returns [`ConfigError`] on syntax errors or out-of-range values
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or is invalid
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Check ranges and hard ceilings
    ///
    /// # Errors
    /// Returns the first invalid field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let g = &self.generation;
        if g.max_attempts == 0 || g.max_attempts > MAX_GENERATION_ATTEMPTS {
            return Err(ConfigError::invalid(
                "generation.max_attempts",
                format!("must be between 1 and {MAX_GENERATION_ATTEMPTS}"),
            ));
        }
        if g.base_confidence > 100 {
            return Err(ConfigError::invalid("generation.base_confidence", "must be at most 100"));
        }
        if g.call_timeout_ms == 0 {
            return Err(ConfigError::invalid("generation.call_timeout_ms", "must be positive"));
        }

        let a = &self.assessment;
        if a.max_iterations == 0 || a.max_iterations > MAX_VISUAL_ITERATIONS {
            return Err(ConfigError::invalid(
                "assessment.max_iterations",
                format!("must be between 1 and {MAX_VISUAL_ITERATIONS}"),
            ));
        }
        if a.count_multiple <= 1.0 {
            return Err(ConfigError::invalid("assessment.count_multiple", "must exceed 1.0"));
        }
        if !(0.0..=1.0).contains(&a.similarity_threshold) || a.similarity_threshold == 0.0 {
            return Err(ConfigError::invalid(
                "assessment.similarity_threshold",
                "must be in (0, 1]",
            ));
        }
        if a.repeat_limit == 0 {
            return Err(ConfigError::invalid("assessment.repeat_limit", "must be positive"));
        }
        if a.call_timeout_ms == 0 {
            return Err(ConfigError::invalid("assessment.call_timeout_ms", "must be positive"));
        }

        if self.classifier.min_confidence > 100 {
            return Err(ConfigError::invalid("classifier.min_confidence", "must be at most 100"));
        }
        if !(0.0..1.0).contains(&self.validator.regression_fraction) {
            return Err(ConfigError::invalid(
                "validator.regression_fraction",
                "must be in [0, 1)",
            ));
        }
        if self.quality.shingle_size == 0 {
            return Err(ConfigError::invalid("quality.shingle_size", "must be positive"));
        }
        if self.quality.history_len == 0 {
            return Err(ConfigError::invalid("quality.history_len", "must be positive"));
        }
        Ok(())
    }

    /// Set the concurrency mode
    #[inline]
    #[must_use]
    pub fn with_concurrency(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency = mode;
        self
    }

    /// Turn the visual assessment loop on or off
    #[inline]
    #[must_use]
    pub fn with_assessment_enabled(mut self, enabled: bool) -> Self {
        self.assessment.enabled = enabled;
        self
    }

    /// With per-call timeout for both oracle kinds
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        let ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self.generation.call_timeout_ms = ms;
        self.assessment.call_timeout_ms = ms;
        self
    }

    /// Set the generation attempt budget
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.generation.max_attempts = attempts;
        self
    }

    /// Set the visual iteration budget
    #[inline]
    #[must_use]
    pub fn with_max_iterations(mut self, iterations: u32) -> Self {
        self.assessment.max_iterations = iterations;
        self
    }
}

/// What happens when a request arrives while another is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Fail fast with [`crate::RefineError::Busy`]
    #[default]
    Reject,
    /// Wait for the in-flight request to finish
    Queue,
}

/// Intent classifier settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Below this confidence, a classification with 2+ interpretations becomes ambiguous
    pub min_confidence: u8,
    /// Prior turns passed to the classifier
    pub history_window: usize,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: 50,
            history_window: 6,
        }
    }
}

/// Generation attempt loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Attempt budget, at most 3
    pub max_attempts: u32,
    /// Confidence reported when the first attempt passes
    pub base_confidence: u8,
    /// Confidence lost per additional attempt
    pub confidence_step: u8,
    /// Per-call timeout for the generative oracle and the index
    pub call_timeout_ms: u64,
}

impl GenerationConfig {
    /// [`Self::call_timeout_ms`] as a `Duration`
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_GENERATION_ATTEMPTS,
            base_confidence: 95,
            confidence_step: 5,
            call_timeout_ms: 15_000,
        }
    }
}

/// Validator penalties and regression heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Confidence lost to a missing identifier
    pub identifier_penalty: u8,
    /// Confidence lost to a syntax error
    pub syntax_penalty: u8,
    /// Confidence lost to an unintended removal
    pub regression_penalty: u8,
    /// Confidence lost to a duplicated effect
    pub duplication_penalty: u8,
    /// Confidence lost per warning
    pub warning_penalty: u8,
    /// Cap on the total warning penalty
    pub max_warning_penalty: u8,
    /// Prior fragments shorter than this (chars) are never checked for regression
    pub regression_min_size: usize,
    /// A fragment shrinking below this fraction of its prior size is a regression
    pub regression_fraction: f64,
    /// Words that mark a request as an intended deletion
    pub deletion_keywords: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            identifier_penalty: 25,
            syntax_penalty: 40,
            regression_penalty: 30,
            duplication_penalty: 15,
            warning_penalty: 2,
            max_warning_penalty: 10,
            regression_min_size: 200,
            regression_fraction: 0.2,
            deletion_keywords: [
                "remove", "delete", "drop", "strip", "clear", "erase", "eliminate", "get rid of",
                "take out",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// Visual assessment loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Run the loop at all
    pub enabled: bool,
    /// Iteration budget, at most 5
    pub max_iterations: u32,
    /// An entity count growing past this multiple is a critical defect
    pub count_multiple: f64,
    /// Keyword overlap at which two defects count as the same
    pub similarity_threshold: f64,
    /// Consecutive repeats that force termination
    pub repeat_limit: u32,
    /// Per-call timeout for the assessor and the surface
    pub call_timeout_ms: u64,
    /// Examples sent with every assessment
    pub calibration: Vec<CalibrationExample>,
}

impl AssessmentConfig {
    /// [`Self::call_timeout_ms`] as a `Duration`
    #[inline]
    #[must_use]
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_iterations: MAX_VISUAL_ITERATIONS,
            count_multiple: 2.0,
            similarity_threshold: 0.6,
            repeat_limit: 2,
            call_timeout_ms: 15_000,
            calibration: CalibrationExample::defaults(),
        }
    }
}

/// Worked example handed to the assessment oracle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationExample {
    /// Situation described to the oracle
    pub scenario: String,
    /// Verdict expected for it
    pub classification: String,
}

impl CalibrationExample {
    fn defaults() -> Vec<Self> {
        [
            ("requested color change visible, layout unchanged", "PASS"),
            ("button restyled but request asked for the header", "GOAL_NOT_MET"),
            ("three copies of the banner appear after applying", "CRITICAL_DEFECT"),
            ("text now overlaps the navigation bar", "MAJOR_DEFECT"),
        ]
        .into_iter()
        .map(|(scenario, classification)| Self {
            scenario: scenario.to_owned(),
            classification: classification.to_owned(),
        })
        .collect()
    }
}

/// Quality monitor thresholds, penalty caps and degradation ratios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Size above which a penalty applies
    pub size_threshold: usize,
    /// Duplication ratio above which a penalty applies
    pub duplication_threshold: f64,
    /// Complexity above which a penalty applies
    pub complexity_threshold: usize,
    /// Nesting depth above which a penalty applies
    pub nesting_threshold: usize,
    /// Identifier count above which a penalty applies
    pub identifier_threshold: usize,

    /// Largest size penalty
    pub size_penalty_cap: u8,
    /// Largest duplication penalty
    pub duplication_penalty_cap: u8,
    /// Largest complexity penalty
    pub complexity_penalty_cap: u8,
    /// Largest nesting penalty
    pub nesting_penalty_cap: u8,
    /// Largest identifier penalty
    pub identifier_penalty_cap: u8,

    /// Relative size growth that raises a flag
    pub size_degradation: f64,
    /// Relative duplication growth that raises a flag
    pub duplication_degradation: f64,
    /// Relative complexity growth that raises a flag
    pub complexity_degradation: f64,

    /// Accepted versions kept for comparison
    pub history_len: usize,
    /// Tokens per shingle in duplication estimation
    pub shingle_size: usize,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            size_threshold: 5000,
            duplication_threshold: 0.30,
            complexity_threshold: 50,
            nesting_threshold: 5,
            identifier_threshold: 20,
            size_penalty_cap: 15,
            duplication_penalty_cap: 25,
            complexity_penalty_cap: 20,
            nesting_penalty_cap: 20,
            identifier_penalty_cap: 10,
            size_degradation: 0.5,
            duplication_degradation: 0.3,
            complexity_degradation: 0.4,
            history_len: 10,
            shingle_size: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = RefineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.generation.max_attempts, 3);
        assert_eq!(config.assessment.max_iterations, 5);
        assert_eq!(config.concurrency, ConcurrencyMode::Reject);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RefineConfig::from_toml_str(
            r#"
            concurrency = "queue"

            [assessment]
            similarity_threshold = 0.7
            "#,
        )
        .unwrap();

        assert_eq!(config.concurrency, ConcurrencyMode::Queue);
        assert!((config.assessment.similarity_threshold - 0.7).abs() < f64::EPSILON);
        assert_eq!(config.assessment.max_iterations, 5);
        assert_eq!(config.generation, GenerationConfig::default());
    }

    #[test]
    fn ceilings_are_enforced() {
        let err = RefineConfig::from_toml_str("[generation]\nmax_attempts = 4\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "generation.max_attempts", .. }
        ));

        let err = RefineConfig::from_toml_str("[assessment]\nmax_iterations = 6\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid { field: "assessment.max_iterations", .. }
        ));
    }

    #[test]
    fn toml_syntax_error() {
        let err = RefineConfig::from_toml_str("[generation\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[classifier]\nmin_confidence = 60").unwrap();

        let config = RefineConfig::load(file.path()).unwrap();
        assert_eq!(config.classifier.min_confidence, 60);
        assert!(matches!(
            RefineConfig::load("/nonexistent/refine.toml"),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn builders() {
        let config = RefineConfig::new()
            .with_call_timeout(Duration::from_millis(250))
            .with_concurrency(ConcurrencyMode::Queue)
            .with_assessment_enabled(false);
        assert_eq!(config.generation.call_timeout(), Duration::from_millis(250));
        assert_eq!(config.assessment.call_timeout(), Duration::from_millis(250));
        assert!(!config.assessment.enabled);
    }
}
