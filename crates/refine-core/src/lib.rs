//! Refine Core - iterative refinement and validation engine
//!
//! Turns natural-language change requests into accepted artifacts:
//! - Classifies each request as a refinement, new feature, course reversal or ambiguity
//! - Resolves how identifiers carry over from the current artifact
//! - Generates candidates in at most three validated attempts
//! - Checks candidates for missing identifiers, syntax, regression and duplication
//! - Assesses the applied result visually for at most five iterations
//! - Tracks quality between versions and rolls back on terminal failure
//!
//! # Example
//!
//! ```rust,ignore
//! use refine_core::{Collaborators, RefineConfig, RefinementEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let collaborators = Collaborators::new(generator, index).with_assessment(assessor, surface);
//! let engine = RefinementEngine::new(RefineConfig::new(), collaborators)?;
//!
//! let response = engine.submit_change_request("make the header blue", None).await?;
//! println!("{}: confidence {:?}", response.status, response.confidence);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod assessment;
pub mod classifier;
pub mod config;
pub mod continuity;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generation;
pub mod oracle;
pub mod pipeline;
pub mod quality;
pub mod rollback;
pub mod session;
pub mod types;
pub mod validator;

// Re-exports for convenience
pub use assessment::{AssessmentOutcome, Classification, VisualAssessmentLoop};
pub use classifier::IntentClassifier;
pub use config::{
    AssessmentConfig, CalibrationExample, ClassifierConfig, ConcurrencyMode, GenerationConfig, QualityConfig,
    RefineConfig, ValidatorConfig, MAX_GENERATION_ATTEMPTS, MAX_VISUAL_ITERATIONS,
};
pub use engine::RefinementEngine;
pub use error::{AssessmentError, ConfigError, ExtractError, OracleError, RefineError, SurfaceError};
pub use generation::{GenerationLoop, GenerationOutcome};
pub use oracle::{AssessmentOracle, Calibration, GenerativeOracle, ObservableSurface, SurfaceSnapshot};
pub use pipeline::{Collaborators, PipelineRun, RefinementPipeline};
pub use quality::{DegradationFlag, QualityMetrics, QualityMonitor, QualityReport, TrackedMetric};
pub use rollback::{RollbackManager, RollbackReport, Snapshot};
pub use session::Session;
pub use types::{
    CheckCategory, Clarification, ConversationTurn, Defect, GenerationStrategy, Intent, IntentClassification,
    IterationRecord, Phase, SessionId, Severity, Strategy, SubmitResponse, SubmitStatus, ValidationIssue,
    ValidationResult,
};
pub use validator::{ValidationContext, Validator};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Refine Core
    pub use crate::{
        AssessmentOracle, Collaborators, GenerativeOracle, ObservableSurface, RefineConfig, RefineError,
        RefinementEngine, SubmitResponse, SubmitStatus, SurfaceSnapshot,
    };
    pub use refine_artifact::{Artifact, Candidate, TargetDescriptor};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
