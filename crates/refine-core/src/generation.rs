//! Generation attempt loop
//!
//! A small state machine bounded at [`MAX_GENERATION_ATTEMPTS`]:
//!
//! ```text
//! Attempting(n) --oracle reply--> Validating(n) --passed--> Succeeded
//!      ^                               |
//!      +-------- failed, n < max ------+
//!                                      +-- failed, n = max --> Exhausted
//! ```
//!
//! Oracle failures, timeouts and replies without a candidate consume an
//! attempt exactly like a validation failure. Every failure is appended to
//! the feedback sent with the next attempt.

use crate::config::{GenerationConfig, MAX_GENERATION_ATTEMPTS};
use crate::error::RefineError;
use crate::extract::{extract_fenced_blocks, extract_json};
use crate::oracle::{bounded, CallOutcome, GenerativeOracle};
use crate::types::{GenerationStrategy, IterationRecord, Phase, ValidationResult};
use crate::validator::{ValidationContext, Validator};
use refine_artifact::{Artifact, Candidate, ChangeRequest};
use refine_symbol::{IdentifierCandidate, IdentifierIndexView};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Feedback recorded when a reply carries neither JSON nor fenced fragments
pub const NO_CANDIDATE_FEEDBACK: &str = "response did not contain a candidate";

const GENERATE_PROMPT: &str = "Produce the complete updated artifact for the change request. \
Reply with a JSON object {\"appearance_rules\": string, \"behavior_instructions\": string}. \
Only reference identifiers that exist in the index unless the strategy is SEARCH_INDEX.";

const CORRECTIVE_PROMPT: &str = "The previous candidate was rejected. Fix every problem listed \
under `feedback` and reply with the complete corrected artifact as a JSON object \
{\"appearance_rules\": string, \"behavior_instructions\": string}.";

/// Everything one generation run needs from the pipeline
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    /// Request being served, possibly a corrective follow-up
    pub request: &'a ChangeRequest,
    /// Identifier policy for this run
    pub strategy: GenerationStrategy,
    /// Currently accepted artifact
    pub current: Option<&'a Artifact>,
    /// Starting point for a full rewrite
    pub baseline: Option<&'a Artifact>,
    /// Identifiers the candidate may reference
    pub view: &'a IdentifierIndexView,
    /// Fresh identifiers found by the index search
    pub fresh: &'a [IdentifierCandidate],
    /// Corrective context carried in from outside the loop
    pub seed_feedback: &'a [String],
}

/// Terminal state of a generation run
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationOutcome {
    /// A candidate passed validation
    Succeeded {
        candidate: Candidate,
        validation: ValidationResult,
        confidence: u8,
        attempts: u32,
    },
    /// Every attempt failed
    Exhausted {
        /// One entry per failed attempt, `attempt N: ...`
        errors: Vec<String>,
        last_candidate: Option<Candidate>,
        attempts: u32,
    },
}

impl GenerationOutcome {
    /// Attempts used
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Succeeded { attempts, .. } | Self::Exhausted { attempts, .. } => *attempts,
        }
    }
}

/// Outcome plus the per-attempt log
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationReport {
    /// Terminal state
    pub outcome: GenerationOutcome,
    /// One record per attempt
    pub records: Vec<IterationRecord>,
}

enum AttemptState {
    Attempting { attempt: u32 },
    Validating { attempt: u32, candidate: Candidate },
    Succeeded { attempt: u32, candidate: Candidate, validation: ValidationResult },
    Exhausted { attempts: u32 },
}

/// Bounded generate/validate/retry loop
#[derive(Clone)]
pub struct GenerationLoop {
    oracle: Arc<dyn GenerativeOracle>,
    validator: Validator,
    config: GenerationConfig,
}

impl GenerationLoop {
    /// Loop over `oracle`, checking candidates with `validator`
    #[must_use]
    pub fn new(oracle: Arc<dyn GenerativeOracle>, validator: Validator, config: GenerationConfig) -> Self {
        Self {
            oracle,
            validator,
            config,
        }
    }

    /// Validator the loop checks candidates with
    #[must_use]
    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    fn max_attempts(&self) -> u32 {
        self.config.max_attempts.clamp(1, MAX_GENERATION_ATTEMPTS)
    }

    /// Monotonically decreasing with the attempt number
    fn attempt_confidence(&self, attempt: u32) -> u8 {
        let step = u32::from(self.config.confidence_step) * attempt.saturating_sub(1);
        let value = u32::from(self.config.base_confidence).saturating_sub(step);
        u8::try_from(value).unwrap_or(0)
    }

    /// Run the loop to a terminal state
    ///
    /// # Errors
    /// Only [`RefineError::Cancelled`]. Every other failure is recorded as a
    /// failed attempt.
    #[tracing::instrument(skip_all, fields(request_id = %input.request.id(), strategy = %input.strategy))]
    pub async fn run(
        &self,
        input: GenerationInput<'_>,
        cancel: &CancellationToken,
    ) -> Result<GenerationReport, RefineError> {
        let max_attempts = self.max_attempts();
        let mut feedback: Vec<String> = input.seed_feedback.to_vec();
        let mut errors: Vec<String> = Vec::new();
        let mut records: Vec<IterationRecord> = Vec::new();
        let mut last_candidate: Option<Candidate> = None;
        let mut state = AttemptState::Attempting { attempt: 1 };

        loop {
            state = match state {
                AttemptState::Attempting { attempt } if attempt > max_attempts => {
                    AttemptState::Exhausted {
                        attempts: max_attempts,
                    }
                }
                AttemptState::Attempting { attempt } => {
                    let prompt = if feedback.is_empty() {
                        GENERATE_PROMPT
                    } else {
                        CORRECTIVE_PROMPT
                    };
                    let context = build_context(&input, &feedback, attempt, max_attempts);
                    let call = bounded(
                        self.oracle.generate(prompt, &context),
                        self.config.call_timeout(),
                        cancel,
                    )
                    .instrument(tracing::debug_span!("generation_attempt", attempt));

                    let reply = match call.await {
                        CallOutcome::Done(text) => {
                            parse_candidate(&text).ok_or_else(|| NO_CANDIDATE_FEEDBACK.to_owned())
                        }
                        CallOutcome::Failed(e) => Err(format!("generation failed: {e}")),
                        CallOutcome::TimedOut(d) => {
                            Err(format!("generation timed out after {}ms", d.as_millis()))
                        }
                        CallOutcome::Cancelled => return Err(RefineError::Cancelled),
                    };
                    match reply {
                        Ok(candidate) => {
                            last_candidate = Some(candidate.clone());
                            AttemptState::Validating { attempt, candidate }
                        }
                        Err(failure) => {
                            tracing::warn!(attempt, %failure, "generation attempt produced no candidate");
                            records.push(
                                IterationRecord::new(Phase::Generation, attempt).with_note(failure.clone()),
                            );
                            errors.push(format!("attempt {attempt}: {failure}"));
                            feedback.push(failure);
                            AttemptState::Attempting {
                                attempt: attempt + 1,
                            }
                        }
                    }
                }
                AttemptState::Validating { attempt, candidate } => {
                    let validation = self.validator.validate(
                        &candidate,
                        &ValidationContext {
                            prior: input.current.map(Artifact::candidate),
                            strategy: input.strategy,
                            view: input.view,
                            request_text: input.request.text(),
                        },
                    );
                    if cancel.is_cancelled() {
                        return Err(RefineError::Cancelled);
                    }
                    records.push(
                        IterationRecord::new(Phase::Generation, attempt)
                            .with_candidate(candidate.clone())
                            .with_validation(validation.clone()),
                    );
                    if validation.passed {
                        AttemptState::Succeeded {
                            attempt,
                            candidate,
                            validation,
                        }
                    } else {
                        let summary = validation.summary();
                        tracing::debug!(attempt, errors = %summary, "candidate failed validation");
                        errors.push(format!("attempt {attempt}: {summary}"));
                        feedback.push(summary);
                        AttemptState::Attempting {
                            attempt: attempt + 1,
                        }
                    }
                }
                AttemptState::Succeeded {
                    attempt,
                    candidate,
                    validation,
                } => {
                    let confidence = self.attempt_confidence(attempt).min(validation.confidence);
                    tracing::info!(attempts = attempt, confidence, "candidate passed validation");
                    return Ok(GenerationReport {
                        outcome: GenerationOutcome::Succeeded {
                            candidate,
                            validation,
                            confidence,
                            attempts: attempt,
                        },
                        records,
                    });
                }
                AttemptState::Exhausted { attempts } => {
                    tracing::warn!(attempts, "generation attempts exhausted");
                    return Ok(GenerationReport {
                        outcome: GenerationOutcome::Exhausted {
                            errors,
                            last_candidate,
                            attempts,
                        },
                        records,
                    });
                }
            };
        }
    }
}

fn build_context(
    input: &GenerationInput<'_>,
    feedback: &[String],
    attempt: u32,
    max_attempts: u32,
) -> serde_json::Value {
    let starting_point = match input.strategy {
        GenerationStrategy::FullRewrite => input.baseline,
        GenerationStrategy::PreserveIdentifiers | GenerationStrategy::SearchIndex => input.current,
    };
    json!({
        "task": "generate",
        "strategy": input.strategy,
        "request": input.request.text(),
        "target": input.request.target(),
        "artifact": starting_point.map(Artifact::candidate),
        "known_identifiers": input.view.known(),
        "fresh_identifiers": input.fresh,
        "feedback": feedback,
        "attempt": attempt,
        "max_attempts": max_attempts,
    })
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(default, alias = "css", alias = "appearance")]
    appearance_rules: Option<String>,
    #[serde(default, alias = "js", alias = "javascript", alias = "behavior")]
    behavior_instructions: Option<String>,
}

/// Pull a candidate out of an oracle reply
///
/// The first balanced region is read as a JSON object; if it carries either
/// fragment key it wins, otherwise fenced `css` and `js`/`javascript` blocks
/// are used.
#[must_use]
pub fn parse_candidate(text: &str) -> Option<Candidate> {
    if let Ok(raw) = extract_json::<RawCandidate>(text) {
        if raw.appearance_rules.is_some() || raw.behavior_instructions.is_some() {
            return Some(Candidate::new(
                raw.appearance_rules.unwrap_or_default(),
                raw.behavior_instructions.unwrap_or_default(),
            ));
        }
    }

    let mut appearance: Option<String> = None;
    let mut behavior: Option<String> = None;
    for block in extract_fenced_blocks(text) {
        let slot = match block.lang.as_str() {
            "css" => &mut appearance,
            "js" | "javascript" | "ts" | "typescript" => &mut behavior,
            _ => continue,
        };
        slot.get_or_insert_with(String::new).push_str(&block.body);
    }
    if appearance.is_none() && behavior.is_none() {
        return None;
    }
    Some(Candidate::new(
        appearance.unwrap_or_default(),
        behavior.unwrap_or_default(),
    ))
}
