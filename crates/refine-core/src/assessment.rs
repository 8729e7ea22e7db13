//! Visual assessment loop
//!
//! Runs after a candidate has passed structural validation and been
//! accepted. Each iteration resets the surface, applies the candidate and
//! captures an after-snapshot, then either synthesizes a critical defect from
//! the entity-count pre-check or asks the assessment oracle. Non-PASS results
//! feed a corrective request back through the generation loop.
//!
//! The loop stops on PASS, on a defect repeated across `repeat_limit`
//! consecutive iterations, when the oracle declines to continue, when
//! corrective generation is exhausted, or at `max_iterations`. Tooling
//! failures other than timeouts fail open.

use crate::config::{AssessmentConfig, MAX_VISUAL_ITERATIONS};
use crate::error::{AssessmentError, OracleError, RefineError, SurfaceError};
use crate::extract::extract_json;
use crate::generation::{GenerationInput, GenerationLoop, GenerationOutcome};
use crate::oracle::{bounded, AssessmentOracle, Calibration, CallOutcome, ObservableSurface, SurfaceSnapshot};
use crate::session::Session;
use crate::types::{Defect, GenerationStrategy, IterationRecord, Phase, Severity};
use once_cell::sync::Lazy;
use refine_artifact::{Artifact, Candidate, ChangeRequest, TargetDescriptor};
use refine_symbol::IdentifierCandidate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

static STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "the", "and", "for", "with", "that", "this", "are", "was", "were", "has", "have", "not",
        "but", "from", "into", "onto", "its", "their", "there", "than", "then", "too", "very",
        "should", "would", "could", "now", "after", "before", "still", "also", "when", "which",
        "appears", "appear", "seems", "seem",
    ]
    .into_iter()
    .collect()
});

/// How a visual assessment ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssessmentOutcome {
    /// The oracle accepted the candidate
    Pass {
        iterations: u32,
    },
    /// The same defect came back `repeat_limit` times in a row
    StoppedRepeatedDefect {
        iterations: u32,
        defects: Vec<Defect>,
    },
    /// `max_iterations` spent without a pass
    StoppedMaxIterations {
        iterations: u32,
        defects: Vec<Defect>,
    },
    /// The oracle declined to continue or correction failed
    StoppedCriticalUnresolved {
        iterations: u32,
        defects: Vec<Defect>,
    },
    /// Tooling failed; the structurally valid candidate stands
    Skipped {
        reason: String,
    },
}

impl AssessmentOutcome {
    /// Iterations spent, 0 when skipped
    #[must_use]
    pub fn iterations(&self) -> u32 {
        match self {
            Self::Pass { iterations }
            | Self::StoppedRepeatedDefect { iterations, .. }
            | Self::StoppedMaxIterations { iterations, .. }
            | Self::StoppedCriticalUnresolved { iterations, .. } => *iterations,
            Self::Skipped { .. } => 0,
        }
    }

    /// True for [`AssessmentOutcome::Pass`]
    #[inline]
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass { .. })
    }

    /// Defects left unresolved when the loop stopped
    #[must_use]
    pub fn defects(&self) -> &[Defect] {
        match self {
            Self::StoppedRepeatedDefect { defects, .. }
            | Self::StoppedMaxIterations { defects, .. }
            | Self::StoppedCriticalUnresolved { defects, .. } => defects,
            Self::Pass { .. } | Self::Skipped { .. } => &[],
        }
    }
}

impl fmt::Display for AssessmentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass { .. } => "PASS",
            Self::StoppedRepeatedDefect { .. } => "STOPPED_REPEATED_DEFECT",
            Self::StoppedMaxIterations { .. } => "STOPPED_MAX_ITERATIONS",
            Self::StoppedCriticalUnresolved { .. } => "STOPPED_CRITICAL_UNRESOLVED",
            Self::Skipped { .. } => "SKIPPED",
        })
    }
}

/// Assessment oracle verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    /// Goal met, no defects
    Pass,
    /// Change applied but the request is not satisfied
    GoalNotMet,
    /// Broken or duplicated content
    CriticalDefect,
    /// Visible flaw such as overlap or bad contrast
    MajorDefect,
    /// Anything the oracle said that is none of the above
    Unknown,
}

impl Classification {
    /// Case-, space- and separator-insensitive match; unknown strings map to `Unknown`
    #[must_use]
    pub fn from_oracle_str(raw: &str) -> Self {
        let normalized: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "pass" | "passed" => Self::Pass,
            "goalnotmet" => Self::GoalNotMet,
            "criticaldefect" | "critical" => Self::CriticalDefect,
            "majordefect" | "major" => Self::MajorDefect,
            _ => {
                tracing::warn!(value = %raw, "unknown assessment classification");
                Self::Unknown
            }
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pass => "PASS",
            Self::GoalNotMet => "GOAL_NOT_MET",
            Self::CriticalDefect => "CRITICAL_DEFECT",
            Self::MajorDefect => "MAJOR_DEFECT",
            Self::Unknown => "UNKNOWN",
        })
    }
}

/// Parsed assessment oracle reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    /// Overall verdict
    pub classification: Classification,
    /// Defects the verdict is based on
    pub defects: Vec<Defect>,
    /// Whether the oracle thinks another iteration can help
    pub should_continue: bool,
}

#[derive(Debug, Deserialize)]
struct RawAssessment {
    classification: String,
    #[serde(default)]
    defects: Vec<RawDefect>,
    #[serde(default = "default_continue", rename = "continue")]
    should_continue: bool,
}

#[derive(Debug, Deserialize)]
struct RawDefect {
    #[serde(default)]
    severity: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "suggestedFix")]
    suggested_fix: Option<String>,
}

fn default_continue() -> bool {
    true
}

/// Parse an assessment reply embedded in arbitrary text
///
/// A non-PASS verdict without defects gets one synthesized from the verdict.
///
/// # Errors
/// [`AssessmentError::Parse`] if no region deserializes
pub fn parse_assessment(text: &str) -> Result<Assessment, AssessmentError> {
    let raw: RawAssessment = extract_json(text)?;
    let classification = Classification::from_oracle_str(&raw.classification);
    let mut defects: Vec<Defect> = raw
        .defects
        .into_iter()
        .map(|d| Defect {
            severity: Severity::from_oracle_str(&d.severity),
            kind: if d.kind.trim().is_empty() {
                "unspecified".to_owned()
            } else {
                d.kind
            },
            description: d.description,
            suggested_fix: d.suggested_fix.filter(|f| !f.trim().is_empty()),
        })
        .collect();
    if classification != Classification::Pass && defects.is_empty() {
        let severity = if classification == Classification::CriticalDefect {
            Severity::Critical
        } else {
            Severity::Major
        };
        defects.push(Defect {
            severity,
            kind: classification.to_string().to_ascii_lowercase(),
            description: format!("assessment reported {classification} without details"),
            suggested_fix: None,
        });
    }
    Ok(Assessment {
        classification,
        defects,
        should_continue: raw.should_continue,
    })
}

/// Entity-count pre-check
///
/// An entity kind whose count grows past `multiple` times its before-count
/// (or past `multiple` from zero) is a critical defect, unless the request
/// text names that kind.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn precheck(before: &SurfaceSnapshot, after: &SurfaceSnapshot, request_text: &str, multiple: f64) -> Vec<Defect> {
    let mut defects = Vec::new();
    for (kind, &after_count) in &after.entity_counts {
        let before_count = before.count(kind);
        let limit = multiple * before_count.max(1) as f64;
        if (after_count as f64) <= limit || names_kind(request_text, kind) {
            continue;
        }
        defects.push(
            Defect::critical(
                "duplication",
                format!("{kind} count grew from {before_count} to {after_count}"),
            )
            .with_fix(format!("apply the {kind} change once and guard against repeated insertion")),
        );
    }
    defects
}

/// True if `text` mentions `kind` in singular or plural form
fn names_kind(text: &str, kind: &str) -> bool {
    let text = text.to_lowercase();
    let kind = kind.trim().to_lowercase();
    if kind.is_empty() {
        return false;
    }
    if kind.contains(' ') {
        return text.contains(&kind);
    }
    let mut forms = vec![kind.clone(), format!("{kind}s"), format!("{kind}es")];
    if let Some(stem) = kind.strip_suffix('y') {
        forms.push(format!("{stem}ies"));
    }
    text.split(|c: char| !c.is_alphanumeric())
        .any(|word| forms.iter().any(|f| f == word))
}

/// Significant words of a defect
fn keywords(defect: &Defect) -> BTreeSet<String> {
    format!("{} {}", defect.kind, defect.description)
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .map(str::to_owned)
        .collect()
}

/// Two defects are the same if shared keywords reach `threshold` of either set
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn same_defect(a: &Defect, b: &Defect, threshold: f64) -> bool {
    let ka = keywords(a);
    let kb = keywords(b);
    if ka.is_empty() || kb.is_empty() {
        return a.kind == b.kind && a.description.trim() == b.description.trim();
    }
    let shared = ka.intersection(&kb).count() as f64;
    shared >= threshold * ka.len() as f64 || shared >= threshold * kb.len() as f64
}

fn repeats(previous: &[Defect], current: &[Defect], threshold: f64) -> bool {
    current
        .iter()
        .any(|c| previous.iter().any(|p| same_defect(p, c, threshold)))
}

/// Request-scoped inputs to the loop
#[derive(Debug, Clone, Copy)]
pub struct AssessmentInput<'a> {
    /// The caller's request
    pub request: &'a ChangeRequest,
    /// Strategy the accepted candidate was generated under
    pub strategy: GenerationStrategy,
    /// Fresh identifiers found for the request
    pub fresh: &'a [IdentifierCandidate],
    /// Artifact before this request, applied for the before-snapshot
    pub previous: Option<&'a Artifact>,
}

/// Result of a loop run
#[derive(Debug, Clone, PartialEq)]
pub struct AssessmentRun {
    /// How the loop ended
    pub outcome: AssessmentOutcome,
    /// Assessment iterations and corrective attempts
    pub records: Vec<IterationRecord>,
    /// Generation attempts spent on corrective candidates
    pub generation_attempts: u32,
    /// Confidence of the last corrective candidate, if one was accepted
    pub corrective_confidence: Option<u8>,
    /// Fail-open and correction notes for the caller
    pub warnings: Vec<String>,
}

enum Interrupt {
    Cancelled,
    Failed(AssessmentError),
}

impl From<AssessmentError> for Interrupt {
    fn from(e: AssessmentError) -> Self {
        Self::Failed(e)
    }
}

/// Bounded visual assessment with corrective regeneration
#[derive(Clone)]
pub struct VisualAssessmentLoop {
    assessor: Arc<dyn AssessmentOracle>,
    surface: Arc<dyn ObservableSurface>,
    config: AssessmentConfig,
}

impl VisualAssessmentLoop {
    /// Loop over the given assessor and surface
    #[must_use]
    pub fn new(
        assessor: Arc<dyn AssessmentOracle>,
        surface: Arc<dyn ObservableSurface>,
        config: AssessmentConfig,
    ) -> Self {
        Self {
            assessor,
            surface,
            config,
        }
    }

    fn max_iterations(&self) -> u32 {
        self.config.max_iterations.clamp(1, MAX_VISUAL_ITERATIONS)
    }

    /// Assess the session's current artifact
    ///
    /// Corrective candidates are accepted into `session` as they pass
    /// structural validation.
    ///
    /// # Errors
    /// Only [`RefineError::Cancelled`]
    #[tracing::instrument(skip_all, fields(session = %session.id(), request_id = %input.request.id()))]
    pub async fn run(
        &self,
        session: &mut Session,
        generation: &GenerationLoop,
        input: AssessmentInput<'_>,
        cancel: &CancellationToken,
    ) -> Result<AssessmentRun, RefineError> {
        let mut run = AssessmentRun {
            outcome: AssessmentOutcome::Skipped {
                reason: "no artifact to assess".to_owned(),
            },
            records: Vec::new(),
            generation_attempts: 0,
            corrective_confidence: None,
            warnings: Vec::new(),
        };
        let Some(mut current) = session.artifact().map(|a| a.candidate().clone()) else {
            return Ok(run);
        };
        let target = input.request.target();

        let before = match self.setup(input.previous, target, cancel).await {
            Ok(snapshot) => snapshot,
            Err(Interrupt::Cancelled) => return Err(RefineError::Cancelled),
            Err(Interrupt::Failed(e)) => {
                run.outcome = fail_open(&e);
                return Ok(run);
            }
        };
        let calibration = Calibration {
            expected_structure: expected_structure(input.request.text(), &before, self.config.count_multiple),
            examples: self.config.calibration.clone(),
        };

        let max = self.max_iterations();
        let mut previous_defects: Option<Vec<Defect>> = None;
        let mut streak = 0u32;
        let mut unresolved: Vec<Defect> = Vec::new();

        for iteration in 1..=max {
            let span = tracing::debug_span!("visual_iteration", iteration);
            let verdict = match self
                .iterate(&current, &before, &calibration, input.request, cancel)
                .instrument(span)
                .await
            {
                Ok(verdict) => verdict,
                Err(Interrupt::Cancelled) => return Err(RefineError::Cancelled),
                Err(Interrupt::Failed(e)) if e.is_timeout() => {
                    tracing::warn!(iteration, error = %e, "visual iteration timed out");
                    run.records.push(
                        IterationRecord::new(Phase::Assessment, iteration)
                            .with_candidate(current.clone())
                            .with_note(e.to_string()),
                    );
                    continue;
                }
                Err(Interrupt::Failed(e)) => {
                    run.outcome = fail_open(&e);
                    return Ok(run);
                }
            };

            run.records.push(
                IterationRecord::new(Phase::Assessment, iteration)
                    .with_candidate(current.clone())
                    .with_defects(verdict.defects.clone())
                    .with_note(verdict.classification.to_string()),
            );

            if verdict.classification == Classification::Pass {
                session.accept(current);
                tracing::info!(iteration, "visual assessment passed");
                run.outcome = AssessmentOutcome::Pass { iterations: iteration };
                return Ok(run);
            }

            let repeated = previous_defects
                .as_deref()
                .is_some_and(|prev| repeats(prev, &verdict.defects, self.config.similarity_threshold));
            streak = if repeated { streak + 1 } else { 0 };
            unresolved.clone_from(&verdict.defects);
            previous_defects = Some(verdict.defects);

            if streak >= self.config.repeat_limit {
                tracing::warn!(iteration, streak, "same defect repeated, stopping");
                run.outcome = AssessmentOutcome::StoppedRepeatedDefect {
                    iterations: iteration,
                    defects: unresolved,
                };
                return Ok(run);
            }
            if !verdict.should_continue {
                tracing::warn!(iteration, "assessment oracle declined to continue");
                run.outcome = AssessmentOutcome::StoppedCriticalUnresolved {
                    iterations: iteration,
                    defects: unresolved,
                };
                return Ok(run);
            }
            if iteration == max {
                break;
            }

            let Some(candidate) = self
                .correct(session, generation, &input, &unresolved, &mut run, cancel)
                .await?
            else {
                run.outcome = AssessmentOutcome::StoppedCriticalUnresolved {
                    iterations: iteration,
                    defects: unresolved,
                };
                return Ok(run);
            };
            current = candidate;
        }

        tracing::warn!(iterations = max, "visual assessment hit the iteration cap");
        run.outcome = AssessmentOutcome::StoppedMaxIterations {
            iterations: max,
            defects: unresolved,
        };
        Ok(run)
    }

    /// Reset, apply the previous artifact and capture the before-snapshot
    async fn setup(
        &self,
        previous: Option<&Artifact>,
        target: Option<&TargetDescriptor>,
        cancel: &CancellationToken,
    ) -> Result<SurfaceSnapshot, Interrupt> {
        let timeout = self.config.call_timeout();
        surface_call(self.surface.reset(), timeout, cancel, AssessmentError::Reset).await?;
        if let Some(previous) = previous {
            surface_call(self.surface.apply(previous.candidate()), timeout, cancel, AssessmentError::Apply).await?;
        }
        surface_call(self.surface.capture(target), timeout, cancel, AssessmentError::Capture).await
    }

    async fn iterate(
        &self,
        candidate: &Candidate,
        before: &SurfaceSnapshot,
        calibration: &Calibration,
        request: &ChangeRequest,
        cancel: &CancellationToken,
    ) -> Result<Assessment, Interrupt> {
        let timeout = self.config.call_timeout();
        surface_call(self.surface.reset(), timeout, cancel, AssessmentError::Reset).await?;
        surface_call(self.surface.apply(candidate), timeout, cancel, AssessmentError::Apply).await?;
        let after = surface_call(self.surface.capture(request.target()), timeout, cancel, AssessmentError::Capture).await?;

        let defects = precheck(before, &after, request.text(), self.config.count_multiple);
        if !defects.is_empty() {
            tracing::info!(count = defects.len(), "entity-count pre-check found critical defects");
            return Ok(Assessment {
                classification: Classification::CriticalDefect,
                defects,
                should_continue: true,
            });
        }

        let text = match bounded(
            self.assessor.assess(request.text(), before, &after, calibration),
            timeout,
            cancel,
        )
        .await
        {
            CallOutcome::Done(text) => text,
            CallOutcome::Failed(e) => return Err(AssessmentError::Oracle(e).into()),
            CallOutcome::TimedOut(d) => {
                return Err(AssessmentError::Oracle(OracleError::Timeout(d)).into())
            }
            CallOutcome::Cancelled => return Err(Interrupt::Cancelled),
        };
        Ok(parse_assessment(&text)?)
    }

    /// Regenerate against the defects; `None` when generation is exhausted
    async fn correct(
        &self,
        session: &mut Session,
        generation: &GenerationLoop,
        input: &AssessmentInput<'_>,
        defects: &[Defect],
        run: &mut AssessmentRun,
        cancel: &CancellationToken,
    ) -> Result<Option<Candidate>, RefineError> {
        let feedback: Vec<String> = defects.iter().map(ToString::to_string).collect();
        let corrective = input.request.follow_up(format!(
            "Fix these defects introduced by the previous change ({}): {}",
            input.request.text(),
            feedback.join("; ")
        ));
        let strategy = match input.strategy {
            GenerationStrategy::FullRewrite => GenerationStrategy::PreserveIdentifiers,
            other => other,
        };
        let view = Arc::clone(session.index_view());
        let report = generation
            .run(
                GenerationInput {
                    request: &corrective,
                    strategy,
                    current: session.artifact(),
                    baseline: session.baseline(),
                    view: &view,
                    fresh: input.fresh,
                    seed_feedback: &feedback,
                },
                cancel,
            )
            .await?;
        run.generation_attempts += report.outcome.attempts();
        run.records.extend(report.records);

        match report.outcome {
            GenerationOutcome::Succeeded {
                candidate, confidence, ..
            } => {
                session.accept(candidate.clone());
                run.corrective_confidence = Some(confidence);
                Ok(Some(candidate))
            }
            GenerationOutcome::Exhausted {
                errors,
                last_candidate,
                ..
            } => {
                let report = session.rollback(
                    last_candidate.as_ref(),
                    "corrective regeneration exhausted",
                );
                run.warnings.push(format!(
                    "corrective regeneration failed; kept version {}",
                    report
                        .restored_version
                        .map_or_else(|| "none".to_owned(), |v| v.to_string())
                ));
                run.warnings.extend(errors);
                Ok(None)
            }
        }
    }
}

async fn surface_call<T, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
    wrap: fn(SurfaceError) -> AssessmentError,
) -> Result<T, Interrupt>
where
    F: Future<Output = Result<T, SurfaceError>>,
{
    match bounded(call, timeout, cancel).await {
        CallOutcome::Done(value) => Ok(value),
        CallOutcome::Failed(e) => Err(Interrupt::Failed(wrap(e))),
        CallOutcome::TimedOut(d) => Err(Interrupt::Failed(wrap(SurfaceError::Timeout(d)))),
        CallOutcome::Cancelled => Err(Interrupt::Cancelled),
    }
}

fn fail_open(error: &AssessmentError) -> AssessmentOutcome {
    tracing::warn!(%error, "visual assessment failed open");
    AssessmentOutcome::Skipped {
        reason: error.to_string(),
    }
}

fn expected_structure(request_text: &str, before: &SurfaceSnapshot, multiple: f64) -> String {
    let counts: Vec<String> = before
        .entity_counts
        .iter()
        .map(|(kind, n)| format!("{kind}={n}"))
        .collect();
    format!(
        "Change requested: {request_text}. Entity counts before the change: [{}]. \
         No entity kind should grow beyond {multiple}x unless the request asks for it.",
        counts.join(", ")
    )
}
