//! Refinement pipeline
//!
//! Sequences one change request through classification, continuity
//! resolution, generation, acceptance, visual assessment and quality
//! reporting. The pipeline owns no state: it takes a [`Session`] by value and
//! returns the successor session together with the caller-facing response.

use crate::assessment::{AssessmentInput, AssessmentOutcome, VisualAssessmentLoop};
use crate::classifier::IntentClassifier;
use crate::config::RefineConfig;
use crate::continuity;
use crate::error::{OracleError, RefineError};
use crate::generation::{GenerationInput, GenerationLoop, GenerationOutcome};
use crate::oracle::{bounded, AssessmentOracle, CallOutcome, GenerativeOracle, ObservableSurface};
use crate::quality::QualityMonitor;
use crate::session::Session;
use crate::types::{
    ConversationTurn, GenerationStrategy, IntentClassification, Strategy, SubmitResponse, SubmitStatus,
};
use crate::validator::Validator;
use refine_artifact::{ChangeRequest, TargetDescriptor};
use refine_symbol::{IdentifierCandidate, IdentifierIndex, IdentifierIndexView, IndexError};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// External services the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Produces candidates and classifications
    pub generator: Arc<dyn GenerativeOracle>,
    /// Identifier index
    pub index: Arc<dyn IdentifierIndex>,
    /// Qualitative assessor; the visual loop needs both it and `surface`
    pub assessor: Option<Arc<dyn AssessmentOracle>>,
    /// Surface candidates are applied to and captured from
    pub surface: Option<Arc<dyn ObservableSurface>>,
}

impl Collaborators {
    /// Generation and index only; visual assessment is skipped
    #[must_use]
    pub fn new(generator: Arc<dyn GenerativeOracle>, index: Arc<dyn IdentifierIndex>) -> Self {
        Self {
            generator,
            index,
            assessor: None,
            surface: None,
        }
    }

    /// Enable the visual assessment loop
    #[must_use]
    pub fn with_assessment(
        mut self,
        assessor: Arc<dyn AssessmentOracle>,
        surface: Arc<dyn ObservableSurface>,
    ) -> Self {
        self.assessor = Some(assessor);
        self.surface = Some(surface);
        self
    }
}

/// Successor session plus the response for the caller
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Session to install as current
    pub session: Session,
    /// Response for the caller
    pub response: SubmitResponse,
}

/// One change request from classification to quality report
#[derive(Clone)]
pub struct RefinementPipeline {
    classifier: IntentClassifier,
    generation: GenerationLoop,
    visual: Option<VisualAssessmentLoop>,
    quality: QualityMonitor,
    index: Arc<dyn IdentifierIndex>,
    index_timeout: Duration,
}

impl RefinementPipeline {
    /// Pipeline wired to `collaborators` under `config`
    #[must_use]
    pub fn new(config: &RefineConfig, collaborators: &Collaborators) -> Self {
        let timeout = config.generation.call_timeout();
        let visual = match (&collaborators.assessor, &collaborators.surface) {
            (Some(assessor), Some(surface)) if config.assessment.enabled => Some(VisualAssessmentLoop::new(
                Arc::clone(assessor),
                Arc::clone(surface),
                config.assessment.clone(),
            )),
            _ => None,
        };
        Self {
            classifier: IntentClassifier::new(
                Arc::clone(&collaborators.generator),
                config.classifier.clone(),
                timeout,
            ),
            generation: GenerationLoop::new(
                Arc::clone(&collaborators.generator),
                Validator::new(config.validator.clone()),
                config.generation.clone(),
            ),
            visual,
            quality: QualityMonitor::new(config.quality.clone()),
            index: Arc::clone(&collaborators.index),
            index_timeout: timeout,
        }
    }

    /// Run one change request against `session`
    ///
    /// # Workflow
    /// 1. Classify the request and refresh the index view
    /// 2. Resolve the identifier strategy (or stop with a question)
    /// 3. Query fresh identifiers for new features
    /// 4. Generate and validate, rolling back on exhaustion
    /// 5. Accept, then run visual assessment when configured
    /// 6. Report quality against the previous accepted version
    ///
    /// Cancellation, oracle and index failures come back as a `REJECTED`
    /// response with the session exactly as it was passed in.
    ///
    /// # Errors
    /// [`RefineError::AmbiguityWithoutOptions`] when the classifier is
    /// ambiguous but offers fewer than two readings
    pub async fn run(
        &self,
        session: Session,
        request: ChangeRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineRun, RefineError> {
        let mut working = session.clone();
        match self.execute(&mut working, &request, cancel).await {
            Ok(response) => Ok(PipelineRun {
                session: working,
                response,
            }),
            Err(e @ RefineError::AmbiguityWithoutOptions { .. }) => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "pipeline aborted, session left untouched");
                let mut session = session;
                let response = SubmitResponse::rejected(session.artifact().cloned(), vec![e.to_string()]);
                session.record_turn(ConversationTurn {
                    request: request.text().to_owned(),
                    intent: None,
                    status: SubmitStatus::Rejected,
                    summary: e.to_string(),
                });
                Ok(PipelineRun { session, response })
            }
        }
    }

    async fn execute(
        &self,
        session: &mut Session,
        request: &ChangeRequest,
        cancel: &CancellationToken,
    ) -> Result<SubmitResponse, RefineError> {
        // 1. Classify while fetching the index view
        let (classification, view) = futures::future::try_join(
            self.classifier
                .classify(request, session.artifact(), session.history(), cancel),
            self.fetch_view(cancel),
        )
        .await?;
        session.set_index_view(view);

        // 2. Resolve continuity
        let strategy = match continuity::resolve(&classification)? {
            Strategy::AskUser(clarification) => {
                tracing::info!(options = clarification.options.len(), "asking for clarification");
                let mut response = SubmitResponse::clarification(clarification);
                finish_turn(session, request, &classification, response.status, "clarification requested");
                response.intent = Some(classification);
                return Ok(response);
            }
            Strategy::PreserveIdentifiers => GenerationStrategy::PreserveIdentifiers,
            Strategy::SearchIndex => GenerationStrategy::SearchIndex,
            Strategy::FullRewrite => GenerationStrategy::FullRewrite,
        };

        // 3. Fresh identifiers
        let fresh = if strategy == GenerationStrategy::SearchIndex {
            self.query_fresh(request, cancel).await?
        } else {
            Vec::new()
        };
        let view: IdentifierIndexView = session.index_view().as_ref().clone().with_fresh(&fresh);

        // 4. Generate and validate
        let previous = session.artifact().cloned();
        let report = self
            .generation
            .run(
                GenerationInput {
                    request,
                    strategy,
                    current: previous.as_ref(),
                    baseline: session.baseline(),
                    view: &view,
                    fresh: &fresh,
                    seed_feedback: &[],
                },
                cancel,
            )
            .await?;
        let mut attempts = report.outcome.attempts();
        let mut records = report.records;

        let (candidate, validation, mut confidence) = match report.outcome {
            GenerationOutcome::Succeeded {
                candidate,
                validation,
                confidence,
                ..
            } => (candidate, validation, confidence),
            GenerationOutcome::Exhausted {
                errors,
                last_candidate,
                attempts,
            } => {
                let rollback = session.rollback(last_candidate.as_ref(), format!("{attempts} attempts failed"));
                let mut response = SubmitResponse::rejected(session.artifact().cloned(), errors);
                response.attempts = attempts;
                response.iterations = records;
                response.notes.push(match rollback.restored_version {
                    Some(v) => format!("rolled back to version {v}"),
                    None => "rolled back to the empty baseline".to_owned(),
                });
                finish_turn(session, request, &classification, response.status, "generation exhausted");
                response.intent = Some(classification);
                return Ok(response);
            }
        };

        // 5. Accept, then assess visually
        session.set_index_view(view);
        session.accept(candidate);
        let mut warnings: Vec<String> = validation.warnings.iter().map(ToString::to_string).collect();
        let mut notes = Vec::new();
        if attempts > 1 {
            notes.push(format!("accepted after {attempts} attempts"));
        }

        let assessment = match &self.visual {
            Some(visual) => {
                let run = visual
                    .run(
                        session,
                        &self.generation,
                        AssessmentInput {
                            request,
                            strategy,
                            fresh: &fresh,
                            previous: previous.as_ref(),
                        },
                        cancel,
                    )
                    .await?;
                attempts += run.generation_attempts;
                records.extend(run.records);
                warnings.extend(run.warnings);
                if let Some(corrective) = run.corrective_confidence {
                    confidence = confidence.min(corrective);
                }
                match &run.outcome {
                    AssessmentOutcome::Pass { iterations } => {
                        notes.push(format!("visual assessment passed at iteration {iterations}"));
                    }
                    AssessmentOutcome::Skipped { reason } => {
                        warnings.push(format!("visual assessment skipped: {reason}"));
                    }
                    stopped => warnings.push(format!(
                        "visual assessment {stopped} after {} iteration(s); keeping the last structurally valid candidate",
                        stopped.iterations()
                    )),
                }
                Some(run.outcome)
            }
            None => None,
        };

        // 6. Quality
        let Some(artifact) = session.artifact().cloned() else {
            return Err(RefineError::InvalidRequest("accepted artifact missing from session".to_owned()));
        };
        let quality = self.quality.assess(artifact.candidate(), session.last_quality());
        session.record_quality(quality.metrics.clone());
        warnings.extend(quality.flags.iter().map(ToString::to_string));

        let summary = format!("accepted version {}", artifact.version());
        let mut response = SubmitResponse::accepted(artifact, confidence);
        response.quality_report = Some(quality);
        response.warnings = warnings;
        response.notes = notes;
        response.attempts = attempts;
        response.assessment = assessment;
        response.iterations = records;
        finish_turn(session, request, &classification, response.status, &summary);
        response.intent = Some(classification);
        tracing::info!(confidence, attempts, "change request accepted");
        Ok(response)
    }

    async fn fetch_view(&self, cancel: &CancellationToken) -> Result<IdentifierIndexView, RefineError> {
        match bounded(self.index.view(), self.index_timeout, cancel).await {
            CallOutcome::Done(view) => Ok(view),
            CallOutcome::Failed(e) => Err(RefineError::Index(e)),
            CallOutcome::TimedOut(d) => Err(RefineError::Oracle(OracleError::Timeout(d))),
            CallOutcome::Cancelled => Err(RefineError::Cancelled),
        }
    }

    async fn query_fresh(
        &self,
        request: &ChangeRequest,
        cancel: &CancellationToken,
    ) -> Result<Vec<IdentifierCandidate>, RefineError> {
        let descriptor = request
            .target()
            .filter(|t| !t.is_blank())
            .cloned()
            .unwrap_or_else(|| TargetDescriptor::from_text(request.text()));
        match bounded(self.index.query(&descriptor), self.index_timeout, cancel).await {
            CallOutcome::Done(candidates) => {
                tracing::debug!(count = candidates.len(), "fresh identifier candidates");
                Ok(candidates)
            }
            CallOutcome::Failed(IndexError::InvalidDescriptor(reason)) => {
                tracing::warn!(%reason, "index rejected descriptor, continuing without fresh candidates");
                Ok(Vec::new())
            }
            CallOutcome::Failed(e) => Err(RefineError::Index(e)),
            CallOutcome::TimedOut(d) => Err(RefineError::Oracle(OracleError::Timeout(d))),
            CallOutcome::Cancelled => Err(RefineError::Cancelled),
        }
    }
}

fn finish_turn(
    session: &mut Session,
    request: &ChangeRequest,
    classification: &IntentClassification,
    status: SubmitStatus,
    summary: &str,
) {
    session.record_turn(ConversationTurn {
        request: request.text().to_owned(),
        intent: Some(classification.intent),
        status,
        summary: summary.to_owned(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockGenerativeOracle;
    use pretty_assertions::assert_eq;
    use refine_artifact::{Artifact, Candidate};
    use refine_symbol::InMemoryIdentifierIndex;

    fn pipeline(mock: MockGenerativeOracle) -> RefinementPipeline {
        let index = InMemoryIdentifierIndex::new();
        index.insert("#title", None, "title").unwrap();
        RefinementPipeline::new(
            &RefineConfig::default(),
            &Collaborators::new(Arc::new(mock), Arc::new(index)),
        )
    }

    #[tokio::test]
    async fn oracle_failure_returns_the_untouched_session() {
        let mut mock = MockGenerativeOracle::new();
        mock.expect_generate()
            .returning(|_, _| Err(OracleError::Unavailable("down".into())));
        let session = Session::seeded(&RefineConfig::default(), Candidate::new("#title { color: red; }", ""));
        let before = session.artifact().cloned();

        let run = pipeline(mock)
            .run(session, ChangeRequest::new("make it blue", None), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(run.response.status, SubmitStatus::Rejected);
        assert_eq!(run.response.artifact, before);
        assert_eq!(run.session.artifact().cloned(), before);
        assert!(run.session.index_view().is_empty());
        assert_eq!(run.session.history().len(), 1);
    }

    #[tokio::test]
    async fn refinement_is_accepted_and_recorded() {
        let mut mock = MockGenerativeOracle::new();
        mock.expect_generate()
            .withf(|_, ctx| ctx["task"] == "classify")
            .returning(|_, _| Ok(r#"{"intent": "REFINEMENT", "confidence": 85}"#.into()));
        mock.expect_generate()
            .withf(|_, ctx| ctx["task"] == "generate")
            .times(1)
            .returning(|_, _| {
                Ok(r##"{"appearance_rules": "#title { color: blue; }", "behavior_instructions": ""}"##.into())
            });

        let run = pipeline(mock)
            .run(
                Session::new(&RefineConfig::default()),
                ChangeRequest::new("make the title blue", None),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert!(run.response.is_accepted());
        assert_eq!(run.response.confidence, Some(95));
        assert!(run.response.assessment.is_none());
        assert_eq!(run.session.artifact().map(Artifact::version), Some(1));
        assert_eq!(run.session.quality_history().count(), 1);
        assert!(run.session.index_view().contains(&refine_symbol::Identifier::new("#title")));
    }
}
