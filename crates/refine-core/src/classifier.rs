//! Intent classification
//!
//! Asks the generative oracle what kind of change a request is. The response
//! is never trusted to be well-formed: a parse failure earns one retry with a
//! stricter instruction and then degrades to `AMBIGUOUS` so the caller gets a
//! clarification question instead of an error.

use crate::config::ClassifierConfig;
use crate::error::{OracleError, RefineError};
use crate::extract::extract_json;
use crate::oracle::{bounded, CallOutcome, GenerativeOracle};
use crate::types::{ConversationTurn, Intent, IntentClassification};
use refine_artifact::{Artifact, ChangeRequest};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Rationale used when the oracle never produced a usable answer
pub const UNPARSEABLE_RATIONALE: &str = "unparseable classifier response";

const CLASSIFY_PROMPT: &str = "Classify the change request as REFINEMENT, NEW_FEATURE, \
COURSE_REVERSAL or AMBIGUOUS. Reply with a JSON object \
{\"intent\", \"confidence\", \"rationale\", \"interpretations\"}.";

const STRICT_CLASSIFY_PROMPT: &str = "Your previous reply could not be parsed. Reply with ONLY \
a JSON object and no other text: {\"intent\": one of REFINEMENT|NEW_FEATURE|COURSE_REVERSAL|\
AMBIGUOUS, \"confidence\": 0-100, \"rationale\": string, \"interpretations\": [string]}.";

#[derive(Debug, Deserialize)]
struct RawClassification {
    intent: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    interpretations: Vec<String>,
}

/// Classifies change requests through the generative oracle
#[derive(Clone)]
pub struct IntentClassifier {
    oracle: Arc<dyn GenerativeOracle>,
    config: ClassifierConfig,
    timeout: Duration,
}

impl IntentClassifier {
    /// Classifier bounded by `timeout` per oracle call
    #[must_use]
    pub fn new(oracle: Arc<dyn GenerativeOracle>, config: ClassifierConfig, timeout: Duration) -> Self {
        Self {
            oracle,
            config,
            timeout,
        }
    }

    /// Classify a request against the current artifact and recent history
    ///
    /// # Errors
    /// [`RefineError::Oracle`] on transport failure or timeout,
    /// [`RefineError::Cancelled`] if `cancel` fires. Unparseable responses
    /// are not errors.
    #[tracing::instrument(skip_all, fields(request_id = %request.id()))]
    pub async fn classify(
        &self,
        request: &ChangeRequest,
        current: Option<&Artifact>,
        history: &[ConversationTurn],
        cancel: &CancellationToken,
    ) -> Result<IntentClassification, RefineError> {
        let window = history.len().saturating_sub(self.config.history_window);
        let context = json!({
            "task": "classify",
            "request": request.text(),
            "target": request.target(),
            "artifact": current.map(Artifact::candidate),
            "history": &history[window..],
        });

        let raw = self.call(CLASSIFY_PROMPT, &context, cancel).await?;
        let parsed = match extract_json::<RawClassification>(&raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(error = %e, "classifier response unparseable, retrying with strict prompt");
                let raw = self.call(STRICT_CLASSIFY_PROMPT, &context, cancel).await?;
                extract_json::<RawClassification>(&raw)
                    .map_err(|e| tracing::warn!(error = %e, "strict classifier retry unparseable"))
                    .ok()
            }
        };

        let classification = match parsed {
            Some(raw) => self.normalize(raw, request),
            None => fallback(request, UNPARSEABLE_RATIONALE),
        };
        tracing::info!(
            intent = %classification.intent,
            confidence = classification.confidence,
            "request classified"
        );
        Ok(classification)
    }

    async fn call(
        &self,
        prompt: &str,
        context: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<String, RefineError> {
        match bounded(self.oracle.generate(prompt, context), self.timeout, cancel).await {
            CallOutcome::Done(text) => Ok(text),
            CallOutcome::Failed(e) => Err(RefineError::Oracle(e)),
            CallOutcome::TimedOut(d) => Err(RefineError::Oracle(OracleError::Timeout(d))),
            CallOutcome::Cancelled => Err(RefineError::Cancelled),
        }
    }

    fn normalize(&self, raw: RawClassification, request: &ChangeRequest) -> IntentClassification {
        let Some(intent) = Intent::from_oracle_str(&raw.intent) else {
            tracing::warn!(value = %raw.intent, "unknown intent from classifier, treating as ambiguous");
            let mut classification = fallback(request, &format!("unknown intent `{}`", raw.intent));
            if raw.interpretations.len() >= 2 {
                classification.interpretations = raw.interpretations;
            }
            return classification;
        };

        let confidence = scale_confidence(raw.confidence);
        let interpretations: Vec<String> = raw
            .interpretations
            .into_iter()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();

        if intent != Intent::Ambiguous
            && confidence < self.config.min_confidence
            && interpretations.len() >= 2
        {
            tracing::debug!(%intent, confidence, "low confidence with alternatives, promoting to ambiguous");
            return IntentClassification {
                intent: Intent::Ambiguous,
                confidence,
                rationale: format!("low-confidence {intent}: {}", raw.rationale),
                interpretations,
            };
        }

        IntentClassification {
            intent,
            confidence,
            rationale: raw.rationale,
            interpretations,
        }
    }
}

/// Scale fractional confidences to percent and clamp to 0-100
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn scale_confidence(raw: Option<f64>) -> u8 {
    let value = match raw {
        Some(v) if v.is_finite() => v,
        _ => return 0,
    };
    let percent = if value > 0.0 && value <= 1.0 {
        value * 100.0
    } else {
        value
    };
    percent.round().clamp(0.0, 100.0) as u8
}

fn fallback(request: &ChangeRequest, rationale: &str) -> IntentClassification {
    IntentClassification {
        intent: Intent::Ambiguous,
        confidence: 0,
        rationale: rationale.to_owned(),
        interpretations: vec![
            format!("Adjust what already exists: {}", request.text()),
            format!("Add something new: {}", request.text()),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::MockGenerativeOracle;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn classifier(mock: MockGenerativeOracle) -> IntentClassifier {
        IntentClassifier::new(
            Arc::new(mock),
            ClassifierConfig::default(),
            Duration::from_secs(5),
        )
    }

    fn request() -> ChangeRequest {
        ChangeRequest::new("make the submit button green", None)
    }

    async fn run(mock: MockGenerativeOracle) -> Result<IntentClassification, RefineError> {
        classifier(mock)
            .classify(&request(), None, &[], &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn parses_json_inside_prose() {
        let mut mock = MockGenerativeOracle::new();
        mock.expect_generate()
            .withf(|_, ctx| ctx["task"] == "classify")
            .times(1)
            .returning(|_, _| {
                Ok("Here you go: {\"intent\": \"refinement\", \"confidence\": 0.9, \"rationale\": \"tweak\"} done".into())
            });

        let c = run(mock).await.unwrap();
        assert_eq!(c.intent, Intent::Refinement);
        assert_eq!(c.confidence, 90);
        assert_eq!(c.rationale, "tweak");
    }

    #[tokio::test]
    async fn unparseable_twice_falls_back_to_ambiguous() {
        let mut mock = MockGenerativeOracle::new();
        mock.expect_generate()
            .times(2)
            .returning(|_, _| Ok("I think it's a refinement.".into()));

        let c = run(mock).await.unwrap();
        assert_eq!(c.intent, Intent::Ambiguous);
        assert_eq!(c.rationale, UNPARSEABLE_RATIONALE);
        assert_eq!(c.interpretations.len(), 2);
    }

    #[tokio::test]
    async fn object_after_a_leading_region_is_not_read() {
        let mut mock = MockGenerativeOracle::new();
        mock.expect_generate().times(2).returning(|_, _| {
            Ok("I considered [a, b]. {\"intent\": \"REFINEMENT\", \"confidence\": 90}".into())
        });

        let c = run(mock).await.unwrap();
        assert_eq!(c.intent, Intent::Ambiguous);
        assert_eq!(c.rationale, UNPARSEABLE_RATIONALE);
    }

    #[tokio::test]
    async fn strict_retry_can_recover() {
        let mut mock = MockGenerativeOracle::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_generate()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("hmm".into()));
        mock.expect_generate()
            .withf(|prompt, _| prompt.contains("ONLY"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok("{\"intent\": \"NEW_FEATURE\", \"confidence\": 77}".into()));

        let c = run(mock).await.unwrap();
        assert_eq!(c.intent, Intent::NewFeature);
        assert_eq!(c.confidence, 77);
    }

    #[tokio::test]
    async fn low_confidence_with_alternatives_becomes_ambiguous() {
        let mut mock = MockGenerativeOracle::new();
        mock.expect_generate().returning(|_, _| {
            Ok(r#"{"intent": "refinement", "confidence": 35, "rationale": "two buttons",
                   "interpretations": ["the header button", "the footer button"]}"#
                .into())
        });

        let c = run(mock).await.unwrap();
        assert_eq!(c.intent, Intent::Ambiguous);
        assert_eq!(c.interpretations, vec!["the header button", "the footer button"]);
    }

    #[tokio::test]
    async fn unknown_intent_is_ambiguous() {
        let mut mock = MockGenerativeOracle::new();
        mock.expect_generate()
            .returning(|_, _| Ok(r#"{"intent": "make_it_pop", "confidence": 99}"#.into()));

        let c = run(mock).await.unwrap();
        assert_eq!(c.intent, Intent::Ambiguous);
        assert_eq!(c.interpretations.len(), 2);
    }

    #[tokio::test]
    async fn transport_failure_is_an_error() {
        let mut mock = MockGenerativeOracle::new();
        mock.expect_generate()
            .times(1)
            .returning(|_, _| Err(OracleError::Unavailable("503".into())));

        let err = run(mock).await.unwrap_err();
        assert!(matches!(err, RefineError::Oracle(OracleError::Unavailable(_))));
    }

    struct SlowOracle;

    #[async_trait]
    impl GenerativeOracle for SlowOracle {
        async fn generate(
            &self,
            _prompt: &str,
            _context: &serde_json::Value,
        ) -> Result<String, OracleError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_an_oracle_error() {
        let classifier = IntentClassifier::new(
            Arc::new(SlowOracle),
            ClassifierConfig::default(),
            Duration::from_secs(10),
        );
        let err = classifier
            .classify(&request(), None, &[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RefineError::Oracle(OracleError::Timeout(_))));
    }

    #[test]
    fn confidence_scaling() {
        assert_eq!(scale_confidence(Some(0.42)), 42);
        assert_eq!(scale_confidence(Some(1.0)), 100);
        assert_eq!(scale_confidence(Some(73.6)), 74);
        assert_eq!(scale_confidence(Some(250.0)), 100);
        assert_eq!(scale_confidence(Some(-3.0)), 0);
        assert_eq!(scale_confidence(Some(f64::NAN)), 0);
        assert_eq!(scale_confidence(None), 0);
    }
}
