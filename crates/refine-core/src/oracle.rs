//! External collaborator seams
//!
//! The engine treats generation, qualitative assessment and the observable
//! surface as black boxes reached through these traits. Every call is wrapped
//! by [`bounded`], which applies the per-call timeout and the request's
//! cancellation token.

use crate::config::CalibrationExample;
use crate::error::{OracleError, SurfaceError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use refine_artifact::{Candidate, TargetDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Text generator used for classification and candidate generation
///
/// No structural guarantee on output: callers parse leniently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeOracle: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        context: &serde_json::Value,
    ) -> Result<String, OracleError>;
}

/// Qualitative judge comparing before/after snapshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AssessmentOracle: Send + Sync {
    async fn assess(
        &self,
        request: &str,
        before: &SurfaceSnapshot,
        after: &SurfaceSnapshot,
        calibration: &Calibration,
    ) -> Result<String, OracleError>;
}

/// The surface the artifact is applied to
///
/// `apply` must be idempotent and `reset` must restore the clean baseline, so
/// iterations never see side effects from earlier ones.
#[async_trait]
pub trait ObservableSurface: Send + Sync {
    async fn capture(&self, target: Option<&TargetDescriptor>)
        -> Result<SurfaceSnapshot, SurfaceError>;

    async fn apply(&self, candidate: &Candidate) -> Result<(), SurfaceError>;

    async fn reset(&self) -> Result<(), SurfaceError>;
}

/// Opaque capture of the surface plus the counts the pre-check needs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceSnapshot {
    /// Descriptor of the captured region, if narrowed
    pub target: Option<String>,
    /// Entities per kind (`button` -> 3)
    pub entity_counts: BTreeMap<String, usize>,
    /// Raw capture, passed through to the assessor
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<Vec<u8>>,
    /// Short textual description of the surface
    pub summary: String,
    /// Capture time
    pub captured_at: Option<DateTime<Utc>>,
}

impl SurfaceSnapshot {
    /// Snapshot carrying only entity counts
    #[must_use]
    pub fn with_counts<I, K>(counts: I) -> Self
    where
        I: IntoIterator<Item = (K, usize)>,
        K: Into<String>,
    {
        Self {
            entity_counts: counts.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            captured_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// Entities of `kind`, 0 if absent
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.entity_counts.get(kind).copied().unwrap_or(0)
    }
}

/// Context handed to the assessment oracle alongside the snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calibration {
    /// What the surface is expected to look like after the change
    pub expected_structure: String,
    /// Worked examples of each verdict
    pub examples: Vec<CalibrationExample>,
}

/// Result of a bounded collaborator call
#[derive(Debug)]
pub(crate) enum CallOutcome<T, E> {
    Done(T),
    Failed(E),
    TimedOut(Duration),
    Cancelled,
}

/// Run `call` with a timeout, giving up early if `cancel` fires
pub(crate) async fn bounded<T, E, F>(
    call: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> CallOutcome<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => CallOutcome::Cancelled,
        result = tokio::time::timeout(timeout, call) => match result {
            Ok(Ok(value)) => CallOutcome::Done(value),
            Ok(Err(err)) => CallOutcome::Failed(err),
            Err(_) => CallOutcome::TimedOut(timeout),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out() {
        let cancel = CancellationToken::new();
        let outcome: CallOutcome<(), OracleError> = bounded(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Duration::from_secs(10),
            &cancel,
        )
        .await;
        assert!(matches!(outcome, CallOutcome::TimedOut(d) if d == Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn bounded_observes_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome: CallOutcome<(), OracleError> =
            bounded(std::future::pending(), Duration::from_secs(10), &cancel).await;
        assert!(matches!(outcome, CallOutcome::Cancelled));
    }

    #[tokio::test]
    async fn bounded_passes_through_results() {
        let cancel = CancellationToken::new();
        let done: CallOutcome<u8, OracleError> =
            bounded(async { Ok(7) }, Duration::from_secs(1), &cancel).await;
        assert!(matches!(done, CallOutcome::Done(7)));

        let failed: CallOutcome<u8, OracleError> = bounded(
            async { Err(OracleError::Unavailable("down".into())) },
            Duration::from_secs(1),
            &cancel,
        )
        .await;
        assert!(matches!(failed, CallOutcome::Failed(OracleError::Unavailable(_))));
    }

    #[test]
    fn snapshot_counts_default_to_zero() {
        let snapshot = SurfaceSnapshot::with_counts([("button", 2)]);
        assert_eq!(snapshot.count("button"), 2);
        assert_eq!(snapshot.count("banner"), 0);
    }
}
