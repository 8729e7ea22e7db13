//! Session state
//!
//! A [`Session`] is the explicit context threaded through the pipeline: the
//! current artifact, the baseline a full rewrite starts from, the rollback
//! snapshot, quality history and the conversation window. The pipeline works
//! on a clone and hands it back, so nothing is ever shared or global.

use crate::config::RefineConfig;
use crate::quality::QualityMetrics;
use crate::rollback::{RollbackManager, RollbackReport};
use crate::types::{ConversationTurn, SessionId};
use refine_artifact::{Artifact, Candidate};
use refine_symbol::IdentifierIndexView;
use std::collections::VecDeque;
use std::sync::Arc;

/// Per-caller refinement state, passed into and out of the pipeline
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    artifact: Option<Artifact>,
    baseline: Option<Artifact>,
    rollback: RollbackManager,
    index_view: Arc<IdentifierIndexView>,
    quality_history: VecDeque<QualityMetrics>,
    history: Vec<ConversationTurn>,
    history_window: usize,
    history_len: usize,
    next_version: u64,
}

impl Session {
    /// Empty session against a clean surface
    #[must_use]
    pub fn new(config: &RefineConfig) -> Self {
        Self::with_view(config, Arc::new(IdentifierIndexView::default()))
    }

    /// Empty session with a preloaded index view
    #[must_use]
    pub fn with_view(config: &RefineConfig, index_view: Arc<IdentifierIndexView>) -> Self {
        Self {
            id: SessionId::new(),
            artifact: None,
            baseline: None,
            rollback: RollbackManager::new(Arc::clone(&index_view)),
            index_view,
            quality_history: VecDeque::new(),
            history: Vec::new(),
            history_window: config.classifier.history_window,
            history_len: config.quality.history_len,
            next_version: 1,
        }
    }

    /// Session whose baseline is an existing artifact
    ///
    /// The seed becomes both the current artifact and the state a
    /// course reversal regenerates from.
    #[must_use]
    pub fn seeded(config: &RefineConfig, seed: Candidate) -> Self {
        let mut session = Self::new(config);
        let artifact = session.accept(seed);
        session.baseline = Some(artifact);
        session
    }

    /// Session id
    #[inline]
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current accepted artifact
    #[inline]
    #[must_use]
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_ref()
    }

    /// The artifact the session started from, if it was seeded
    #[inline]
    #[must_use]
    pub fn baseline(&self) -> Option<&Artifact> {
        self.baseline.as_ref()
    }

    /// Snapshot owner
    #[inline]
    #[must_use]
    pub fn rollback_manager(&self) -> &RollbackManager {
        &self.rollback
    }

    /// Index view of the current snapshot
    #[inline]
    #[must_use]
    pub fn index_view(&self) -> &Arc<IdentifierIndexView> {
        &self.index_view
    }

    /// Refresh the index view used by the next request
    pub fn set_index_view(&mut self, view: IdentifierIndexView) {
        self.index_view = Arc::new(view);
    }

    /// Recent turns, oldest first
    #[must_use]
    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    /// Metrics of the latest accepted version
    #[must_use]
    pub fn last_quality(&self) -> Option<&QualityMetrics> {
        self.quality_history.back()
    }

    /// Retained metrics, oldest first
    pub fn quality_history(&self) -> impl Iterator<Item = &QualityMetrics> {
        self.quality_history.iter()
    }

    /// Accept a validated candidate and commit the rollback snapshot
    ///
    /// Accepting the fragments already current is a no-op that returns the
    /// current artifact unchanged.
    pub fn accept(&mut self, candidate: Candidate) -> Artifact {
        if let Some(current) = &self.artifact {
            if current.same_content(&candidate) {
                return current.clone();
            }
        }
        let artifact = Artifact::accept(candidate, self.next_version);
        self.next_version += 1;
        self.rollback.commit(&artifact, Arc::clone(&self.index_view));
        self.artifact = Some(artifact.clone());
        tracing::info!(
            session = %self.id,
            version = artifact.version(),
            hash = %artifact.hash().short(),
            "artifact accepted"
        );
        artifact
    }

    /// Reinstate the last committed snapshot
    pub fn rollback(&mut self, discarded: Option<&Candidate>, reason: impl Into<String>) -> RollbackReport {
        let (artifact, report) = self.rollback.restore(discarded, reason);
        self.artifact = artifact;
        self.index_view = Arc::clone(self.rollback.current().index_view());
        report
    }

    /// Append metrics, dropping the oldest past `history_len`
    pub fn record_quality(&mut self, metrics: QualityMetrics) {
        self.quality_history.push_back(metrics);
        while self.quality_history.len() > self.history_len {
            self.quality_history.pop_front();
        }
    }

    /// Append a turn, dropping the oldest past the window
    pub fn record_turn(&mut self, turn: ConversationTurn) {
        self.history.push(turn);
        if self.history.len() > self.history_window {
            let excess = self.history.len() - self.history_window;
            self.history.drain(..excess);
        }
    }

    /// Start over against a freshly captured baseline
    pub fn reset(&mut self, index_view: IdentifierIndexView) {
        tracing::info!(session = %self.id, "session reset");
        let history_window = self.history_window;
        let history_len = self.history_len;
        *self = Self {
            history_window,
            history_len,
            ..Self::with_view(&RefineConfig::default(), Arc::new(index_view))
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SubmitStatus;
    use pretty_assertions::assert_eq;

    fn turn(n: usize) -> ConversationTurn {
        ConversationTurn {
            request: format!("request {n}"),
            intent: None,
            status: SubmitStatus::Accepted,
            summary: String::new(),
        }
    }

    #[test]
    fn accept_bumps_version_and_commits() {
        let mut session = Session::new(&RefineConfig::default());
        let first = session.accept(Candidate::new(".a { color: red; }", ""));
        let second = session.accept(Candidate::new(".a { color: blue; }", ""));

        assert_eq!(first.version(), 1);
        assert_eq!(second.version(), 2);
        assert_eq!(session.artifact(), Some(&second));
        assert_eq!(session.rollback_manager().current().artifact(), Some(&second));
    }

    #[test]
    fn accepting_current_content_is_idempotent() {
        let mut session = Session::new(&RefineConfig::default());
        let first = session.accept(Candidate::new("", "f();"));
        let again = session.accept(Candidate::new("", "f();"));
        assert_eq!(first, again);
        assert_eq!(session.rollback_manager().commits(), 1);
    }

    #[test]
    fn rollback_restores_last_commit() {
        let mut session = Session::new(&RefineConfig::default());
        let accepted = session.accept(Candidate::new("", "f();"));
        let before = session.artifact().cloned();

        let report = session.rollback(Some(&Candidate::new("", "g(")), "exhausted");
        assert_eq!(session.artifact().cloned(), before);
        assert_eq!(report.restored_version, Some(accepted.version()));
    }

    #[test]
    fn history_is_windowed() {
        let config = RefineConfig::default();
        let mut session = Session::new(&config);
        for n in 0..10 {
            session.record_turn(turn(n));
        }
        assert_eq!(session.history().len(), config.classifier.history_window);
        assert_eq!(session.history()[0].request, "request 4");
    }

    #[test]
    fn quality_history_is_bounded() {
        let mut session = Session::new(&RefineConfig::default());
        for size in 0..15 {
            session.record_quality(QualityMetrics {
                size,
                ..QualityMetrics::default()
            });
        }
        assert_eq!(session.quality_history().count(), 10);
        assert_eq!(session.last_quality().map(|m| m.size), Some(14));
    }

    #[test]
    fn seeded_session_keeps_baseline() {
        let mut session = Session::seeded(&RefineConfig::default(), Candidate::new("", "seed();"));
        assert_eq!(session.baseline().map(Artifact::version), Some(1));
        session.accept(Candidate::new("", "next();"));
        assert_eq!(session.baseline().map(Artifact::behavior_instructions), Some("seed();"));
    }

    #[test]
    fn reset_discards_everything() {
        let mut session = Session::new(&RefineConfig::default());
        let old_id = session.id();
        session.accept(Candidate::new("", "f();"));
        session.record_turn(turn(1));
        session.record_quality(QualityMetrics::default());

        session.reset(IdentifierIndexView::default());
        assert_ne!(session.id(), old_id);
        assert!(session.artifact().is_none());
        assert!(session.history().is_empty());
        assert!(session.last_quality().is_none());
        assert_eq!(session.rollback_manager().commits(), 0);
        let next = session.accept(Candidate::new("", "g();"));
        assert_eq!(next.version(), 1);
    }
}
