//! Rollback manager
//!
//! Holds exactly one current [`Snapshot`] per session. Acceptance commits a
//! new snapshot before success is reported; terminal failure restores it.

use chrono::{DateTime, Utc};
use refine_artifact::{Artifact, Candidate, ContentHash};
use refine_symbol::IdentifierIndexView;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Immutable copy of the last accepted state
#[derive(Debug, Clone)]
pub struct Snapshot {
    artifact: Option<Arc<Artifact>>,
    index_view: Arc<IdentifierIndexView>,
    taken_at: DateTime<Utc>,
}

impl Snapshot {
    /// Snapshot of a session that has not accepted anything yet
    #[must_use]
    pub fn baseline(index_view: Arc<IdentifierIndexView>) -> Self {
        Self {
            artifact: None,
            index_view,
            taken_at: Utc::now(),
        }
    }

    /// Accepted artifact, `None` at the baseline
    #[must_use]
    pub fn artifact(&self) -> Option<&Artifact> {
        self.artifact.as_deref()
    }

    /// Index view captured with the artifact
    #[must_use]
    pub fn index_view(&self) -> &Arc<IdentifierIndexView> {
        &self.index_view
    }

    /// When the snapshot was taken
    #[must_use]
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }
}

/// What a restore did
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackReport {
    /// Version now current, `None` if the session is back at its baseline
    pub restored_version: Option<u64>,
    /// Hash of the restored artifact
    pub restored_hash: Option<ContentHash>,
    /// Hash of the candidate that was thrown away, if one existed
    pub discarded: Option<ContentHash>,
    /// Why the restore happened
    pub reason: String,
}

/// Owner of the current snapshot
#[derive(Debug, Clone)]
pub struct RollbackManager {
    current: Snapshot,
    commits: u64,
}

impl RollbackManager {
    /// Manager holding a baseline snapshot
    #[must_use]
    pub fn new(index_view: Arc<IdentifierIndexView>) -> Self {
        Self {
            current: Snapshot::baseline(index_view),
            commits: 0,
        }
    }

    /// Snapshot that a rollback restores
    #[must_use]
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Number of commits since the last baseline
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.commits
    }

    /// Make `artifact` the state future failures roll back to
    pub fn commit(&mut self, artifact: &Artifact, index_view: Arc<IdentifierIndexView>) {
        tracing::debug!(
            version = artifact.version(),
            hash = %artifact.hash().short(),
            "snapshot committed"
        );
        self.current = Snapshot {
            artifact: Some(Arc::new(artifact.clone())),
            index_view,
            taken_at: Utc::now(),
        };
        self.commits += 1;
    }

    /// The artifact to reinstate, plus a report for the caller
    #[must_use]
    pub fn restore(
        &self,
        discarded: Option<&Candidate>,
        reason: impl Into<String>,
    ) -> (Option<Artifact>, RollbackReport) {
        let artifact = self.current.artifact().cloned();
        let report = RollbackReport {
            restored_version: artifact.as_ref().map(Artifact::version),
            restored_hash: artifact.as_ref().map(Artifact::hash),
            discarded: discarded.map(Candidate::hash),
            reason: reason.into(),
        };
        tracing::warn!(
            restored_version = ?report.restored_version,
            reason = %report.reason,
            "rolled back to last accepted snapshot"
        );
        (artifact, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use refine_symbol::Identifier;

    fn view() -> Arc<IdentifierIndexView> {
        Arc::new(IdentifierIndexView::new([Identifier::new("#a")]))
    }

    #[test]
    fn restore_before_any_commit_returns_baseline() {
        let manager = RollbackManager::new(view());
        let (artifact, report) = manager.restore(None, "exhausted");
        assert!(artifact.is_none());
        assert_eq!(report.restored_version, None);
        assert_eq!(manager.commits(), 0);
    }

    #[test]
    fn restore_returns_the_last_commit() {
        let mut manager = RollbackManager::new(view());
        let first = Artifact::accept(Candidate::new(".a { color: red; }", ""), 1);
        let second = Artifact::accept(Candidate::new(".a { color: blue; }", ""), 2);
        manager.commit(&first, view());
        manager.commit(&second, view());

        let failed = Candidate::new("broken {", "");
        let (artifact, report) = manager.restore(Some(&failed), "3 attempts failed");
        assert_eq!(artifact.as_ref(), Some(&second));
        assert_eq!(report.restored_version, Some(2));
        assert_eq!(report.restored_hash, Some(second.hash()));
        assert_eq!(report.discarded, Some(failed.hash()));
        assert_eq!(manager.commits(), 2);
    }

    #[test]
    fn snapshot_is_independent_of_later_changes() {
        let mut manager = RollbackManager::new(view());
        let artifact = Artifact::accept(Candidate::new("", "f();"), 1);
        manager.commit(&artifact, view());
        let snapshot = manager.current().clone();

        manager.commit(&Artifact::accept(Candidate::new("", "g();"), 2), view());
        assert_eq!(snapshot.artifact().map(Artifact::version), Some(1));
        assert_eq!(
            manager.current().artifact().map(Artifact::behavior_instructions),
            Some("g();")
        );
    }
}
