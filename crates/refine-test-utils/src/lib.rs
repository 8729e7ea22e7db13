//! Testing utilities for the Refine workspace
//!
//! Scripted collaborators, a counting surface and JSON fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use refine_artifact::{Candidate, TargetDescriptor};
use refine_core::{
    AssessmentOracle, Calibration, GenerativeOracle, ObservableSurface, OracleError, SurfaceError,
    SurfaceSnapshot,
};
use refine_symbol::{IdentifierCandidate, IdentifierIndex, IdentifierIndexView, InMemoryIdentifierIndex, IndexError};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// One canned oracle answer
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(OracleError),
    /// Sleep, then answer
    Delayed(Duration, String),
}

impl Reply {
    async fn resolve(self) -> Result<String, OracleError> {
        match self {
            Self::Text(text) => Ok(text),
            Self::Fail(e) => Err(e),
            Self::Delayed(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(text)
            }
        }
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

/// Pops the next reply from a queue, repeating the last one forever
#[derive(Debug, Default)]
struct Script {
    replies: VecDeque<Reply>,
    calls: u32,
}

impl Script {
    fn next(&mut self) -> Option<Reply> {
        self.calls += 1;
        if self.replies.len() > 1 {
            self.replies.pop_front()
        } else {
            self.replies.front().cloned()
        }
    }
}

/// Generative oracle scripted per task (`classify`, `generate`)
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    scripts: Mutex<HashMap<String, Script>>,
    contexts: Mutex<Vec<Value>>,
}

impl ScriptedOracle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue replies for `task`
    #[must_use]
    pub fn on<R: Into<Reply>>(self, task: &str, replies: impl IntoIterator<Item = R>) -> Self {
        self.scripts
            .lock()
            .entry(task.to_owned())
            .or_default()
            .replies
            .extend(replies.into_iter().map(Into::into));
        self
    }

    /// Classifier always answers `intent`
    #[must_use]
    pub fn classifying(self, intent: &str) -> Self {
        self.on("classify", [classification_json(intent, 90, &[])])
    }

    /// Calls made for `task`
    #[must_use]
    pub fn calls(&self, task: &str) -> u32 {
        self.scripts.lock().get(task).map_or(0, |s| s.calls)
    }

    /// Every context the oracle was called with, in order
    #[must_use]
    pub fn contexts(&self) -> Vec<Value> {
        self.contexts.lock().clone()
    }

    /// Contexts of `generate` calls only
    #[must_use]
    pub fn generate_contexts(&self) -> Vec<Value> {
        self.contexts()
            .into_iter()
            .filter(|c| c["task"] == "generate")
            .collect()
    }
}

#[async_trait]
impl GenerativeOracle for ScriptedOracle {
    async fn generate(&self, _prompt: &str, context: &Value) -> Result<String, OracleError> {
        self.contexts.lock().push(context.clone());
        let task = context["task"].as_str().unwrap_or("unknown").to_owned();
        let reply = self.scripts.lock().entry(task.clone()).or_default().next();
        match reply {
            Some(reply) => reply.resolve().await,
            None => Err(OracleError::Unavailable(format!("no script for task {task}"))),
        }
    }
}

/// Assessment oracle answering from a queue
#[derive(Debug, Default)]
pub struct ScriptedAssessor {
    script: Mutex<Script>,
    requests: Mutex<Vec<String>>,
}

impl ScriptedAssessor {
    #[must_use]
    pub fn new<R: Into<Reply>>(replies: impl IntoIterator<Item = R>) -> Self {
        Self {
            script: Mutex::new(Script {
                replies: replies.into_iter().map(Into::into).collect(),
                calls: 0,
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always passes
    #[must_use]
    pub fn passing() -> Self {
        Self::new([assessment_json("PASS", &[], true)])
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.script.lock().calls
    }

    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AssessmentOracle for ScriptedAssessor {
    async fn assess(
        &self,
        request: &str,
        _before: &SurfaceSnapshot,
        _after: &SurfaceSnapshot,
        _calibration: &Calibration,
    ) -> Result<String, OracleError> {
        self.requests.lock().push(request.to_owned());
        let reply = self.script.lock().next();
        match reply {
            Some(reply) => reply.resolve().await,
            None => Err(OracleError::Unavailable("no scripted assessment".into())),
        }
    }
}

/// Surface operation, for logs and failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SurfaceOp {
    Reset,
    Apply,
    Capture,
}

/// Surface that counts entities from marker calls in the behavior fragment
///
/// Each occurrence of a marker (e.g. `insertBanner()`) in the applied
/// behavior instructions adds one entity of the mapped kind on top of the
/// base counts.
#[derive(Debug, Default)]
pub struct FakeSurface {
    base: BTreeMap<String, usize>,
    markers: Vec<(String, String)>,
    applied: Mutex<Option<Candidate>>,
    log: Mutex<Vec<SurfaceOp>>,
    failing: Mutex<Vec<SurfaceOp>>,
}

impl FakeSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_base(mut self, kind: &str, count: usize) -> Self {
        self.base.insert(kind.to_owned(), count);
        self
    }

    #[must_use]
    pub fn with_marker(mut self, marker: &str, kind: &str) -> Self {
        self.markers.push((marker.to_owned(), kind.to_owned()));
        self.base.entry(kind.to_owned()).or_insert(0);
        self
    }

    /// Make every future `op` fail
    pub fn fail(&self, op: SurfaceOp) {
        self.failing.lock().push(op);
    }

    #[must_use]
    pub fn log(&self) -> Vec<SurfaceOp> {
        self.log.lock().clone()
    }

    #[must_use]
    pub fn count(&self, op: SurfaceOp) -> usize {
        self.log.lock().iter().filter(|&&o| o == op).count()
    }

    fn enter(&self, op: SurfaceOp) -> Result<(), SurfaceError> {
        self.log.lock().push(op);
        if self.failing.lock().contains(&op) {
            return Err(SurfaceError::Unavailable(format!("{op:?} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl ObservableSurface for FakeSurface {
    async fn capture(&self, target: Option<&TargetDescriptor>) -> Result<SurfaceSnapshot, SurfaceError> {
        self.enter(SurfaceOp::Capture)?;
        let applied = self.applied.lock().clone();
        let mut counts = self.base.clone();
        if let Some(candidate) = applied {
            for (marker, kind) in &self.markers {
                let extra = candidate.behavior_instructions.matches(marker.as_str()).count();
                *counts.entry(kind.clone()).or_insert(0) += extra;
            }
        }
        let mut snapshot = SurfaceSnapshot::with_counts(counts);
        snapshot.target = target.map(|t| t.description.clone());
        Ok(snapshot)
    }

    async fn apply(&self, candidate: &Candidate) -> Result<(), SurfaceError> {
        self.enter(SurfaceOp::Apply)?;
        *self.applied.lock() = Some(candidate.clone());
        Ok(())
    }

    async fn reset(&self) -> Result<(), SurfaceError> {
        self.enter(SurfaceOp::Reset)?;
        *self.applied.lock() = None;
        Ok(())
    }
}

/// Index that is always down
#[derive(Debug, Default)]
pub struct FailingIndex;

#[async_trait]
impl IdentifierIndex for FailingIndex {
    async fn query(&self, _descriptor: &TargetDescriptor) -> Result<Vec<IdentifierCandidate>, IndexError> {
        Err(IndexError::Unavailable("index offline".into()))
    }

    async fn view(&self) -> Result<IdentifierIndexView, IndexError> {
        Err(IndexError::Unavailable("index offline".into()))
    }
}

/// Index with a header, a submit button, a title, a banner container and
/// one unbound profile widget
#[must_use]
pub fn sample_index() -> Arc<InMemoryIdentifierIndex> {
    let index = InMemoryIdentifierIndex::new();
    for (id, kind, label) in [
        ("#header", "header", "page header"),
        ("#submit", "button", "submit button"),
        ("#title", "heading", "page title"),
        ("#banner-slot", "banner", "promo banner container"),
        ("#profile-card", "card", "user profile card"),
    ] {
        // fresh index, identifiers are distinct
        let _ = index.insert(id, Some(kind), label);
    }
    Arc::new(index)
}

/// Generation reply carrying both fragments
#[must_use]
pub fn candidate_json(appearance_rules: &str, behavior_instructions: &str) -> String {
    json!({
        "appearance_rules": appearance_rules,
        "behavior_instructions": behavior_instructions,
    })
    .to_string()
}

#[must_use]
pub fn classification_json(intent: &str, confidence: u8, interpretations: &[&str]) -> String {
    json!({
        "intent": intent,
        "confidence": confidence,
        "rationale": format!("scripted {intent}"),
        "interpretations": interpretations,
    })
    .to_string()
}

/// Assessment reply; defects are `(severity, type, description)`
#[must_use]
pub fn assessment_json(classification: &str, defects: &[(&str, &str, &str)], should_continue: bool) -> String {
    let defects: Vec<Value> = defects
        .iter()
        .map(|(severity, kind, description)| {
            json!({ "severity": severity, "type": kind, "description": description })
        })
        .collect();
    json!({
        "classification": classification,
        "defects": defects,
        "continue": should_continue,
    })
    .to_string()
}
