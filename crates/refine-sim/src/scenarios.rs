//! Canned refinement scenarios driven by scripted collaborators

use anyhow::{ensure, Context};
use refine_core::{AssessmentOutcome, Collaborators, RefineConfig, RefinementEngine, SubmitStatus};
use refine_test_utils::{
    assessment_json, candidate_json, classification_json, sample_index, FakeSurface, ScriptedAssessor,
    ScriptedOracle,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

const BLUE_HEADER: &str = "#header { color: blue; }";
const MISSING_ID: &str = "document.querySelector('#missing').focus();";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scenario {
    A,
    B,
    C,
    D,
    E,
    Repeat,
}

impl Scenario {
    pub(crate) const ALL: [Self; 6] = [Self::A, Self::B, Self::C, Self::D, Self::E, Self::Repeat];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::Repeat => "repeat",
        }
    }

    pub(crate) fn description(self) -> &'static str {
        match self {
            Self::A => "refinement accepted on the first attempt",
            Self::B => "missing identifier corrected on attempt 2",
            Self::C => "three failed attempts roll back",
            Self::D => "low confidence asks the user",
            Self::E => "entity-count pre-check forces a correction",
            Self::Repeat => "identical defects stop the visual loop by iteration 3",
        }
    }

    async fn run(self, config: RefineConfig) -> anyhow::Result<String> {
        match self {
            Self::A => first_attempt(config).await,
            Self::B => second_attempt(config).await,
            Self::C => exhausted(config).await,
            Self::D => clarification(config).await,
            Self::E => precheck(config).await,
            Self::Repeat => repeated_defect(config).await,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ScenarioResult {
    pub(crate) name: &'static str,
    pub(crate) description: &'static str,
    pub(crate) passed: bool,
    pub(crate) detail: String,
    pub(crate) elapsed_ms: u128,
}

#[derive(Debug, Serialize)]
pub(crate) struct SimulationReport {
    pub(crate) engine_version: &'static str,
    pub(crate) results: Vec<ScenarioResult>,
}

impl SimulationReport {
    pub(crate) fn passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }

    pub(crate) fn generate_text(&self) -> String {
        let mut out = String::from("Refinement Scenario Report\n");
        for r in &self.results {
            out.push_str(&format!(
                "  [{}] {} - {} ({}ms)\n      {}\n",
                if r.passed { "PASS" } else { "FAIL" },
                r.name,
                r.description,
                r.elapsed_ms,
                r.detail
            ));
        }
        let passed = self.results.iter().filter(|r| r.passed).count();
        out.push_str(&format!("  {passed}/{} scenarios passed\n", self.results.len()));
        out
    }
}

/// Run every scenario whose name is in `only` (all when empty)
pub(crate) async fn run_all(config: &RefineConfig, only: &[String]) -> SimulationReport {
    let mut results = Vec::new();
    for scenario in Scenario::ALL {
        let name = scenario.name();
        if !only.is_empty() && !only.iter().any(|o| o.eq_ignore_ascii_case(name)) {
            continue;
        }
        let started = Instant::now();
        let outcome = scenario.run(config.clone()).await;
        let elapsed_ms = started.elapsed().as_millis();
        let (passed, detail) = match outcome {
            Ok(detail) => (true, detail),
            Err(e) => {
                tracing::error!(scenario = name, error = %format!("{e:#}"), "scenario failed");
                (false, format!("{e:#}"))
            }
        };
        results.push(ScenarioResult {
            name,
            description: scenario.description(),
            passed,
            detail,
            elapsed_ms,
        });
    }
    SimulationReport {
        engine_version: refine_core::VERSION,
        results,
    }
}

fn engine(config: RefineConfig, oracle: Arc<ScriptedOracle>) -> anyhow::Result<RefinementEngine> {
    RefinementEngine::new(
        config.with_assessment_enabled(false),
        Collaborators::new(oracle, sample_index()),
    )
    .context("engine construction")
}

async fn first_attempt(config: RefineConfig) -> anyhow::Result<String> {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .classifying("REFINEMENT")
            .on("generate", [candidate_json(BLUE_HEADER, "")]),
    );
    let response = engine(config, oracle)?
        .submit_change_request("make the header blue", None)
        .await?;
    ensure!(response.status == SubmitStatus::Accepted, "status {}", response.status);
    ensure!(response.attempts == 1, "{} attempts", response.attempts);
    Ok(format!("accepted, confidence {:?}", response.confidence))
}

async fn second_attempt(config: RefineConfig) -> anyhow::Result<String> {
    let oracle = Arc::new(ScriptedOracle::new().classifying("REFINEMENT").on(
        "generate",
        [candidate_json("", MISSING_ID), candidate_json(BLUE_HEADER, "")],
    ));
    let response = engine(config, oracle)?
        .submit_change_request("make the header blue", None)
        .await?;
    ensure!(response.status == SubmitStatus::Accepted, "status {}", response.status);
    ensure!(response.attempts == 2, "{} attempts", response.attempts);
    Ok(response.notes.join("; "))
}

async fn exhausted(config: RefineConfig) -> anyhow::Result<String> {
    let oracle = Arc::new(ScriptedOracle::new().classifying("REFINEMENT").on(
        "generate",
        [candidate_json(BLUE_HEADER, ""), candidate_json("", MISSING_ID)],
    ));
    let engine = engine(config, Arc::clone(&oracle))?;
    let before = engine
        .submit_change_request("make the header blue", None)
        .await?
        .artifact
        .context("first request produced no artifact")?;
    let response = engine
        .submit_change_request("focus the missing widget", None)
        .await?;
    ensure!(response.status == SubmitStatus::Rejected, "status {}", response.status);
    let after = engine.current_artifact().await.context("artifact lost")?;
    ensure!(after == before, "artifact changed after rollback");
    ensure!(
        oracle.calls("generate") == 4,
        "{} generation calls, expected 1 + 3",
        oracle.calls("generate")
    );
    Ok(format!("{} errors, version {} kept", response.errors.len(), after.version()))
}

async fn clarification(config: RefineConfig) -> anyhow::Result<String> {
    let oracle = Arc::new(ScriptedOracle::new().on(
        "classify",
        [classification_json("REFINEMENT", 40, &["the page header", "the card header"])],
    ));
    let response = engine(config, oracle)?
        .submit_change_request("make the header bigger", None)
        .await?;
    ensure!(
        response.status == SubmitStatus::NeedsClarification,
        "status {}",
        response.status
    );
    ensure!(response.options.len() == 2, "{} options", response.options.len());
    Ok(response.options.join(" | "))
}

async fn precheck(config: RefineConfig) -> anyhow::Result<String> {
    let oracle = Arc::new(ScriptedOracle::new().classifying("REFINEMENT").on(
        "generate",
        [
            candidate_json(BLUE_HEADER, "insertBanner();\ninsertBanner();\ninsertBanner();\ninsertBanner();"),
            candidate_json(BLUE_HEADER, ""),
        ],
    ));
    let surface = Arc::new(
        FakeSurface::new()
            .with_base("banner", 2)
            .with_marker("insertBanner()", "banner"),
    );
    let collaborators = Collaborators::new(oracle, sample_index())
        .with_assessment(Arc::new(ScriptedAssessor::passing()), surface);
    let engine = RefinementEngine::new(config.with_assessment_enabled(true), collaborators)?;
    let response = engine
        .submit_change_request("make the header blue", None)
        .await?;
    ensure!(
        response.assessment == Some(AssessmentOutcome::Pass { iterations: 2 }),
        "assessment {:?}",
        response.assessment
    );
    Ok(format!("passed at iteration 2 after {} attempts", response.attempts))
}

async fn repeated_defect(config: RefineConfig) -> anyhow::Result<String> {
    let oracle = Arc::new(
        ScriptedOracle::new()
            .classifying("REFINEMENT")
            .on("generate", [candidate_json(BLUE_HEADER, "")]),
    );
    let assessor = Arc::new(ScriptedAssessor::new([assessment_json(
        "MAJOR_DEFECT",
        &[("major", "contrast", "header text contrast too low")],
        true,
    )]));
    let collaborators = Collaborators::new(oracle, sample_index())
        .with_assessment(Arc::clone(&assessor) as _, Arc::new(FakeSurface::new()));
    let engine = RefinementEngine::new(config.with_assessment_enabled(true), collaborators)?;
    let response = engine
        .submit_change_request("make the header blue", None)
        .await?;
    let outcome = response.assessment.context("visual loop did not run")?;
    ensure!(
        matches!(outcome, AssessmentOutcome::StoppedRepeatedDefect { iterations, .. } if iterations <= 3),
        "outcome {outcome:?}"
    );
    Ok(format!("{outcome} after {} oracle calls", assessor.calls()))
}
