//! Quality and degradation monitor
//!
//! Pure scoring over a candidate. Output is advisory and never blocks
//! acceptance.

use crate::config::QualityConfig;
use once_cell::sync::Lazy;
use refine_artifact::syntax::{AppearanceParser, BehaviorParser};
use refine_artifact::{Candidate, FragmentParser, Outline};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

static TOKEN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"[A-Za-z_$][\w$-]*|\d+(?:\.\d+)?|[^\s\w]").ok());

/// Measurements of one artifact version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Characters across both fragments
    pub size: usize,
    /// Fraction of token shingles that repeat an earlier shingle
    pub duplication_ratio: f64,
    /// Branching constructs plus conditional appearance blocks
    pub complexity_score: usize,
    /// Deepest block nesting across both fragments
    pub nesting_depth: usize,
    /// Distinct identifiers referenced
    pub identifier_count: usize,
    /// 100 minus threshold penalties
    pub overall_score: u8,
}

/// Metric that can degrade between versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedMetric {
    /// [`QualityMetrics::size`]
    Size,
    /// [`QualityMetrics::duplication_ratio`]
    Duplication,
    /// [`QualityMetrics::complexity_score`]
    Complexity,
}

impl fmt::Display for TrackedMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Size => "size",
            Self::Duplication => "duplication",
            Self::Complexity => "complexity",
        })
    }
}

/// Significant growth of a metric relative to the prior accepted version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradationFlag {
    /// Metric that grew
    pub metric: TrackedMetric,
    /// Value on the prior accepted version
    pub previous: f64,
    /// Value on this version
    pub current: f64,
    /// Relative increase, e.g. `0.7` for +70%
    pub increase: f64,
}

impl fmt::Display for DegradationFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} increased significantly (+{:.0}%)",
            self.metric,
            self.increase * 100.0
        )
    }
}

/// Metrics plus degradation flags for one accepted version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Measurements of this version
    pub metrics: QualityMetrics,
    /// Metrics that grew past their ratio
    pub flags: Vec<DegradationFlag>,
    /// Measurements of the prior accepted version
    pub previous: Option<QualityMetrics>,
}

impl QualityReport {
    /// True if any flag was raised
    #[inline]
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Computes [`QualityReport`]s
#[derive(Debug, Clone, Default)]
pub struct QualityMonitor {
    config: QualityConfig,
}

impl QualityMonitor {
    /// Monitor with the given thresholds
    #[must_use]
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// Thresholds in use
    #[must_use]
    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Measure a candidate and compare it with the previous accepted version
    #[must_use]
    pub fn assess(&self, candidate: &Candidate, previous: Option<&QualityMetrics>) -> QualityReport {
        let metrics = self.measure(candidate);
        let flags = previous
            .map(|prev| self.degradation(prev, &metrics))
            .unwrap_or_default();
        for flag in &flags {
            tracing::warn!(%flag, "quality degradation");
        }
        QualityReport {
            metrics,
            flags,
            previous: previous.cloned(),
        }
    }

    /// Measure both fragments of `candidate`
    #[must_use]
    pub fn measure(&self, candidate: &Candidate) -> QualityMetrics {
        let appearance = AppearanceParser.parse(&candidate.appearance_rules);
        let behavior = BehaviorParser.parse(&candidate.behavior_instructions);

        let identifiers: BTreeSet<String> = appearance
            .identifiers()
            .into_iter()
            .chain(behavior.identifiers())
            .collect();

        let mut metrics = QualityMetrics {
            size: candidate.size(),
            duplication_ratio: duplication_ratio(
                &format!("{}\n{}", candidate.appearance_rules, candidate.behavior_instructions),
                self.config.shingle_size,
            ),
            complexity_score: behavior.branch_count() + appearance.branch_count(),
            nesting_depth: behavior.nesting_depth().max(appearance.nesting_depth()),
            identifier_count: identifiers.len(),
            overall_score: 100,
        };
        metrics.overall_score = self.score(&metrics);
        metrics
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, m: &QualityMetrics) -> u8 {
        let c = &self.config;
        let penalties = [
            penalty(m.size as f64, c.size_threshold as f64, c.size_penalty_cap),
            penalty(m.duplication_ratio, c.duplication_threshold, c.duplication_penalty_cap),
            penalty(m.complexity_score as f64, c.complexity_threshold as f64, c.complexity_penalty_cap),
            penalty(m.nesting_depth as f64, c.nesting_threshold as f64, c.nesting_penalty_cap),
            penalty(m.identifier_count as f64, c.identifier_threshold as f64, c.identifier_penalty_cap),
        ];
        let total: u32 = penalties.iter().map(|&p| u32::from(p)).sum();
        u8::try_from(100u32.saturating_sub(total)).unwrap_or(0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn degradation(&self, prev: &QualityMetrics, cur: &QualityMetrics) -> Vec<DegradationFlag> {
        let c = &self.config;
        [
            (TrackedMetric::Size, prev.size as f64, cur.size as f64, c.size_degradation),
            (
                TrackedMetric::Duplication,
                prev.duplication_ratio,
                cur.duplication_ratio,
                c.duplication_degradation,
            ),
            (
                TrackedMetric::Complexity,
                prev.complexity_score as f64,
                cur.complexity_score as f64,
                c.complexity_degradation,
            ),
        ]
        .into_iter()
        .filter_map(|(metric, previous, current, ratio)| {
            if previous <= 0.0 {
                return None;
            }
            let increase = (current - previous) / previous;
            (increase > ratio).then_some(DegradationFlag {
                metric,
                previous,
                current,
                increase,
            })
        })
        .collect()
    }
}

/// `cap × min(1, 0.5 + 0.5 × excess)` where `excess` is relative to the threshold
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn penalty(value: f64, threshold: f64, cap: u8) -> u8 {
    if value <= threshold {
        return 0;
    }
    let excess = if threshold > 0.0 {
        (value - threshold) / threshold
    } else {
        1.0
    };
    let scale = (0.5 + 0.5 * excess).min(1.0);
    (f64::from(cap) * scale).round() as u8
}

/// Fraction of `k`-token shingles that duplicate an earlier shingle
#[allow(clippy::cast_precision_loss)]
fn duplication_ratio(text: &str, k: usize) -> f64 {
    let Some(token) = TOKEN.as_ref() else {
        return 0.0;
    };
    let tokens: Vec<&str> = token.find_iter(text).map(|m| m.as_str()).collect();
    if k == 0 || tokens.len() < k {
        return 0.0;
    }
    let total = tokens.len() - k + 1;
    let distinct: HashSet<&[&str]> = tokens.windows(k).collect();
    (total - distinct.len()) as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn monitor() -> QualityMonitor {
        QualityMonitor::new(QualityConfig::default())
    }

    fn metrics_with_size(size: usize) -> QualityMetrics {
        QualityMetrics {
            size,
            ..QualityMetrics::default()
        }
    }

    #[test]
    fn size_growth_of_seventy_percent_is_flagged() {
        let flags = monitor().degradation(&metrics_with_size(1000), &metrics_with_size(1700));
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].metric, TrackedMetric::Size);
        assert_eq!(flags[0].to_string(), "size increased significantly (+70%)");
    }

    #[test]
    fn growth_within_ratio_is_not_flagged() {
        let flags = monitor().degradation(&metrics_with_size(1000), &metrics_with_size(1400));
        assert!(flags.is_empty());
    }

    #[test]
    fn zero_baseline_never_flags() {
        let flags = monitor().degradation(&metrics_with_size(0), &metrics_with_size(5000));
        assert!(flags.is_empty());
    }

    #[test]
    fn penalties_scale_and_cap() {
        assert_eq!(penalty(4000.0, 5000.0, 15), 0);
        // 10% over: 0.55 of the cap
        assert_eq!(penalty(5500.0, 5000.0, 20), 11);
        assert_eq!(penalty(20_000.0, 5000.0, 15), 15);
    }

    #[test]
    fn shingle_duplication() {
        assert!(duplication_ratio("a b c", 5).abs() < f64::EPSILON);
        let unique = duplication_ratio("one two three four five six seven", 5);
        assert!(unique.abs() < f64::EPSILON);
        let repeated = "a.classList.add('x');".repeat(4);
        assert!(duplication_ratio(&repeated, 5) > 0.5);
    }

    #[test]
    fn measures_both_fragments() {
        let candidate = Candidate::new(
            "@media (max-width: 600px) { #title { color: red; } }\n.card { margin: 0; }",
            "if (ready) { document.querySelector('#submit').disabled = false; } else { console.log(1); }",
        );
        let m = monitor().measure(&candidate);
        assert_eq!(m.size, candidate.size());
        assert_eq!(m.identifier_count, 3);
        assert!(m.complexity_score >= 2);
        assert!(m.nesting_depth >= 1);
        assert_eq!(m.overall_score, 100);
    }

    #[test]
    fn oversized_artifact_loses_score() {
        let rules: String = (0..300)
            .map(|i| format!(".item-{i} {{ padding: {i}px; }}\n"))
            .collect();
        let m = monitor().measure(&Candidate::new(rules, ""));
        assert!(m.size > 5000);
        assert!(m.identifier_count > 20);
        assert!(m.overall_score < 100);
    }

    #[test]
    fn report_keeps_previous_metrics() {
        let candidate = Candidate::new(".a { color: red; }", "");
        let m = monitor();
        let first = m.assess(&candidate, None);
        assert!(first.previous.is_none());
        assert!(!first.is_degraded());

        let second = m.assess(&candidate, Some(&first.metrics));
        assert_eq!(second.previous.as_ref(), Some(&first.metrics));
        assert!(!second.is_degraded());
    }
}
