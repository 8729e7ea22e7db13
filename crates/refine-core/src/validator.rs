//! Structural validation of candidates
//!
//! Four independent checks run on every candidate and all triggered errors are
//! reported together, so one round-trip to the oracle carries every problem:
//!
//! 1. identifier existence against the index view
//! 2. syntactic well-formedness of both fragments
//! 3. non-regression (unintended removal of a large fragment)
//! 4. duplication (one effect applied to an identifier by several unguarded call sites)

use crate::config::ValidatorConfig;
use crate::types::{CheckCategory, GenerationStrategy, ValidationIssue, ValidationResult};
use refine_artifact::syntax::{AppearanceParser, BehaviorParser};
use refine_artifact::{Candidate, FragmentKind, FragmentParser, Outline};
use refine_symbol::{Identifier, IdentifierIndexView};
use regex::Regex;
use std::collections::BTreeSet;

/// Fresh candidates below this confidence produce a warning
const LOW_FRESH_CONFIDENCE: u8 = 50;

/// Everything a check needs besides the candidate itself
#[derive(Debug, Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Currently accepted fragments, if any
    pub prior: Option<&'a Candidate>,
    /// Identifier policy of the request
    pub strategy: GenerationStrategy,
    /// Identifiers the candidate may reference
    pub view: &'a IdentifierIndexView,
    /// Request text, scanned for deletion keywords
    pub request_text: &'a str,
}

/// Structural checker
#[derive(Debug, Clone)]
pub struct Validator {
    config: ValidatorConfig,
    deletion: Option<Regex>,
}

impl Validator {
    /// Validator with the given penalties
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        let deletion = deletion_pattern(&config.deletion_keywords);
        Self { config, deletion }
    }

    /// Run all four checks
    #[must_use]
    pub fn validate(&self, candidate: &Candidate, ctx: &ValidationContext<'_>) -> ValidationResult {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        let appearance = AppearanceParser.parse(&candidate.appearance_rules);
        let behavior = BehaviorParser.parse(&candidate.behavior_instructions);

        check_identifiers(
            &behavior.identifiers(),
            &appearance.identifiers(),
            ctx,
            &mut errors,
            &mut warnings,
        );

        for err in [appearance.syntax_error(), behavior.syntax_error()].into_iter().flatten() {
            errors.push(ValidationIssue::new(CheckCategory::Syntax, err.to_string()));
        }

        self.check_regression(candidate, ctx, &mut errors);

        for duplicate in behavior.unguarded_duplicates() {
            let lines: Vec<String> = duplicate.lines.iter().map(ToString::to_string).collect();
            errors.push(ValidationIssue::new(
                CheckCategory::Duplication,
                format!(
                    "identifier `{}` receives `{}` from {} unguarded effects (lines {}); \
                     guard repeated application or merge them",
                    duplicate.identifier,
                    duplicate.operation,
                    duplicate.lines.len(),
                    lines.join(", ")
                ),
            ));
        }

        let confidence = self.confidence(&errors, warnings.len());
        let result = ValidationResult {
            passed: errors.is_empty(),
            errors,
            warnings,
            confidence,
        };
        tracing::debug!(
            passed = result.passed,
            errors = result.errors.len(),
            warnings = result.warnings.len(),
            confidence = result.confidence,
            "candidate validated"
        );
        result
    }

    #[allow(clippy::cast_precision_loss)]
    fn check_regression(
        &self,
        candidate: &Candidate,
        ctx: &ValidationContext<'_>,
        errors: &mut Vec<ValidationIssue>,
    ) {
        let Some(prior) = ctx.prior else {
            return;
        };
        if ctx.strategy == GenerationStrategy::FullRewrite || self.deletion_requested(ctx.request_text) {
            return;
        }

        let pairs = [
            (FragmentKind::Appearance, &prior.appearance_rules, &candidate.appearance_rules),
            (FragmentKind::Behavior, &prior.behavior_instructions, &candidate.behavior_instructions),
        ];
        for (kind, before, after) in pairs {
            let before_len = before.trim().chars().count();
            let after_len = after.trim().chars().count();
            if before_len < self.config.regression_min_size {
                continue;
            }
            let floor = before_len as f64 * self.config.regression_fraction;
            if (after_len as f64) < floor {
                errors.push(ValidationIssue::new(
                    CheckCategory::NonRegression,
                    format!(
                        "unintended removal: {kind} shrank from {before_len} to {after_len} characters \
                         but the request does not ask for deletion"
                    ),
                ));
            }
        }
    }

    /// True if the request text explicitly asks for deletion
    #[must_use]
    pub fn deletion_requested(&self, text: &str) -> bool {
        self.deletion.as_ref().is_some_and(|re| re.is_match(text))
    }

    fn confidence(&self, errors: &[ValidationIssue], warnings: usize) -> u8 {
        let c = &self.config;
        let mut penalty: u32 = 0;
        for (category, amount) in [
            (CheckCategory::IdentifierExistence, c.identifier_penalty),
            (CheckCategory::Syntax, c.syntax_penalty),
            (CheckCategory::NonRegression, c.regression_penalty),
            (CheckCategory::Duplication, c.duplication_penalty),
        ] {
            if errors.iter().any(|e| e.category == category) {
                penalty += u32::from(amount);
            }
        }
        let warning_penalty = u32::try_from(warnings)
            .unwrap_or(u32::MAX)
            .saturating_mul(u32::from(c.warning_penalty))
            .min(u32::from(c.max_warning_penalty));
        let remaining = 100u32.saturating_sub(penalty + warning_penalty);
        u8::try_from(remaining).unwrap_or(0)
    }
}

fn check_identifiers(
    referenced: &BTreeSet<String>,
    selectors: &BTreeSet<String>,
    ctx: &ValidationContext<'_>,
    errors: &mut Vec<ValidationIssue>,
    warnings: &mut Vec<ValidationIssue>,
) {
    for raw in referenced {
        let id = Identifier::new(raw);
        if ctx.view.contains(&id) {
            continue;
        }
        if ctx.strategy == GenerationStrategy::SearchIndex && ctx.view.is_fresh(&id) {
            if let Some(confidence) = ctx.view.fresh_confidence(&id) {
                if confidence < LOW_FRESH_CONFIDENCE {
                    warnings.push(ValidationIssue::new(
                        CheckCategory::IdentifierExistence,
                        format!("new identifier `{id}` is a weak index match ({confidence}%)"),
                    ));
                }
            }
            continue;
        }
        let message = if ctx.strategy == GenerationStrategy::SearchIndex {
            format!("identifier `{id}` is neither indexed nor among the fresh candidates")
        } else {
            format!("identifier `{id}` does not exist in the identifier index")
        };
        errors.push(ValidationIssue::new(CheckCategory::IdentifierExistence, message));
    }

    for raw in selectors {
        let id = Identifier::new(raw);
        if !ctx.view.contains(&id) && !ctx.view.is_fresh(&id) {
            warnings.push(ValidationIssue::new(
                CheckCategory::IdentifierExistence,
                format!("selector `{id}` does not match any indexed identifier"),
            ));
        }
    }
}

/// Case-insensitive whole-word alternation of the deletion keywords
fn deletion_pattern(keywords: &[String]) -> Option<Regex> {
    let alternatives: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            k.split_whitespace()
                .map(regex::escape)
                .collect::<Vec<_>>()
                .join(r"\s+")
        })
        .collect();
    if alternatives.is_empty() {
        return None;
    }
    let pattern = format!(r"(?i)\b(?:{})\b", alternatives.join("|"));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(error = %e, "invalid deletion keyword pattern, regression check will never see deletions");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn view() -> IdentifierIndexView {
        IdentifierIndexView::new(["#submit", "#title", ".card"].map(Identifier::new))
    }

    fn validator() -> Validator {
        Validator::new(ValidatorConfig::default())
    }

    fn ctx<'a>(
        view: &'a IdentifierIndexView,
        prior: Option<&'a Candidate>,
        strategy: GenerationStrategy,
        request_text: &'a str,
    ) -> ValidationContext<'a> {
        ValidationContext {
            prior,
            strategy,
            view,
            request_text,
        }
    }

    #[test]
    fn clean_candidate_passes() {
        let view = view();
        let candidate = Candidate::new(
            "#submit { background: green; }",
            "document.querySelector('#submit').addEventListener('click', () => {});",
        );
        let result = validator().validate(
            &candidate,
            &ctx(&view, None, GenerationStrategy::PreserveIdentifiers, "make it green"),
        );
        assert!(result.passed);
        assert_eq!(result.confidence, 100);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn missing_identifier_is_an_error() {
        let view = view();
        let candidate = Candidate::new("", "document.querySelector('#nope').remove();");
        let result = validator().validate(
            &candidate,
            &ctx(&view, None, GenerationStrategy::PreserveIdentifiers, "x"),
        );
        assert!(!result.passed);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, CheckCategory::IdentifierExistence);
        assert!(result.errors[0].message.contains("#nope"));
        assert_eq!(result.confidence, 75);
    }

    #[test]
    fn checks_do_not_short_circuit() {
        let view = view();
        let candidate = Candidate::new(
            "#title { color red }",
            "document.querySelector('#nope').remove();\nlet x = ;",
        );
        let result = validator().validate(
            &candidate,
            &ctx(&view, None, GenerationStrategy::PreserveIdentifiers, "x"),
        );
        assert!(result.has_error(CheckCategory::IdentifierExistence));
        assert_eq!(
            result
                .errors
                .iter()
                .filter(|e| e.category == CheckCategory::Syntax)
                .count(),
            2
        );
        assert_eq!(result.confidence, 100 - 25 - 40);
    }

    #[test]
    fn search_index_accepts_fresh_candidates() {
        let view = view().with_fresh(&[
            refine_symbol::IdentifierCandidate {
                identifier: Identifier::new("#banner"),
                confidence: 90,
                entity_kind: None,
                label: "banner".into(),
            },
            refine_symbol::IdentifierCandidate {
                identifier: Identifier::new("#promo"),
                confidence: 30,
                entity_kind: None,
                label: "promo".into(),
            },
        ]);
        let candidate = Candidate::new(
            "",
            "document.querySelector('#banner').hidden = false;\nif (ok) { document.querySelector('#promo').hidden = true; }",
        );

        let search = validator().validate(
            &candidate,
            &ctx(&view, None, GenerationStrategy::SearchIndex, "add a banner"),
        );
        assert!(search.passed);
        assert_eq!(search.warnings.len(), 1);
        assert!(search.warnings[0].message.contains("#promo"));
        assert_eq!(search.confidence, 98);

        let preserve = validator().validate(
            &candidate,
            &ctx(&view, None, GenerationStrategy::PreserveIdentifiers, "add a banner"),
        );
        assert!(!preserve.passed);
    }

    fn large_prior() -> Candidate {
        Candidate::new(
            "",
            "if (window.ready) { document.querySelector('#title').textContent = 'Hello there'; }\n".repeat(4),
        )
    }

    #[test]
    fn unintended_removal_is_flagged() {
        let view = view();
        let prior = large_prior();
        let candidate = Candidate::new("", "console.log('x');");

        let result = validator().validate(
            &candidate,
            &ctx(&view, Some(&prior), GenerationStrategy::PreserveIdentifiers, "make the title bold"),
        );
        assert!(result.has_error(CheckCategory::NonRegression));
        assert!(result.errors[0].message.contains("behavior instructions shrank"));
    }

    #[test]
    fn requested_deletion_and_full_rewrite_skip_regression() {
        let view = view();
        let prior = large_prior();
        let candidate = Candidate::new("", "console.log('x');");
        let v = validator();

        let deletion = v.validate(
            &candidate,
            &ctx(&view, Some(&prior), GenerationStrategy::PreserveIdentifiers, "Please REMOVE the greeting"),
        );
        assert!(deletion.passed);

        let rewrite = v.validate(
            &candidate,
            &ctx(&view, Some(&prior), GenerationStrategy::FullRewrite, "start over"),
        );
        assert!(rewrite.passed);
    }

    #[test]
    fn deletion_keywords_match_whole_words() {
        let v = validator();
        assert!(v.deletion_requested("get  rid of the banner"));
        assert!(v.deletion_requested("Delete it"));
        assert!(!v.deletion_requested("the removed items list should be blue"));
        assert!(!v.deletion_requested("make it undeleteable"));
    }

    #[test]
    fn repeated_insertions_inside_a_wrapper_are_flagged() {
        let view = view();
        let candidate = Candidate::new(
            "",
            "document.addEventListener('DOMContentLoaded', () => {\n\
               document.querySelector('.card').appendChild(document.createElement('p'));\n\
               document.querySelector('.card').appendChild(document.createElement('p'));\n\
             });",
        );
        let result = validator().validate(
            &candidate,
            &ctx(&view, None, GenerationStrategy::PreserveIdentifiers, "x"),
        );
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].category, CheckCategory::Duplication);
        assert!(result.errors[0].message.contains("`.card` receives `appendChild`"));
        assert!(result.errors[0].message.contains("lines 2, 3"));
        assert_eq!(result.confidence, 85);
    }

    #[test]
    fn repeated_writes_to_one_identifier_pass() {
        let view = view();
        let candidate = Candidate::new(
            "",
            "document.querySelector('#title').textContent = 'Hello';\n\
             document.querySelector('#title').style.color = 'red';",
        );
        let result = validator().validate(
            &candidate,
            &ctx(&view, None, GenerationStrategy::PreserveIdentifiers, "x"),
        );
        assert!(result.passed, "{:?}", result.errors);
        assert_eq!(result.confidence, 100);
    }

    #[test]
    fn warning_penalty_is_capped() {
        let view = view();
        let rules: String = (0..8).map(|i| format!(".unknown-{i} {{ color: red; }}\n")).collect();
        let result = validator().validate(
            &Candidate::new(rules, ""),
            &ctx(&view, None, GenerationStrategy::PreserveIdentifiers, "x"),
        );
        assert!(result.passed);
        assert_eq!(result.warnings.len(), 8);
        assert_eq!(result.confidence, 90);
    }
}
