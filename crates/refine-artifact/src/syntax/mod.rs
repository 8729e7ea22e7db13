//! Fragment grammars
//!
//! Each artifact fragment has its own grammar:
//! - appearance rules: a CSS-like block grammar ([`AppearanceParser`])
//! - behavior instructions: script parsed with tree-sitter ([`BehaviorParser`])
//!
//! Parsers produce an outline rather than a full tree. The outline carries
//! exactly what the validator and quality monitor need: referenced
//! identifiers, nesting depth, branch count and the first syntax error.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

mod appearance;
mod behavior;

pub use appearance::{AppearanceOutline, AppearanceParser, Declaration, RuleKind, StyleRule};
pub use behavior::{
    BehaviorOutline, BehaviorParser, DuplicateEffect, EffectBlock, EffectKind, IdentifierReference,
};

/// Which half of an artifact a fragment belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// Declarative appearance rules
    Appearance,
    /// Imperative behavior instructions
    Behavior,
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Appearance => f.write_str("appearance rules"),
            Self::Behavior => f.write_str("behavior instructions"),
        }
    }
}

/// A parse failure with a 1-based location
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[error("{fragment} syntax error at {line}:{column}: {message}")]
pub struct SyntaxError {
    /// Fragment the error was found in
    pub fragment: FragmentKind,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
    /// What went wrong
    pub message: String,
}

impl SyntaxError {
    pub(crate) fn new(
        fragment: FragmentKind,
        line: usize,
        column: usize,
        message: impl Into<String>,
    ) -> Self {
        Self {
            fragment,
            line,
            column,
            message: message.into(),
        }
    }
}

/// Structural summary of a parsed fragment
pub trait Outline {
    /// First syntax error, if the fragment did not parse
    fn syntax_error(&self) -> Option<&SyntaxError>;

    /// Distinct identifiers the fragment refers to
    fn identifiers(&self) -> BTreeSet<String>;

    /// Maximum block nesting depth
    fn nesting_depth(&self) -> usize;

    /// Number of branching constructs
    fn branch_count(&self) -> usize;
}

/// Parser for one fragment grammar
///
/// Parsing never fails outright: malformed input yields an outline whose
/// [`Outline::syntax_error`] is set, so callers can still read whatever
/// structure was recovered.
pub trait FragmentParser: Send + Sync {
    /// The outline type this parser produces
    type Outline: Outline;

    /// Fragment this parser handles
    fn kind(&self) -> FragmentKind;

    /// Parse source into an outline
    fn parse(&self, source: &str) -> Self::Outline;

    /// Parse and report only well-formedness
    ///
    /// # Errors
    /// Returns the first syntax error in `source`
    fn check(&self, source: &str) -> Result<(), SyntaxError> {
        match self.parse(source).syntax_error() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Convert a byte offset into a 1-based (line, column) pair
pub(crate) fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(nl) => before[nl + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}
