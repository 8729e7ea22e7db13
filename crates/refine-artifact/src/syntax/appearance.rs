//! Appearance rule grammar
//!
//! A small recursive scanner for CSS-like rules. It does not try to understand
//! property values; it only checks block structure and collects selectors.

use super::{line_col, FragmentKind, FragmentParser, Outline, SyntaxError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// At-rules whose body holds further rules
const GROUPING_AT_RULES: &[&str] = &["media", "supports", "container", "layer", "document", "scope"];

/// What a rule block contains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Ordinary selector rule
    Style,
    /// Step inside `@keyframes` (`from`, `50%`, ...)
    Keyframe,
    /// Descriptor block such as `@font-face` or `@page`
    AtRule,
}

/// `property: value` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Declaration {
    /// Property name, lowercased
    pub property: String,
    /// Raw value text
    pub value: String,
}

/// One rule block with its selectors and declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyleRule {
    /// Selector list split on top-level commas
    pub selectors: Vec<String>,
    /// Declarations in source order
    pub declarations: Vec<Declaration>,
    /// 1-based line of the rule prelude
    pub line: usize,
    /// Style, keyframe or descriptor block
    pub kind: RuleKind,
}

/// Parsed structure of an appearance fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppearanceOutline {
    /// Rule blocks in source order
    pub rules: Vec<StyleRule>,
    /// `@media` / `@supports` blocks
    pub conditional_blocks: usize,
    /// Deepest block nesting
    pub max_nesting: usize,
    /// First parse error, if any
    pub syntax_error: Option<SyntaxError>,
}

impl AppearanceOutline {
    /// Selectors of ordinary style rules, in source order
    pub fn selectors(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .filter(|r| r.kind == RuleKind::Style)
            .flat_map(|r| r.selectors.iter().map(String::as_str))
    }
}

impl Outline for AppearanceOutline {
    fn syntax_error(&self) -> Option<&SyntaxError> {
        self.syntax_error.as_ref()
    }

    fn identifiers(&self) -> BTreeSet<String> {
        self.selectors().map(str::to_owned).collect()
    }

    fn nesting_depth(&self) -> usize {
        self.max_nesting
    }

    fn branch_count(&self) -> usize {
        self.conditional_blocks
    }
}

/// Parser for appearance rules
#[derive(Debug, Clone, Copy, Default)]
pub struct AppearanceParser;

impl FragmentParser for AppearanceParser {
    type Outline = AppearanceOutline;

    fn kind(&self) -> FragmentKind {
        FragmentKind::Appearance
    }

    fn parse(&self, source: &str) -> AppearanceOutline {
        let mut scanner = Scanner::new(source);
        let result = scanner.block(Context::Root, 0, None);
        AppearanceOutline {
            rules: scanner.rules,
            conditional_blocks: scanner.conditionals,
            max_nesting: scanner.max_nesting,
            syntax_error: result.err(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Context {
    Root,
    Group,
    Keyframes,
    /// Declarations go into `rules[idx]`
    Style(usize),
}

enum Terminator {
    /// `{` at the given offset
    Open(usize),
    Semicolon,
    Close,
    Eof,
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    rules: Vec<StyleRule>,
    conditionals: usize,
    max_nesting: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            rules: Vec::new(),
            conditionals: 0,
            max_nesting: 0,
        }
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> SyntaxError {
        let (line, column) = line_col(self.src, offset);
        SyntaxError::new(FragmentKind::Appearance, line, column, message)
    }

    fn at_comment(&self) -> bool {
        self.bytes[self.pos..].starts_with(b"/*")
    }

    fn skip_comment(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        match self.src[start + 2..].find("*/") {
            Some(i) => {
                self.pos = start + 2 + i + 2;
                Ok(())
            }
            None => Err(self.error(start, "unterminated comment")),
        }
    }

    fn skip_string(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        let quote = self.bytes[start];
        self.pos += 1;
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'\\' => self.pos = (self.pos + 2).min(self.bytes.len()),
                b'\n' => break,
                b if b == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                _ => self.pos += 1,
            }
        }
        Err(self.error(start, "unterminated string"))
    }

    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        loop {
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
                self.pos += 1;
            }
            if self.pos < self.bytes.len() && self.at_comment() {
                self.skip_comment()?;
            } else {
                return Ok(());
            }
        }
    }

    /// Read up to the next `{`, `;` or `}` outside strings and parentheses.
    /// A closing `}` is left for the caller.
    fn read_item(&mut self) -> Result<(String, usize, Terminator), SyntaxError> {
        let start = self.pos;
        let mut text = String::new();
        let mut segment = self.pos;
        let mut parens = 0usize;

        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'/' if self.at_comment() => {
                    text.push_str(&self.src[segment..self.pos]);
                    text.push(' ');
                    self.skip_comment()?;
                    segment = self.pos;
                }
                b'"' | b'\'' => self.skip_string()?,
                b'(' => {
                    parens += 1;
                    self.pos += 1;
                }
                b')' => {
                    parens = parens.saturating_sub(1);
                    self.pos += 1;
                }
                b'{' => {
                    text.push_str(&self.src[segment..self.pos]);
                    let at = self.pos;
                    self.pos += 1;
                    return Ok((text, start, Terminator::Open(at)));
                }
                b';' if parens == 0 => {
                    text.push_str(&self.src[segment..self.pos]);
                    self.pos += 1;
                    return Ok((text, start, Terminator::Semicolon));
                }
                b'}' => {
                    text.push_str(&self.src[segment..self.pos]);
                    return Ok((text, start, Terminator::Close));
                }
                _ => self.pos += 1,
            }
        }
        text.push_str(&self.src[segment..]);
        Ok((text, start, Terminator::Eof))
    }

    fn block(
        &mut self,
        ctx: Context,
        depth: usize,
        opener: Option<usize>,
    ) -> Result<(), SyntaxError> {
        loop {
            self.skip_trivia()?;
            if self.pos >= self.bytes.len() {
                return match opener {
                    Some(at) => Err(self.error(at, "unclosed block")),
                    None => Ok(()),
                };
            }
            if self.bytes[self.pos] == b'}' {
                if opener.is_none() {
                    return Err(self.error(self.pos, "unexpected `}`"));
                }
                self.pos += 1;
                return Ok(());
            }

            let (raw, start, terminator) = self.read_item()?;
            let text = normalize_whitespace(&raw);
            match terminator {
                Terminator::Open(at) => self.open(ctx, depth + 1, &text, start, at)?,
                Terminator::Semicolon | Terminator::Close => self.statement(ctx, &text, start)?,
                Terminator::Eof => {
                    return Err(match opener {
                        Some(at) => self.error(at, "unclosed block"),
                        None => self.error(start, "expected `{` or `;`"),
                    })
                }
            }
        }
    }

    fn open(
        &mut self,
        ctx: Context,
        depth: usize,
        prelude: &str,
        start: usize,
        at: usize,
    ) -> Result<(), SyntaxError> {
        self.max_nesting = self.max_nesting.max(depth);

        if let Some(rest) = prelude.strip_prefix('@') {
            let name = rest
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();
            if name.ends_with("keyframes") {
                return self.block(Context::Keyframes, depth, Some(at));
            }
            if GROUPING_AT_RULES.contains(&name.as_str()) {
                self.conditionals += 1;
                return self.block(Context::Group, depth, Some(at));
            }
            let idx = self.push_rule(vec![prelude.to_owned()], start, RuleKind::AtRule);
            return self.block(Context::Style(idx), depth, Some(at));
        }

        if prelude.is_empty() {
            return Err(self.error(at, "empty selector"));
        }
        let selectors = split_selectors(prelude);
        if selectors.iter().any(String::is_empty) {
            return Err(self.error(start, "empty selector in selector list"));
        }
        let kind = if matches!(ctx, Context::Keyframes) {
            RuleKind::Keyframe
        } else {
            RuleKind::Style
        };
        let idx = self.push_rule(selectors, start, kind);
        self.block(Context::Style(idx), depth, Some(at))
    }

    fn statement(&mut self, ctx: Context, text: &str, start: usize) -> Result<(), SyntaxError> {
        if text.is_empty() || text.starts_with('@') {
            return Ok(());
        }
        let Context::Style(idx) = ctx else {
            return Err(self.error(start, format!("declaration outside of a rule: `{text}`")));
        };
        let Some((property, value)) = text.split_once(':') else {
            return Err(self.error(start, format!("declaration missing `:`: `{text}`")));
        };
        let property = property.trim();
        if property.is_empty() {
            return Err(self.error(start, "declaration missing property name"));
        }
        self.rules[idx].declarations.push(Declaration {
            property: property.to_owned(),
            value: value.trim().to_owned(),
        });
        Ok(())
    }

    fn push_rule(&mut self, selectors: Vec<String>, start: usize, kind: RuleKind) -> usize {
        let (line, _) = line_col(self.src, start);
        self.rules.push(StyleRule {
            selectors,
            declarations: Vec::new(),
            line,
            kind,
        });
        self.rules.len() - 1
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a selector list on commas that are not nested in `()`, `[]` or quotes
fn split_selectors(prelude: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for c in prelude.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(c),
            (None, '(' | '[') => depth += 1,
            (None, ')' | ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(current.trim().to_owned());
                current.clear();
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current.trim().to_owned());
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> AppearanceOutline {
        AppearanceParser.parse(src)
    }

    #[test]
    fn parses_rules_and_declarations() {
        let outline = parse(
            "/* theme */\n.btn,\n  .btn-primary { color: red; padding: 4px 8px }\n#title { font-weight: bold; }",
        );

        assert!(outline.syntax_error.is_none());
        assert_eq!(outline.rules.len(), 2);
        assert_eq!(outline.rules[0].selectors, vec![".btn", ".btn-primary"]);
        assert_eq!(outline.rules[0].line, 2);
        assert_eq!(outline.rules[0].declarations.len(), 2);
        assert_eq!(outline.rules[0].declarations[1].value, "4px 8px");
        assert_eq!(outline.max_nesting, 1);
        assert_eq!(
            outline.identifiers().into_iter().collect::<Vec<_>>(),
            vec!["#title", ".btn", ".btn-primary"]
        );
    }

    #[test]
    fn media_nests_and_keyframes_are_not_identifiers() {
        let outline = parse(
            "@import url(\"a.css\");\n@media (max-width: 600px) { .nav { display: none; } }\n@keyframes spin { from { opacity: 0 } to { opacity: 1 } }",
        );

        assert!(outline.syntax_error.is_none());
        assert_eq!(outline.max_nesting, 2);
        assert_eq!(outline.branch_count(), 1);
        assert_eq!(outline.identifiers().len(), 1);
        assert!(outline.identifiers().contains(".nav"));
        assert_eq!(
            outline.rules.iter().filter(|r| r.kind == RuleKind::Keyframe).count(),
            2
        );
    }

    #[test]
    fn semicolons_inside_parens_and_strings_do_not_split() {
        let outline = parse(
            ".icon { background: url(data:image/png;base64,AAAA); content: \"a;b\"; }",
        );
        assert!(outline.syntax_error.is_none());
        assert_eq!(outline.rules[0].declarations.len(), 2);
    }

    #[test]
    fn attribute_selector_commas_are_not_split() {
        let outline = parse("[data-x=\"a,b\"], :is(.a, .b) { color: red }");
        assert_eq!(
            outline.rules[0].selectors,
            vec!["[data-x=\"a,b\"]", ":is(.a, .b)"]
        );
    }

    #[test]
    fn unclosed_block_reports_opener() {
        let err = parse(".a { color: red; }\n.b {\n  color: blue;\n")
            .syntax_error
            .unwrap();
        assert_eq!(err.line, 2);
        assert_eq!(err.column, 4);
        assert_eq!(err.message, "unclosed block");
    }

    #[test]
    fn stray_closing_brace() {
        let err = parse(".a { color: red; }\n}").syntax_error.unwrap();
        assert_eq!((err.line, err.column), (2, 1));
        assert_eq!(err.message, "unexpected `}`");
    }

    #[test]
    fn unterminated_comment_and_string() {
        let err = parse(".a { color: red; } /* never ends").syntax_error.unwrap();
        assert_eq!(err.message, "unterminated comment");

        let err = parse(".a { content: \"open; }").syntax_error.unwrap();
        assert_eq!(err.message, "unterminated string");
    }

    #[test]
    fn declaration_without_colon() {
        let err = parse(".a {\n  color red;\n}").syntax_error.unwrap();
        assert_eq!(err.line, 2);
        assert!(err.message.starts_with("declaration missing `:`"));
    }

    #[test]
    fn empty_selectors_are_errors() {
        assert_eq!(
            parse("{ color: red }").syntax_error.unwrap().message,
            "empty selector"
        );
        assert_eq!(
            parse(".a, { color: red }").syntax_error.unwrap().message,
            "empty selector in selector list"
        );
    }

    #[test]
    fn declaration_at_top_level_is_an_error() {
        let err = parse("color: red;").syntax_error.unwrap();
        assert!(err.message.starts_with("declaration outside of a rule"));
    }

    #[test]
    fn rules_before_an_error_are_kept() {
        let outline = parse(".a { color: red }\n.b { color blue }");
        assert_eq!(outline.rules.len(), 2);
        assert!(outline.syntax_error.is_some());
    }

    #[test]
    fn empty_source_is_valid() {
        let outline = parse("  \n /* nothing */ ");
        assert!(outline.syntax_error.is_none());
        assert!(outline.rules.is_empty());
        assert!(AppearanceParser.check("").is_ok());
    }
}
