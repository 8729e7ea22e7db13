//! Behavior instruction grammar
//!
//! Behavior fragments are parsed with tree-sitter using the TypeScript grammar,
//! which accepts everything a plain script can contain. The outline records
//! which surface identifiers the script looks up, which effects it applies to
//! them and whether a conditional encloses each effect, and where the first
//! parse error is.
//!
//! An effect is a call site that changes the surface each time it runs:
//! inserting content, registering a listener, toggling state, or appending to
//! markup with `+=`. Lookups and plain property writes are idempotent and are
//! not effects.

use super::{line_col, FragmentKind, FragmentParser, Outline, SyntaxError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tree_sitter::Node;

/// Lookup calls whose first string argument is used as a selector verbatim
const SELECTOR_CALLS: &[&str] = &["querySelector", "querySelectorAll", "closest", "matches", "$", "jQuery"];

const INSERTION_CALLS: &[&str] = &[
    "appendChild",
    "append",
    "prepend",
    "insertBefore",
    "insertAdjacentHTML",
    "insertAdjacentElement",
    "insertAdjacentText",
    "after",
    "before",
    "insertRow",
    "insertCell",
];

const LISTENER_CALLS: &[&str] = &["addEventListener", "on"];

const MUTATION_CALLS: &[&str] = &["toggle"];

/// Markup properties where `+=` accumulates content
const MARKUP_PROPERTIES: &[&str] = &["innerHTML", "outerHTML", "textContent", "innerText"];

const LOOP_KINDS: &[&str] = &[
    "for_statement",
    "for_in_statement",
    "while_statement",
    "do_statement",
    "switch_case",
    "catch_clause",
];

/// An identifier lookup found in the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierReference {
    /// Selector as written, `#id` and `.class` for the by-id and by-class lookups
    pub identifier: String,
    /// 1-based line of the selector argument
    pub line: usize,
    /// 1-based column of the selector argument
    pub column: usize,
}

/// What an effect does to its target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Adds nodes or markup
    Insertion,
    /// Registers an event handler
    Listener,
    /// Flips or accumulates state
    Mutation,
}

/// An effectful call site, at any depth of the script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectBlock {
    /// Position among the script's effects, in source order
    pub index: usize,
    /// 1-based line of the call site
    pub line: usize,
    /// Category of the effect
    pub kind: EffectKind,
    /// Method name, with the event name for listeners (`addEventListener:click`)
    pub operation: String,
    /// True if an `if`, ternary branch or `&&`/`||` operand encloses the effect
    pub guarded: bool,
    /// Surface identifiers the effect is applied to
    pub identifiers: BTreeSet<String>,
}

/// The same operation applied to one identifier by several unguarded effects
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateEffect {
    /// Target of the repeated effect
    pub identifier: String,
    /// Operation as recorded on each [`EffectBlock`]
    pub operation: String,
    /// Lines of the repeated call sites
    pub lines: Vec<usize>,
}

/// Parsed structure of a behavior fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BehaviorOutline {
    /// Identifier lookups in source order
    pub references: Vec<IdentifierReference>,
    /// Effects in source order
    pub effect_blocks: Vec<EffectBlock>,
    /// Conditionals, short-circuit operators and loops
    pub branch_count: usize,
    /// Deepest block nesting
    pub max_nesting: usize,
    /// First parse error, if any
    pub syntax_error: Option<SyntaxError>,
}

impl BehaviorOutline {
    /// Operations applied to the same identifier by more than one unguarded effect
    #[must_use]
    pub fn unguarded_duplicates(&self) -> Vec<DuplicateEffect> {
        let mut sites: BTreeMap<(&str, &str), Vec<usize>> = BTreeMap::new();
        for block in self.effect_blocks.iter().filter(|b| !b.guarded) {
            for id in &block.identifiers {
                sites
                    .entry((id.as_str(), block.operation.as_str()))
                    .or_default()
                    .push(block.line);
            }
        }
        sites
            .into_iter()
            .filter(|(_, lines)| lines.len() > 1)
            .map(|((identifier, operation), lines)| DuplicateEffect {
                identifier: identifier.to_owned(),
                operation: operation.to_owned(),
                lines,
            })
            .collect()
    }
}

impl Outline for BehaviorOutline {
    fn syntax_error(&self) -> Option<&SyntaxError> {
        self.syntax_error.as_ref()
    }

    fn identifiers(&self) -> BTreeSet<String> {
        self.references.iter().map(|r| r.identifier.clone()).collect()
    }

    fn nesting_depth(&self) -> usize {
        self.max_nesting
    }

    fn branch_count(&self) -> usize {
        self.branch_count
    }
}

/// Parser for behavior instructions
#[derive(Debug, Clone, Copy, Default)]
pub struct BehaviorParser;

impl FragmentParser for BehaviorParser {
    type Outline = BehaviorOutline;

    fn kind(&self) -> FragmentKind {
        FragmentKind::Behavior
    }

    fn parse(&self, source: &str) -> BehaviorOutline {
        let mut parser = tree_sitter::Parser::new();
        if let Err(e) = parser.set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()) {
            return failed(format!("grammar unavailable: {e}"));
        }
        let Some(tree) = parser.parse(source, None) else {
            return failed("parser returned no tree".to_owned());
        };

        let root = tree.root_node();
        let mut walker = Walker {
            source,
            outline: BehaviorOutline::default(),
            bindings: HashMap::new(),
        };
        walker.visit(root, 0, false);

        if root.has_error() {
            walker.outline.syntax_error = Some(locate_error(root, source));
        }
        walker.outline
    }
}

fn failed(message: String) -> BehaviorOutline {
    BehaviorOutline {
        syntax_error: Some(SyntaxError::new(FragmentKind::Behavior, 1, 1, message)),
        ..BehaviorOutline::default()
    }
}

struct Walker<'s> {
    source: &'s str,
    outline: BehaviorOutline,
    /// Variables holding the result of a lookup, by name
    bindings: HashMap<&'s str, BTreeSet<String>>,
}

impl<'s> Walker<'s> {
    fn visit(&mut self, node: Node<'_>, depth: usize, guarded: bool) {
        let mut depth = depth;
        match node.kind() {
            "statement_block" | "switch_body" => {
                depth += 1;
                self.outline.max_nesting = self.outline.max_nesting.max(depth);
            }
            "if_statement" | "ternary_expression" => {
                self.outline.branch_count += 1;
                self.visit_conditional(node, "condition", depth, guarded);
                return;
            }
            "binary_expression" => match operator(node) {
                Some("&&" | "||") => {
                    self.outline.branch_count += 1;
                    self.visit_conditional(node, "left", depth, guarded);
                    return;
                }
                Some("??") => self.outline.branch_count += 1,
                _ => {}
            },
            "call_expression" => {
                self.reference(node);
                self.effect_call(node, guarded);
            }
            "augmented_assignment_expression" => self.markup_append(node, guarded),
            "variable_declarator" => self.bind(node, "name", "value"),
            "assignment_expression" => self.bind(node, "left", "right"),
            kind if LOOP_KINDS.contains(&kind) => self.outline.branch_count += 1,
            _ => {}
        }

        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                self.visit(child, depth, guarded);
            }
        }
    }

    /// Visit a conditional; every child except the tested one is guarded
    fn visit_conditional(&mut self, node: Node<'_>, tested: &str, depth: usize, guarded: bool) {
        let tested = node.child_by_field_name(tested).map(|n| n.id());
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                let enclosed = guarded || tested != Some(child.id());
                self.visit(child, depth, enclosed);
            }
        }
    }

    fn reference(&mut self, call: Node<'_>) {
        let Some((identifier, argument)) = self.lookup(call) else {
            return;
        };
        let (line, column) = line_col(self.source, argument.start_byte());
        self.outline.references.push(IdentifierReference {
            identifier,
            line,
            column,
        });
    }

    /// Selector looked up by `call` and the argument it came from
    fn lookup<'t>(&self, call: Node<'t>) -> Option<(String, Node<'t>)> {
        let name = call.child_by_field_name("function").and_then(|f| self.callee(f))?;
        let argument = call.child_by_field_name("arguments").and_then(first_argument)?;
        let literal = self.literal(argument)?;

        let identifier = match name {
            "getElementById" => format!("#{}", literal.trim()),
            "getElementsByClassName" => literal
                .split_whitespace()
                .map(|class| format!(".{class}"))
                .collect(),
            n if SELECTOR_CALLS.contains(&n) => literal.split_whitespace().collect::<Vec<_>>().join(" "),
            _ => return None,
        };
        if identifier.is_empty() || identifier == "#" {
            return None;
        }
        Some((identifier, argument))
    }

    /// Every selector looked up anywhere under `node`
    fn lookups(&self, node: Node<'_>) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        if node.kind() == "call_expression" {
            if let Some((identifier, _)) = self.lookup(node) {
                found.insert(identifier);
            }
        }
        for i in 0..node.named_child_count() {
            if let Some(child) = node.named_child(i) {
                found.extend(self.lookups(child));
            }
        }
        found
    }

    /// Remember `name = <lookup>` so later effects on `name` resolve to the selector
    fn bind(&mut self, node: Node<'_>, name: &str, value: &str) {
        let source = self.source;
        let Some(name) = node
            .child_by_field_name(name)
            .filter(|n| n.kind() == "identifier")
            .and_then(|n| n.utf8_text(source.as_bytes()).ok())
        else {
            return;
        };
        let found = node
            .child_by_field_name(value)
            .map(|v| self.lookups(v))
            .unwrap_or_default();
        if found.is_empty() {
            self.bindings.remove(name);
        } else {
            self.bindings.insert(name, found);
        }
    }

    /// Identifiers an effect on `receiver` is applied to
    fn targets(&self, receiver: Node<'_>) -> BTreeSet<String> {
        let found = self.lookups(receiver);
        if !found.is_empty() {
            return found;
        }
        root_identifier(receiver)
            .and_then(|n| n.utf8_text(self.source.as_bytes()).ok())
            .and_then(|name| self.bindings.get(name))
            .cloned()
            .unwrap_or_default()
    }

    fn effect_call(&mut self, call: Node<'_>, guarded: bool) {
        let source = self.source;
        let Some(function) = call
            .child_by_field_name("function")
            .filter(|f| f.kind() == "member_expression")
        else {
            return;
        };
        let Some(method) = function
            .child_by_field_name("property")
            .and_then(|p| p.utf8_text(source.as_bytes()).ok())
        else {
            return;
        };
        let kind = if INSERTION_CALLS.contains(&method) {
            EffectKind::Insertion
        } else if LISTENER_CALLS.contains(&method) {
            EffectKind::Listener
        } else if MUTATION_CALLS.contains(&method) {
            EffectKind::Mutation
        } else {
            return;
        };

        let event = (kind == EffectKind::Listener)
            .then(|| call.child_by_field_name("arguments").and_then(first_argument))
            .flatten()
            .and_then(|a| self.literal(a));
        let operation = match event {
            Some(event) => format!("{method}:{event}"),
            None => method.to_owned(),
        };
        let identifiers = function
            .child_by_field_name("object")
            .map(|o| self.targets(o))
            .unwrap_or_default();
        self.push_effect(call, kind, operation, guarded, identifiers);
    }

    fn markup_append(&mut self, node: Node<'_>, guarded: bool) {
        let source = self.source;
        if operator(node) != Some("+=") {
            return;
        }
        let Some(left) = node
            .child_by_field_name("left")
            .filter(|l| l.kind() == "member_expression")
        else {
            return;
        };
        let Some(property) = left
            .child_by_field_name("property")
            .and_then(|p| p.utf8_text(source.as_bytes()).ok())
            .filter(|p| MARKUP_PROPERTIES.contains(p))
        else {
            return;
        };
        let identifiers = left
            .child_by_field_name("object")
            .map(|o| self.targets(o))
            .unwrap_or_default();
        self.push_effect(node, EffectKind::Mutation, format!("{property} +="), guarded, identifiers);
    }

    fn push_effect(
        &mut self,
        node: Node<'_>,
        kind: EffectKind,
        operation: String,
        guarded: bool,
        identifiers: BTreeSet<String>,
    ) {
        self.outline.effect_blocks.push(EffectBlock {
            index: self.outline.effect_blocks.len(),
            line: node.start_position().row + 1,
            kind,
            operation,
            guarded,
            identifiers,
        });
    }

    /// Name of the called function, or of the method for `a.b(...)`
    fn callee(&self, function: Node<'_>) -> Option<&'s str> {
        let source = self.source;
        let name_node = match function.kind() {
            "identifier" => function,
            "member_expression" => function.child_by_field_name("property")?,
            _ => return None,
        };
        name_node.utf8_text(source.as_bytes()).ok()
    }

/// Contents of a string or substitution-free template literal
    fn literal(&self, node: Node<'_>) -> Option<String> {
        match node.kind() {
            "string" => {}
            "template_string" => {
                for i in 0..node.named_child_count() {
                    if node.named_child(i)?.kind() == "template_substitution" {
                        return None;
                    }
                }
            }
            _ => return None,
        }
        let text = node.utf8_text(self.source.as_bytes()).ok()?;
        let mut chars = text.chars();
        chars.next();
        chars.next_back();
        Some(chars.as_str().to_owned())
    }
}

fn operator(node: Node<'_>) -> Option<&'static str> {
    node.child_by_field_name("operator").map(|op| op.kind())
}

/// The variable at the base of a member or call chain
fn root_identifier(node: Node<'_>) -> Option<Node<'_>> {
    let mut node = node;
    loop {
        node = match node.kind() {
            "identifier" => return Some(node),
            "member_expression" | "subscript_expression" => node.child_by_field_name("object")?,
            "call_expression" => node.child_by_field_name("function")?,
            "parenthesized_expression" | "non_null_expression" => node.named_child(0)?,
            _ => return None,
        };
    }
}

fn first_argument<'t>(arguments: Node<'t>) -> Option<Node<'t>> {
    for i in 0..arguments.named_child_count() {
        if let Some(child) = arguments.named_child(i) {
            if child.kind() != "comment" {
                return Some(child);
            }
        }
    }
    None
}

/// Locate the first MISSING node, else the first ERROR node, in source order
fn locate_error(root: Node<'_>, source: &str) -> SyntaxError {
    if let Some(missing) = first_matching(root, &|n| n.is_missing()) {
        let (line, column) = line_col(source, missing.start_byte());
        return SyntaxError::new(
            FragmentKind::Behavior,
            line,
            column,
            format!("missing `{}`", missing.kind()),
        );
    }
    if let Some(error) = first_matching(root, &|n| n.is_error()) {
        let (line, column) = line_col(source, error.start_byte());
        let snippet: String = error
            .utf8_text(source.as_bytes())
            .unwrap_or("")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(24)
            .collect();
        let message = if snippet.is_empty() {
            "unexpected input".to_owned()
        } else {
            format!("unexpected `{snippet}`")
        };
        return SyntaxError::new(FragmentKind::Behavior, line, column, message);
    }
    SyntaxError::new(FragmentKind::Behavior, 1, 1, "unparseable input")
}

fn first_matching<'t>(node: Node<'t>, pred: &dyn Fn(&Node<'t>) -> bool) -> Option<Node<'t>> {
    if pred(&node) {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            if let Some(found) = first_matching(child, pred) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> BehaviorOutline {
        BehaviorParser.parse(src)
    }

    #[test]
    fn collects_references_effects_and_guards() {
        let outline = parse(
            "const btn = document.querySelector('#submit');\n\
             if (btn) {\n\
               btn.addEventListener('click', () => {\n\
                 document.getElementById('status').textContent = 'sent';\n\
               });\n\
             }\n",
        );

        assert!(outline.syntax_error.is_none());
        assert_eq!(outline.effect_blocks.len(), 1);
        let effect = &outline.effect_blocks[0];
        assert_eq!(effect.kind, EffectKind::Listener);
        assert_eq!(effect.operation, "addEventListener:click");
        assert_eq!(effect.line, 3);
        assert!(effect.guarded);
        assert_eq!(effect.identifiers.iter().collect::<Vec<_>>(), vec!["#submit"]);
        assert_eq!(
            outline.identifiers().into_iter().collect::<Vec<_>>(),
            vec!["#status", "#submit"]
        );
        assert_eq!(outline.references[0].line, 1);
        assert_eq!(outline.branch_count, 1);
        assert_eq!(outline.max_nesting, 2);
    }

    #[test]
    fn repeated_insertions_inside_a_wrapper_are_duplicates() {
        let outline = parse(
            "document.addEventListener('DOMContentLoaded', () => {\n\
               const list = document.querySelector('#list');\n\
               list.appendChild(document.createElement('li'));\n\
               document.querySelector('#list').appendChild(document.createElement('li'));\n\
             });\n",
        );
        assert_eq!(
            outline.unguarded_duplicates(),
            vec![DuplicateEffect {
                identifier: "#list".into(),
                operation: "appendChild".into(),
                lines: vec![3, 4],
            }]
        );
    }

    #[test]
    fn idempotent_writes_are_not_effects() {
        let outline = parse(
            "document.querySelector('#title').textContent = 'Hello';\n\
             document.querySelector('#title').style.color = 'red';\n\
             document.querySelector('.card').classList.add('shown');\n\
             document.querySelector('.card').classList.add('wide');\n",
        );
        assert!(outline.effect_blocks.is_empty());
        assert!(outline.unguarded_duplicates().is_empty());
    }

    #[test]
    fn enclosing_conditionals_guard_effects() {
        let outline = parse(
            "const card = document.querySelector('.card');\n\
             card.append('a');\n\
             ready && card.append('b');\n\
             card.dataset.open ? card.prepend('c') : card.append('d');\n\
             if (!card.dataset.done) { card.append('e'); }\n",
        );
        let guarded: Vec<bool> = outline.effect_blocks.iter().map(|b| b.guarded).collect();
        assert_eq!(guarded, vec![false, true, true, true, true]);
        assert!(outline.unguarded_duplicates().is_empty());
        assert_eq!(outline.branch_count, 3);
    }

    #[test]
    fn listeners_are_keyed_by_event() {
        let outline = parse(
            "const btn = document.getElementById('submit');\n\
             btn.addEventListener('click', send);\n\
             btn.addEventListener('keydown', send);\n\
             btn.addEventListener('click', track);\n",
        );
        let duplicates = outline.unguarded_duplicates();
        assert_eq!(duplicates.len(), 1);
        assert_eq!(duplicates[0].identifier, "#submit");
        assert_eq!(duplicates[0].operation, "addEventListener:click");
        assert_eq!(duplicates[0].lines, vec![2, 4]);
    }

    #[test]
    fn markup_appends_are_mutations() {
        let outline = parse(
            "const log = $('#log');\n\
             log[0].innerHTML += '<p>one</p>';\n\
             document.querySelector('#log').innerHTML += '<p>two</p>';\n\
             document.querySelector('#log').innerHTML = '';\n",
        );
        assert_eq!(outline.effect_blocks.len(), 2);
        assert_eq!(outline.effect_blocks[0].kind, EffectKind::Mutation);
        assert_eq!(outline.unguarded_duplicates()[0].operation, "innerHTML +=");
    }

    #[test]
    fn effects_on_untracked_receivers_have_no_targets() {
        let outline = parse("const items = [];\nitems.append(1);\nitems.append(2);\n");
        assert_eq!(outline.effect_blocks.len(), 2);
        assert!(outline.effect_blocks[0].identifiers.is_empty());
        assert!(outline.unguarded_duplicates().is_empty());
    }

    #[test]
    fn lookup_variants() {
        let outline = parse(
            "document.getElementsByClassName('nav item');\n\
             $('.menu');\n\
             jQuery(\"#x\");\n\
             document.querySelector(`#tpl`);\n\
             document.querySelector(`#${id}`);\n\
             document.querySelector(selector);\n",
        );
        assert!(outline.syntax_error.is_none());
        assert_eq!(
            outline.identifiers().into_iter().collect::<Vec<_>>(),
            vec!["#tpl", "#x", ".menu", ".nav.item"]
        );
    }

    #[test]
    fn loops_count_as_branches() {
        let outline = parse(
            "for (const el of document.querySelectorAll('.row')) {\n  while (false) {}\n}\n",
        );
        assert_eq!(outline.branch_count, 2);
        assert_eq!(outline.max_nesting, 2);
    }

    #[test]
    fn syntax_error_is_located() {
        let outline = parse("const ok = 1;\nconst = ;\n");
        let err = outline.syntax_error.expect("should fail");
        assert_eq!(err.fragment, FragmentKind::Behavior);
        assert_eq!(err.line, 2);
        assert!(BehaviorParser.check("const ok = 1;\nconst = ;\n").is_err());
    }

    #[test]
    fn empty_source_is_valid() {
        let outline = parse("");
        assert!(outline.syntax_error.is_none());
        assert!(outline.effect_blocks.is_empty());
    }
}
