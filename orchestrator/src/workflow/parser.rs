//! Instruction document parser
//!
//! Workflow instructions are markdown documents with embedded tags:
//! `<step n="1" goal="...">` blocks holding `<action>`, `<check if="...">`,
//! `<ask>`, `<output>`, `<template-output>`, `<elicit-required>`,
//! `<goto step="N">`, `<invoke-workflow path="...">` and
//! `<invoke-task path="...">`.
//!
//! This is a tolerant structural scan rather than an XML parser: stray `<`
//! characters in prose are ignored, attribute values may contain `>`, and
//! unknown tags inside a step become raw `action` content instead of being
//! dropped.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use super::types::{Action, ActionKind, Check, Step};
use crate::error::ParseError;

/// Tags that must always be closed (or self-closed)
const KNOWN_TAGS: &[&str] = &[
    "step",
    "check",
    "action",
    "ask",
    "output",
    "template-output",
    "elicit-required",
    "goto",
    "invoke-workflow",
    "invoke-task",
];

/// Parse an instruction document into its ordered steps.
///
/// Steps must be numbered 1, 2, 3, ... in document order.
pub fn parse(document: &str) -> Result<Vec<Step>, ParseError> {
    let mut steps = Vec::new();
    collect_steps(document, document, 0, &mut steps)?;

    if steps.is_empty() {
        return Err(ParseError::new(1, "no <step> tags found"));
    }

    for (index, step) in steps.iter().enumerate() {
        let expected = index as u32 + 1;
        if step.number != expected {
            return Err(ParseError::new(
                step.line,
                format!(
                    "non-sequential step number: expected {}, found {}",
                    expected, step.number
                ),
            ));
        }
    }

    tracing::debug!(steps = steps.len(), "Parsed instruction document");
    Ok(steps)
}

// ============================================================================
// Structural scan
// ============================================================================

/// A tag found by the scanner. Offsets are absolute within the document.
#[derive(Debug)]
struct Element<'a> {
    name: &'a str,
    attrs: HashMap<String, String>,
    inner: &'a str,
    inner_offset: usize,
    raw: &'a str,
    offset: usize,
}

fn line_at(document: &str, offset: usize) -> usize {
    document[..offset.min(document.len())].matches('\n').count() + 1
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Index of the `>` ending a tag head, skipping quoted attribute values.
///
/// Quotes only open right after `=`, so apostrophes in prose that merely
/// looks like a tag cannot swallow the rest of the document.
fn find_tag_end(text: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut after_equals = false;
    for (i, c) in text[from..].char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' if after_equals => quote = Some(c),
            '>' => return Some(from + i),
            '<' => return None,
            _ => {}
        }
        if !c.is_whitespace() {
            after_equals = c == '=';
        }
    }
    None
}

/// Position of the next `<name` opening tag at or after `from`
fn find_open(text: &str, name: &str, from: usize) -> Option<usize> {
    let needle = format!("<{}", name);
    let mut pos = from;
    while let Some(rel) = text[pos..].find(&needle) {
        let start = pos + rel;
        let after = start + needle.len();
        match text[after..].chars().next() {
            Some(c) if is_name_char(c) => pos = after,
            Some(_) => return Some(start),
            None => return None,
        }
    }
    None
}

/// Start and end (exclusive) of the next `</name>` at or after `from`
fn find_close(text: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let needle = format!("</{}", name);
    let mut pos = from;
    while let Some(rel) = text[pos..].find(&needle) {
        let start = pos + rel;
        let after = start + needle.len();
        let rest = &text[after..];
        let trimmed = rest.trim_start();
        if trimmed.starts_with('>') {
            let end = after + (rest.len() - trimmed.len()) + 1;
            return Some((start, end));
        }
        pos = after;
    }
    None
}

/// Find the matching close tag for an element whose body starts at `from`,
/// honouring nested elements of the same name.
fn find_matching_close(text: &str, name: &str, from: usize) -> Option<(usize, usize)> {
    let mut depth = 1usize;
    let mut pos = from;
    loop {
        let close = find_close(text, name, pos)?;
        match find_open(text, name, pos) {
            Some(open) if open < close.0 => {
                let head_end = find_tag_end(text, open + name.len() + 1)?;
                if !text[..head_end].ends_with('/') {
                    depth += 1;
                }
                pos = head_end + 1;
            }
            _ => {
                depth -= 1;
                if depth == 0 {
                    return Some(close);
                }
                pos = close.1;
            }
        }
    }
}

fn attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"([A-Za-z_][\w-]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}

fn decode_entities(value: &str) -> String {
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Parse `key="value"` pairs plus bare flags (`optional` → "true")
fn parse_attrs(head: &str) -> HashMap<String, String> {
    let mut attrs = HashMap::new();
    let mut rest = String::with_capacity(head.len());
    let mut last = 0;

    for caps in attr_regex().captures_iter(head) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or("");
        attrs.insert(key.as_str().to_string(), decode_entities(value));
        rest.push_str(&head[last..whole.start()]);
        rest.push(' ');
        last = whole.end();
    }
    rest.push_str(&head[last..]);

    for flag in rest.split_whitespace() {
        if flag.chars().all(is_name_char) {
            attrs
                .entry(flag.to_string())
                .or_insert_with(|| "true".to_string());
        }
    }

    attrs
}

/// Scan the direct child elements of `text` (located at `base` in `document`)
fn scan<'a>(document: &str, text: &'a str, base: usize) -> Result<Vec<Element<'a>>, ParseError> {
    let mut elements = Vec::new();
    let mut pos = 0;

    while let Some(rel) = text[pos..].find('<') {
        let start = pos + rel;
        let after = &text[start + 1..];

        if after.starts_with("!--") {
            pos = match text[start..].find("-->") {
                Some(end) => start + end + 3,
                None => text.len(),
            };
            continue;
        }

        if !after.starts_with(|c: char| c.is_ascii_alphabetic()) {
            pos = start + 1;
            continue;
        }

        let name_len = after.find(|c: char| !is_name_char(c)).unwrap_or(after.len());
        let name = &after[..name_len];
        let known = KNOWN_TAGS.contains(&name);
        let head_start = start + 1 + name_len;

        let Some(head_end) = find_tag_end(text, head_start) else {
            if known {
                return Err(ParseError::new(
                    line_at(document, base + start),
                    format!("unterminated <{}> tag", name),
                ));
            }
            pos = start + 1;
            continue;
        };

        let head = text[head_start..head_end].trim_end();
        let self_closing = head.ends_with('/');
        let attrs = parse_attrs(head.trim_end_matches('/'));
        let body_start = head_end + 1;

        if self_closing {
            elements.push(Element {
                name,
                attrs,
                inner: "",
                inner_offset: base + body_start,
                raw: &text[start..body_start],
                offset: base + start,
            });
            pos = body_start;
            continue;
        }

        match find_matching_close(text, name, body_start) {
            Some((inner_end, close_end)) => {
                elements.push(Element {
                    name,
                    attrs,
                    inner: &text[body_start..inner_end],
                    inner_offset: base + body_start,
                    raw: &text[start..close_end],
                    offset: base + start,
                });
                pos = close_end;
            }
            None if known => {
                return Err(ParseError::new(
                    line_at(document, base + start),
                    format!("unclosed <{}> tag", name),
                ));
            }
            None => {
                elements.push(Element {
                    name,
                    attrs,
                    inner: "",
                    inner_offset: base + body_start,
                    raw: &text[start..body_start],
                    offset: base + start,
                });
                pos = body_start;
            }
        }
    }

    Ok(elements)
}

// ============================================================================
// Step and block extraction
// ============================================================================

fn collect_steps(
    document: &str,
    text: &str,
    base: usize,
    steps: &mut Vec<Step>,
) -> Result<(), ParseError> {
    for element in scan(document, text, base)? {
        if element.name == "step" {
            steps.push(parse_step(document, &element)?);
        } else if !element.inner.is_empty() {
            // Wrapper tags such as <workflow> may hold the steps
            collect_steps(document, element.inner, element.inner_offset, steps)?;
        }
    }
    Ok(())
}

fn flag(attrs: &HashMap<String, String>, key: &str) -> bool {
    attrs
        .get(key)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "1"))
        .unwrap_or(false)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_step(document: &str, element: &Element<'_>) -> Result<Step, ParseError> {
    let line = line_at(document, element.offset);
    let raw_number = element
        .attrs
        .get("n")
        .ok_or_else(|| ParseError::new(line, "<step> is missing its n attribute"))?;
    let number: u32 = raw_number
        .trim()
        .parse()
        .map_err(|_| ParseError::new(line, format!("invalid step number '{}'", raw_number)))?;

    let (actions, checks) = parse_block(document, element.inner, element.inner_offset)?;

    Ok(Step {
        number,
        goal: element.attrs.get("goal").cloned().unwrap_or_default(),
        content: element.inner.trim().to_string(),
        optional: flag(&element.attrs, "optional"),
        critical: flag(&element.attrs, "critical"),
        agent: non_empty(element.attrs.get("agent")),
        actions,
        checks,
        line,
    })
}

fn parse_block(
    document: &str,
    text: &str,
    base: usize,
) -> Result<(Vec<Action>, Vec<Check>), ParseError> {
    let mut actions = Vec::new();
    let mut checks = Vec::new();

    for element in scan(document, text, base)? {
        let line = line_at(document, element.offset);
        match element.name {
            "step" => {
                return Err(ParseError::new(line, "<step> tags cannot be nested"));
            }
            "check" => {
                let condition = non_empty(element.attrs.get("if"))
                    .ok_or_else(|| ParseError::new(line, "<check> is missing its if attribute"))?;
                let (nested_actions, nested_checks) =
                    parse_block(document, element.inner, element.inner_offset)?;
                checks.push(Check {
                    condition,
                    actions: nested_actions,
                    checks: nested_checks,
                    line,
                });
            }
            _ => actions.push(parse_action(&element, line)?),
        }
    }

    Ok((actions, checks))
}

fn parse_action(element: &Element<'_>, line: usize) -> Result<Action, ParseError> {
    let content = element.inner.trim().to_string();
    let attrs = &element.attrs;

    let kind = match element.name {
        "action" => ActionKind::Action {
            var: non_empty(attrs.get("var")),
        },
        "ask" => ActionKind::Ask {
            var: non_empty(attrs.get("var")),
            default: attrs.get("default").cloned(),
        },
        "output" => ActionKind::Output,
        "template-output" => ActionKind::TemplateOutput,
        "elicit-required" => ActionKind::ElicitRequired {
            var: non_empty(attrs.get("var")),
            default: attrs.get("default").cloned(),
        },
        "goto" => {
            let raw = non_empty(attrs.get("step"))
                .or_else(|| Some(content.clone()).filter(|c| !c.is_empty()))
                .ok_or_else(|| ParseError::new(line, "<goto> is missing its step attribute"))?;
            let target = raw
                .parse()
                .map_err(|_| ParseError::new(line, format!("invalid goto target '{}'", raw)))?;
            ActionKind::Goto { target }
        }
        "invoke-workflow" | "invoke-task" => {
            let path = non_empty(attrs.get("path"))
                .or_else(|| Some(content.clone()).filter(|c| !c.is_empty()))
                .ok_or_else(|| {
                    ParseError::new(line, format!("<{}> is missing its path", element.name))
                })?;
            if element.name == "invoke-workflow" {
                ActionKind::InvokeWorkflow { path }
            } else {
                ActionKind::InvokeTask { path }
            }
        }
        other => {
            tracing::debug!(tag = other, line, "Unknown tag kept as raw action");
            return Ok(Action {
                kind: ActionKind::Action { var: None },
                content: element.raw.trim().to_string(),
                condition: None,
                line,
            });
        }
    };

    Ok(Action {
        kind,
        content,
        condition: non_empty(attrs.get("if")),
        line,
    })
}
