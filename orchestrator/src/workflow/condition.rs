//! Boolean condition evaluation for `<check if="...">` and `if` attributes
//!
//! Supported predicates:
//! - `file exists <path>`, `file not exists <path>`, `<path> exists`,
//!   `<path> does not exist`
//! - `<var> is defined`, `<var> is not defined`
//! - `<var> is true`, `<var> is false`, `true`, `false`, bare `<var>`
//! - comparisons `==`, `!=`, `<`, `>`, `<=`, `>=` (numeric when both sides
//!   parse as numbers, string otherwise)
//!
//! Predicates combine with `AND`, `OR` (equal precedence, left to right),
//! `NOT` (binds tighter) and parentheses. Anything else is an error; an
//! unparseable condition never quietly evaluates to false.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use super::variables::{resolve_lenient, value_to_string, VariableContext};
use crate::error::ConditionError;

/// Evaluate a condition expression against the variable context
pub fn evaluate(expr: &str, ctx: &VariableContext) -> Result<bool, ConditionError> {
    let tokens = tokenize(expr)?;
    if tokens.is_empty() {
        return Err(ConditionError::new(expr, "empty condition"));
    }

    let mut parser = ExprParser {
        source: expr,
        tokens: &tokens,
        pos: 0,
    };
    let ast = parser.parse_expr()?;
    if parser.pos != tokens.len() {
        return Err(ConditionError::new(expr, "unexpected trailing tokens"));
    }

    let result = ast.eval(expr, ctx)?;
    tracing::trace!(condition = expr, result, "Evaluated condition");
    Ok(result)
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Atom(String),
}

fn operator(word: &str) -> Option<Token> {
    match word {
        "AND" | "&&" => Some(Token::And),
        "OR" | "||" => Some(Token::Or),
        "NOT" => Some(Token::Not),
        _ => None,
    }
}

fn tokenize(expr: &str) -> Result<Vec<Token>, ConditionError> {
    let mut tokens = Vec::new();
    let mut atom: Vec<String> = Vec::new();
    let mut word = String::new();
    let chars: Vec<char> = expr.chars().collect();
    let mut i = 0;

    fn flush_word(word: &mut String, atom: &mut Vec<String>, tokens: &mut Vec<Token>) {
        if word.is_empty() {
            return;
        }
        match operator(word) {
            Some(op) => {
                flush_atom(atom, tokens);
                tokens.push(op);
            }
            None => atom.push(word.clone()),
        }
        word.clear();
    }

    fn flush_atom(atom: &mut Vec<String>, tokens: &mut Vec<Token>) {
        if !atom.is_empty() {
            tokens.push(Token::Atom(atom.join(" ")));
            atom.clear();
        }
    }

    while i < chars.len() {
        let c = chars[i];
        let opens_quote = (c == '\'' || c == '"')
            && (word.is_empty() || word.ends_with(['=', '<', '>', '!']));

        if opens_quote {
            let close = chars[i + 1..]
                .iter()
                .position(|&ch| ch == c)
                .ok_or_else(|| ConditionError::new(expr, "unterminated quoted string"))?;
            word.extend(&chars[i..=i + 1 + close]);
            i += close + 2;
            continue;
        }

        if c == '{' && chars.get(i + 1) == Some(&'{') {
            let rest: String = chars[i..].iter().collect();
            let end = rest
                .find("}}")
                .ok_or_else(|| ConditionError::new(expr, "unterminated {{ variable }}"))?;
            let token: String = rest[..end + 2].to_string();
            i += token.chars().count();
            word.push_str(&token);
            continue;
        }

        match c {
            '(' if word.is_empty() => {
                flush_atom(&mut atom, &mut tokens);
                tokens.push(Token::LParen);
            }
            ')' => {
                flush_word(&mut word, &mut atom, &mut tokens);
                flush_atom(&mut atom, &mut tokens);
                tokens.push(Token::RParen);
            }
            c if c.is_whitespace() => flush_word(&mut word, &mut atom, &mut tokens),
            c => word.push(c),
        }
        i += 1;
    }

    flush_word(&mut word, &mut atom, &mut tokens);
    flush_atom(&mut atom, &mut tokens);
    Ok(tokens)
}

// ============================================================================
// Expression tree
// ============================================================================

#[derive(Debug)]
enum Expr {
    Atom(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
}

struct ExprParser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
}

impl ExprParser<'_> {
    fn error(&self, message: &str) -> ConditionError {
        ConditionError::new(self.source, message)
    }

    fn parse_expr(&mut self) -> Result<Expr, ConditionError> {
        let mut left = self.parse_unary()?;
        loop {
            match self.tokens.get(self.pos) {
                Some(Token::And) => {
                    self.pos += 1;
                    left = Expr::And(Box::new(left), Box::new(self.parse_unary()?));
                }
                Some(Token::Or) => {
                    self.pos += 1;
                    left = Expr::Or(Box::new(left), Box::new(self.parse_unary()?));
                }
                _ => return Ok(left),
            }
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, ConditionError> {
        match self.tokens.get(self.pos) {
            Some(Token::Not) => {
                self.pos += 1;
                Ok(Expr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<Expr, ConditionError> {
        match self.tokens.get(self.pos) {
            Some(Token::LParen) => {
                self.pos += 1;
                let inner = self.parse_expr()?;
                match self.tokens.get(self.pos) {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(inner)
                    }
                    _ => Err(self.error("missing closing parenthesis")),
                }
            }
            Some(Token::Atom(text)) => {
                self.pos += 1;
                Ok(Expr::Atom(text.clone()))
            }
            Some(Token::RParen) => Err(self.error("unexpected ')'")),
            Some(_) => Err(self.error("operator without operand")),
            None => Err(self.error("unexpected end of condition")),
        }
    }
}

impl Expr {
    // Both sides are always evaluated so a malformed predicate is reported
    // regardless of what precedes it.
    fn eval(&self, source: &str, ctx: &VariableContext) -> Result<bool, ConditionError> {
        match self {
            Expr::Atom(text) => eval_predicate(text, source, ctx),
            Expr::Not(inner) => Ok(!inner.eval(source, ctx)?),
            Expr::And(a, b) => {
                let left = a.eval(source, ctx)?;
                let right = b.eval(source, ctx)?;
                Ok(left && right)
            }
            Expr::Or(a, b) => {
                let left = a.eval(source, ctx)?;
                let right = b.eval(source, ctx)?;
                Ok(left || right)
            }
        }
    }
}

// ============================================================================
// Predicates
// ============================================================================

struct Predicates {
    file_exists: Regex,
    file_not_exists: Regex,
    does_not_exist: Regex,
    exists: Regex,
    not_defined: Regex,
    defined: Regex,
    is_bool: Regex,
    identifier: Regex,
}

fn predicates() -> &'static Predicates {
    static P: OnceLock<Predicates> = OnceLock::new();
    P.get_or_init(|| Predicates {
        file_exists: Regex::new(r"(?i)^file\s+exists\s+(.+)$").unwrap(),
        file_not_exists: Regex::new(r"(?i)^file\s+(?:not\s+exists|does\s+not\s+exist)\s+(.+)$")
            .unwrap(),
        does_not_exist: Regex::new(r"(?i)^(.+?)\s+does\s+not\s+exist$").unwrap(),
        exists: Regex::new(r"(?i)^(.+?)\s+exists$").unwrap(),
        not_defined: Regex::new(r"(?i)^(.+?)\s+is\s+not\s+defined$").unwrap(),
        defined: Regex::new(r"(?i)^(.+?)\s+is\s+defined$").unwrap(),
        is_bool: Regex::new(r"(?i)^(.+?)\s+is\s+(true|false)$").unwrap(),
        identifier: Regex::new(r"^(?:\{\{\s*[^{}]+?\s*\}\}|[A-Za-z_][\w.-]*)$").unwrap(),
    })
}

fn capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

fn eval_predicate(text: &str, source: &str, ctx: &VariableContext) -> Result<bool, ConditionError> {
    let text = text.trim();
    let p = predicates();

    if text.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if text.eq_ignore_ascii_case("false") {
        return Ok(false);
    }

    if let Some(path) = capture(&p.file_not_exists, text) {
        return Ok(!path_exists(path, ctx));
    }
    if let Some(path) = capture(&p.file_exists, text) {
        return Ok(path_exists(path, ctx));
    }
    if let Some(path) = capture(&p.does_not_exist, text) {
        return Ok(!path_exists(path, ctx));
    }
    if let Some(path) = capture(&p.exists, text) {
        return Ok(path_exists(path, ctx));
    }

    if let Some(subject) = capture(&p.not_defined, text) {
        return Ok(!is_defined(subject, ctx));
    }
    if let Some(subject) = capture(&p.defined, text) {
        return Ok(is_defined(subject, ctx));
    }
    if let Some(caps) = p.is_bool.captures(text) {
        let subject = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
        let expected = caps
            .get(2)
            .map(|m| m.as_str().eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        return Ok(truthy(variable(subject, ctx).as_ref()) == expected);
    }

    if let Some((left, op, right)) = split_comparison(text) {
        if left.is_empty() || right.is_empty() {
            return Err(ConditionError::new(
                source,
                format!("comparison '{}' is missing an operand", text),
            ));
        }
        let left = operand(left, ctx);
        let right = operand(right, ctx);
        return Ok(compare(&left, op, &right));
    }

    if p.identifier.is_match(text) {
        return Ok(truthy(variable(text, ctx).as_ref()));
    }

    Err(ConditionError::new(
        source,
        format!("unrecognized predicate '{}'", text),
    ))
}

fn unquote(raw: &str) -> Option<&str> {
    let raw = raw.trim();
    if raw.len() >= 2
        && ((raw.starts_with('\'') && raw.ends_with('\''))
            || (raw.starts_with('"') && raw.ends_with('"')))
    {
        Some(&raw[1..raw.len() - 1])
    } else {
        None
    }
}

fn strip_braces(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix("{{")
        .and_then(|r| r.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(raw)
}

fn variable(raw: &str, ctx: &VariableContext) -> Option<Value> {
    ctx.get(strip_braces(raw)).cloned()
}

fn is_defined(raw: &str, ctx: &VariableContext) -> bool {
    matches!(variable(raw, ctx), Some(v) if !v.is_null())
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "" | "false" | "0" | "no"
        ),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
    }
}

/// Resolve an operand to text: quoted literal, `{{var}}`, known variable,
/// or the raw text itself
fn operand(raw: &str, ctx: &VariableContext) -> String {
    if let Some(literal) = unquote(raw) {
        return resolve_lenient(literal, ctx);
    }
    let raw = raw.trim();
    if raw.starts_with("{{") {
        return variable(raw, ctx)
            .map(|v| value_to_string(&v))
            .unwrap_or_default();
    }
    match ctx.get(raw) {
        Some(value) => value_to_string(value),
        None => raw.to_string(),
    }
}

fn path_exists(raw: &str, ctx: &VariableContext) -> bool {
    let text = unquote(raw).unwrap_or(raw);
    let resolved = resolve_lenient(text.trim(), ctx);
    let mut path = PathBuf::from(&resolved);
    if path.is_relative() {
        if let Some(root) = ctx.get("project-root") {
            path = PathBuf::from(value_to_string(root)).join(path);
        }
    }
    path.exists()
}

const COMPARATORS: [&str; 6] = ["==", "!=", "<=", ">=", "<", ">"];

/// Split on the first comparison operator outside quotes and `{{ }}`
fn split_comparison(text: &str) -> Option<(&str, &'static str, &str)> {
    let bytes = text.as_bytes();
    let mut quote: Option<u8> = None;
    let mut braces = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None => {
                if b == b'\'' || b == b'"' {
                    quote = Some(b);
                } else if text[i..].starts_with("{{") {
                    braces += 1;
                    i += 2;
                    continue;
                } else if text[i..].starts_with("}}") && braces > 0 {
                    braces -= 1;
                    i += 2;
                    continue;
                } else if braces == 0 {
                    for op in COMPARATORS {
                        if text[i..].starts_with(op) {
                            let left = text[..i].trim();
                            let right = text[i + op.len()..].trim();
                            return Some((left, op, right));
                        }
                    }
                }
            }
        }
        i += 1;
    }
    None
}

fn compare(left: &str, op: &str, right: &str) -> bool {
    // nan and inf parse as f64 but compare as words
    let ordering = match (left.trim().parse::<f64>(), right.trim().parse::<f64>()) {
        (Ok(l), Ok(r)) if l.is_finite() && r.is_finite() => l.total_cmp(&r),
        _ => left.cmp(right),
    };

    match op {
        "==" => ordering == Ordering::Equal,
        "!=" => ordering != Ordering::Equal,
        "<" => ordering == Ordering::Less,
        ">" => ordering == Ordering::Greater,
        "<=" => ordering != Ordering::Greater,
        ">=" => ordering != Ordering::Less,
        _ => false,
    }
}
