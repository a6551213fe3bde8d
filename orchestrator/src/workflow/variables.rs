//! Layered variable context and `{{var}}` template resolution
//!
//! Layers are merged in a fixed order (system, path, config, workflow,
//! runtime); a later layer only overrides an earlier one for the same key.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use crate::error::VariableError;

/// Variable layers, lowest precedence first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    /// Generated by the engine (date, workflow id, ...)
    System,
    /// Filesystem locations (project-root, installed-path)
    Path,
    /// Values referenced from the project configuration
    Config,
    /// Variables declared by the workflow definition
    Workflow,
    /// Values set while the workflow runs
    Runtime,
}

impl Layer {
    pub const ALL: [Layer; 5] = [
        Layer::System,
        Layer::Path,
        Layer::Config,
        Layer::Workflow,
        Layer::Runtime,
    ];

    fn index(self) -> usize {
        match self {
            Layer::System => 0,
            Layer::Path => 1,
            Layer::Config => 2,
            Layer::Workflow => 3,
            Layer::Runtime => 4,
        }
    }
}

/// Variables visible to templates and conditions
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    layers: [Map<String, Value>; 5],
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a single variable in a layer
    pub fn set(&mut self, layer: Layer, key: impl Into<String>, value: impl Into<Value>) {
        self.layers[layer.index()].insert(key.into(), value.into());
    }

    /// Merge a map of variables into a layer
    pub fn extend(&mut self, layer: Layer, values: Map<String, Value>) {
        self.layers[layer.index()].extend(values);
    }

    /// Replace a whole layer
    pub fn replace_layer(&mut self, layer: Layer, values: Map<String, Value>) {
        self.layers[layer.index()] = values;
    }

    pub fn layer(&self, layer: Layer) -> &Map<String, Value> {
        &self.layers[layer.index()]
    }

    /// Runtime variables, the only layer persisted in checkpoints
    pub fn runtime(&self) -> &Map<String, Value> {
        self.layer(Layer::Runtime)
    }

    /// Look up a variable, supporting dotted access (`story.title`)
    pub fn get(&self, key: &str) -> Option<&Value> {
        if let Some(value) = self.lookup(key) {
            return Some(value);
        }

        let mut segments = key.split('.');
        let mut current = self.lookup(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn lookup(&self, key: &str) -> Option<&Value> {
        self.layers.iter().rev().find_map(|layer| layer.get(key))
    }

    /// All top-level keys across layers, sorted
    pub fn known_keys(&self) -> Vec<String> {
        self.layers
            .iter()
            .flat_map(|layer| layer.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Flattened view with later layers winning per key
    pub fn merged(&self) -> Map<String, Value> {
        let mut merged = Map::new();
        for layer in &self.layers {
            for (key, value) in layer {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged
    }
}

/// Render a value for substitution into text
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn template_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*([^{}|]+?)\s*(?:\|([^{}]*))?\}\}").unwrap())
}

fn path_token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([A-Za-z][\w-]*)\}").unwrap())
}

/// Expand single-brace path tokens such as `{project-root}`.
///
/// Only keys present in the path layer are touched; anything else
/// (including `{{double}}` tokens) is left as written.
fn expand_path_tokens(text: &str, ctx: &VariableContext) -> String {
    let paths = ctx.layer(Layer::Path);
    if paths.is_empty() || !text.contains('{') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in path_token_regex().captures_iter(text) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let doubled = text[..whole.start()].ends_with('{') || text[whole.end()..].starts_with('}');
        if doubled {
            continue;
        }
        if let Some(value) = paths.get(key.as_str()) {
            out.push_str(&text[last..whole.start()]);
            out.push_str(&value_to_string(value));
            last = whole.end();
        }
    }
    out.push_str(&text[last..]);
    out
}

fn substitute(text: &str, ctx: &VariableContext, strict: bool) -> Result<String, VariableError> {
    let text = expand_path_tokens(text, ctx);
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in template_regex().captures_iter(&text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let name = name.as_str();
        let default = caps.get(2).map(|m| m.as_str().trim());

        let replacement = match (ctx.get(name), default) {
            (Some(Value::Null), Some(default)) => default.to_string(),
            (Some(value), _) => value_to_string(value),
            (None, Some(default)) => default.to_string(),
            (None, None) if strict => {
                return Err(VariableError {
                    variable: name.to_string(),
                    known_keys: ctx.known_keys(),
                });
            }
            (None, None) => whole.as_str().to_string(),
        };

        let literal = &text[last..whole.start()];
        if strict {
            reject_malformed(literal, ctx)?;
        }
        out.push_str(literal);
        out.push_str(&replacement);
        last = whole.end();
    }

    let tail = &text[last..];
    if strict {
        reject_malformed(tail, ctx)?;
    }
    out.push_str(tail);
    Ok(out)
}

/// A `{{` left in literal text is a token the template syntax could not read
fn reject_malformed(literal: &str, ctx: &VariableContext) -> Result<(), VariableError> {
    let Some(start) = literal.find("{{") else {
        return Ok(());
    };
    let rest = &literal[start..];
    let token = match rest[2..].find("}}") {
        Some(end) => &rest[..end + 4],
        None => rest,
    };
    Err(VariableError {
        variable: token.to_string(),
        known_keys: ctx.known_keys(),
    })
}

/// Resolve every `{{var}}`, `{{a.b}}` and `{{var|default}}` token.
///
/// A token with no value and no default is an error naming the variable.
pub fn resolve(text: &str, ctx: &VariableContext) -> Result<String, VariableError> {
    substitute(text, ctx, true)
}

/// Like [`resolve`], but unresolved tokens are left in place
pub fn resolve_lenient(text: &str, ctx: &VariableContext) -> String {
    substitute(text, ctx, false).unwrap_or_else(|_| text.to_string())
}

/// Variable names referenced by `{{...}}` tokens in `text`
pub fn referenced_variables(text: &str) -> Vec<String> {
    template_regex()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}
