//! Task definitions run by `<invoke-task>`
//!
//! A task is a small TOML file executed synchronously within a step:
//!
//! ```toml
//! name = "summarize"
//! description = "Summarize the story"
//! agent = "analyst"
//! prompt = "Summarize {{story_path}}"
//! output = "summary"
//!
//! [outputs]
//! summary_file = "{{output_folder}}/summary.md"
//! ```

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::TaskError;

#[derive(Debug, Clone, Deserialize)]
pub struct TaskDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Agent that answers `prompt`
    #[serde(default)]
    pub agent: Option<String>,

    /// Prompt template sent to the agent
    #[serde(default)]
    pub prompt: Option<String>,

    /// Variable receiving the agent response, `<name>_output` by default
    #[serde(default)]
    pub output: Option<String>,

    /// Static outputs (templates) merged into the runtime variables
    #[serde(default)]
    pub outputs: toml::Table,
}

impl TaskDefinition {
    pub fn from_toml_file(path: &Path) -> Result<Self, TaskError> {
        let content = std::fs::read_to_string(path).map_err(|source| TaskError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content).map_err(|message| TaskError::Invalid {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(content: &str) -> Result<Self, String> {
        let task: TaskDefinition = toml::from_str(content).map_err(|e| e.to_string())?;
        if task.name.trim().is_empty() {
            return Err("task name must not be empty".to_string());
        }
        if task.prompt.is_some() && task.agent.is_none() {
            return Err("a task with a prompt needs an agent".to_string());
        }
        Ok(task)
    }

    /// Variable name that receives the agent response
    pub fn output_var(&self) -> String {
        self.output
            .clone()
            .unwrap_or_else(|| format!("{}_output", self.name))
    }

    /// Static outputs as JSON values
    pub fn static_outputs(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.outputs) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
