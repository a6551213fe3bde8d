//! Configuration loading (`.agentflow.toml`)
//!
//! Search order:
//! 1. Current directory and its parents
//! 2. Global config at `~/.config/agentflow/`
//! 3. Built-in defaults

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::llm::LlmConfig;
use crate::personas::{Persona, PersonaRegistry};
use crate::pool::{PoolConfig, PricingTable, ProviderPricing};
use crate::retry::RetryPolicy;

pub const CONFIG_FILE_NAME: &str = ".agentflow.toml";

/// Find a config file by walking up the directory tree, then checking the
/// global config directory
fn find_config_file(filename: &str) -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let candidate = current.join(filename);
        if candidate.exists() {
            return Some(candidate);
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => break,
        }
    }

    if let Some(config_dir) = dirs::config_dir() {
        let global_path = config_dir.join("agentflow").join(filename);
        if global_path.exists() {
            return Some(global_path);
        }
    }

    None
}

/// Project-level settings the engine and pool consult at run time
pub trait ProjectConfig: Send + Sync {
    /// Provider/model for a named agent
    fn agent_assignment(&self, name: &str) -> LlmConfig;

    /// Variables for the config layer
    fn variables(&self) -> Map<String, Value> {
        Map::new()
    }
}

/// Same model for every agent, no config variables
#[derive(Debug, Clone, Default)]
pub struct StaticConfig {
    pub llm: LlmConfig,
    pub variables: Map<String, Value>,
}

impl ProjectConfig for StaticConfig {
    fn agent_assignment(&self, _name: &str) -> LlmConfig {
        self.llm.clone()
    }

    fn variables(&self) -> Map<String, Value> {
        self.variables.clone()
    }
}

// ============================================================================
// File configuration
// ============================================================================

/// Top-level configuration (from .agentflow.toml)
#[derive(Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub pool: PoolSection,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-agent model assignments
    #[serde(default)]
    pub agents: HashMap<String, AgentAssignment>,
    /// Extra or overridden personas
    #[serde(default)]
    pub personas: HashMap<String, PersonaSection>,
    #[serde(default)]
    pub pricing: HashMap<String, ProviderPricing>,
    /// Values exposed to workflows through the config layer
    #[serde(default)]
    pub variables: toml::Table,
}

#[derive(Debug, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct PoolSection {
    #[serde(default = "default_max_concurrent_agents")]
    pub max_concurrent_agents: usize,
    #[serde(default)]
    pub max_queue_size: Option<usize>,
    #[serde(default = "default_hang_threshold_secs")]
    pub hang_threshold_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_destroy_timeout_secs")]
    pub destroy_timeout_secs: u64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct EngineSection {
    #[serde(default)]
    pub yolo: bool,
    #[serde(default = "default_max_goto_jumps")]
    pub max_goto_jumps: u32,
    #[serde(default = "default_max_nesting_depth")]
    pub max_nesting_depth: usize,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    /// Agent used by steps that do not name one
    #[serde(default)]
    pub default_agent: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Model override for one agent; unset fields fall back to `[llm]`
#[derive(Debug, Default, Deserialize)]
pub struct AgentAssignment {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

#[derive(Debug, Deserialize)]
pub struct PersonaSection {
    #[serde(default)]
    pub display_name: Option<String>,
    pub system_prompt: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

// Default value functions
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_provider() -> String {
    "ollama".to_string()
}

fn default_model() -> String {
    "qwen3-coder:30b".to_string()
}

fn default_max_concurrent_agents() -> usize {
    3
}

fn default_hang_threshold_secs() -> u64 {
    600
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_destroy_timeout_secs() -> u64 {
    30
}

fn default_max_goto_jumps() -> u32 {
    25
}

fn default_max_nesting_depth() -> usize {
    8
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".agentflow/state")
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            provider: default_provider(),
            model: default_model(),
            temperature: None,
        }
    }
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_concurrent_agents: default_max_concurrent_agents(),
            max_queue_size: None,
            hang_threshold_secs: default_hang_threshold_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            destroy_timeout_secs: default_destroy_timeout_secs(),
            log_dir: None,
        }
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            yolo: false,
            max_goto_jumps: default_max_goto_jumps(),
            max_nesting_depth: default_max_nesting_depth(),
            state_dir: default_state_dir(),
            default_agent: None,
            project_id: None,
        }
    }
}

impl FileConfig {
    /// Load the nearest `.agentflow.toml`, or defaults when there is none
    pub fn load() -> Result<Self> {
        if let Some(config_path) = find_config_file(CONFIG_FILE_NAME) {
            tracing::debug!("Loading config from: {}", config_path.display());
            return Self::load_from_path(&config_path);
        }

        tracing::debug!("No {} found, using defaults", CONFIG_FILE_NAME);
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn pool_config(&self) -> PoolConfig {
        let mut config = PoolConfig::new()
            .with_max_concurrent_agents(self.pool.max_concurrent_agents)
            .with_hang_threshold(Duration::from_secs(self.pool.hang_threshold_secs))
            .with_health_check_interval(Duration::from_secs(
                self.pool.health_check_interval_secs.max(1),
            ))
            .with_destroy_timeout(Duration::from_secs(self.pool.destroy_timeout_secs))
            .with_retry(self.retry.clone());
        config.max_queue_size = self.pool.max_queue_size;
        config.log_dir = self.pool.log_dir.clone();
        config
    }

    pub fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig::default()
            .with_yolo(self.engine.yolo)
            .with_max_goto_jumps(self.engine.max_goto_jumps)
            .with_max_nesting_depth(self.engine.max_nesting_depth)
            .with_save_retry(self.retry.clone());
        config.default_agent = self.engine.default_agent.clone();
        config.project_id = self.engine.project_id.clone();
        config
    }

    /// Default pricing with `[pricing.*]` overrides applied
    pub fn pricing_table(&self) -> PricingTable {
        let mut table = PricingTable::default();
        table.merge(self.pricing.clone());
        table
    }

    /// Built-in personas plus `[personas.*]`
    pub fn persona_registry(&self) -> PersonaRegistry {
        let mut registry = PersonaRegistry::with_defaults();
        for (name, section) in &self.personas {
            let mut persona = Persona::new(name, &section.system_prompt);
            if let Some(display_name) = &section.display_name {
                persona = persona.with_display_name(display_name);
            }
            if let Some(temperature) = section.temperature {
                persona = persona.with_temperature(temperature);
            }
            registry.register(persona);
        }
        registry
    }
}

impl ProjectConfig for FileConfig {
    fn agent_assignment(&self, name: &str) -> LlmConfig {
        let assignment = self.agents.get(name);
        LlmConfig {
            provider: assignment
                .and_then(|a| a.provider.clone())
                .unwrap_or_else(|| self.llm.provider.clone()),
            model: assignment
                .and_then(|a| a.model.clone())
                .unwrap_or_else(|| self.llm.model.clone()),
            temperature: assignment
                .and_then(|a| a.temperature)
                .or(self.llm.temperature),
        }
    }

    fn variables(&self) -> Map<String, Value> {
        match serde_json::to_value(&self.variables) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}
