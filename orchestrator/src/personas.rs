//! Personas and the registry that resolves them
//!
//! A persona is a named behavioral profile applied to an agent, independent
//! of which LLM provider backs it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::prompts;

/// A named behavioral profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    /// Unique identifier, also the agent name that selects it
    pub name: String,

    /// Display name for UI/logging
    #[serde(default)]
    pub display_name: String,

    /// System prompt defining the persona's behavior
    pub system_prompt: String,

    /// Preferred sampling temperature when the assignment sets none
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Persona {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            system_prompt: system_prompt.into(),
            temperature: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Full prompt sent to the model: system prompt, blank line, task
    pub fn compose(&self, prompt: &str) -> String {
        if self.system_prompt.is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", self.system_prompt, prompt)
        }
    }
}

/// Resolves personas by name
pub trait PersonaSource: Send + Sync {
    fn persona(&self, name: &str) -> Option<Persona>;
}

/// Registry of available personas
#[derive(Debug, Clone, Default)]
pub struct PersonaRegistry {
    personas: HashMap<String, Persona>,
}

impl PersonaRegistry {
    pub fn new() -> Self {
        Self {
            personas: HashMap::new(),
        }
    }

    /// Registry with the built-in personas
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(
            Persona::new("analyst", prompts::ANALYST_PROMPT)
                .with_display_name("Analyst")
                .with_temperature(0.5),
        );
        registry.register(
            Persona::new("architect", prompts::ARCHITECT_PROMPT)
                .with_display_name("Architect")
                .with_temperature(0.3),
        );
        registry.register(
            Persona::new("sm", prompts::SCRUM_MASTER_PROMPT)
                .with_display_name("Scrum Master")
                .with_temperature(0.3),
        );
        registry.register(
            Persona::new("dev", prompts::DEVELOPER_PROMPT)
                .with_display_name("Developer")
                .with_temperature(0.2),
        );
        registry.register(
            Persona::new("qa", prompts::QA_PROMPT)
                .with_display_name("QA")
                .with_temperature(0.1),
        );

        registry
    }

    /// Register a persona, replacing any with the same name
    pub fn register(&mut self, persona: Persona) {
        self.personas.insert(persona.name.clone(), persona);
    }

    pub fn get(&self, name: &str) -> Option<&Persona> {
        self.personas.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.personas.contains_key(name)
    }

    /// Persona names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.personas.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Persona)> {
        self.personas.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl PersonaSource for PersonaRegistry {
    fn persona(&self, name: &str) -> Option<Persona> {
        self.get(name).cloned()
    }
}
