//! Pooled agents and the snapshots handed out to callers

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Notify;

use crate::llm::{LlmClient, LlmConfig};
use crate::personas::Persona;

/// Agent lifecycle: created → running → idle → destroyed, or
/// running → error → destroyed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Created,
    Running,
    Idle,
    Error,
    Destroyed,
}

/// Who an agent works for
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentContext {
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub step: Option<u32>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl AgentContext {
    pub fn for_workflow(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: Some(workflow_id.into()),
            ..Self::default()
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_step(mut self, step: u32) -> Self {
        self.step = Some(step);
        self
    }
}

/// One line of an agent's execution log
#[derive(Debug, Clone, Serialize)]
pub(crate) struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub prompt_chars: usize,
    pub response_chars: usize,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub cost: f64,
    #[serde(with = "millis")]
    pub duration: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

mod millis {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }
}

/// An agent owned by the pool
pub(crate) struct Agent {
    pub id: String,
    pub name: String,
    pub persona: Persona,
    pub llm_config: LlmConfig,
    pub client: Arc<dyn LlmClient>,
    pub context: AgentContext,
    pub start_time: DateTime<Utc>,
    pub started: Instant,
    pub running_since: Option<Instant>,
    pub estimated_cost: f64,
    pub status: AgentStatus,
    pub log: Vec<LogEntry>,
    /// Wakes an in-flight invocation when the agent is force-destroyed
    pub kill: Arc<Notify>,
}

impl Agent {
    pub fn info(&self) -> AgentInfo {
        AgentInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            persona: self.persona.name.clone(),
            provider: self.llm_config.provider.clone(),
            model: self.llm_config.model.clone(),
            context: self.context.clone(),
            start_time: self.start_time,
            estimated_cost: self.estimated_cost,
            status: self.status,
        }
    }
}

/// Read-only view of a pooled agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub persona: String,
    pub provider: String,
    pub model: String,
    pub context: AgentContext,
    pub start_time: DateTime<Utc>,
    pub estimated_cost: f64,
    pub status: AgentStatus,
}

/// Agent request waiting for a free slot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedTaskInfo {
    pub name: String,
    pub provider: String,
    pub model: String,
    pub context: AgentContext,
    pub queued_at: DateTime<Utc>,
}
