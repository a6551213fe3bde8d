//! Orchestrator events for real-time visibility
//!
//! The pool and the engine emit these fire-and-forget over an unbounded
//! channel. Consumers (the CLI logger, dashboards) subscribe to the
//! receiving end; a dropped receiver never blocks or fails a run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::state::WorkflowStatus;

// ============================================================================
// Events
// ============================================================================

/// Why an agent reported an error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    /// The LLM call failed after retries
    Failed,
    /// Running longer than the hang threshold; force-destroyed
    Hung,
    /// Cleanup did not finish within the destroy timeout
    ResourceLeak,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum OrchestratorEvent {
    #[serde(rename = "agent.started")]
    AgentStarted {
        agent_id: String,
        name: String,
        persona: String,
        #[serde(default)]
        workflow_id: Option<String>,
    },

    #[serde(rename = "agent.completed")]
    AgentCompleted {
        agent_id: String,
        name: String,
        /// USD spent by this agent over its lifetime
        cost: f64,
        #[serde(with = "duration_millis")]
        duration: Duration,
    },

    #[serde(rename = "agent.error")]
    AgentError {
        agent_id: String,
        kind: AgentErrorKind,
        message: String,
    },

    #[serde(rename = "workflow.step.completed")]
    StepCompleted {
        workflow_id: String,
        step: u32,
        skipped: bool,
    },

    /// Text from an `<output>` or `<template-output>` action
    #[serde(rename = "workflow.output")]
    Output {
        workflow_id: String,
        step: u32,
        content: String,
    },

    #[serde(rename = "workflow.status")]
    WorkflowStatusChanged {
        workflow_id: String,
        status: WorkflowStatus,
        step: u32,
    },
}

impl OrchestratorEvent {
    /// Dotted event name, as serialized
    pub fn name(&self) -> &'static str {
        match self {
            Self::AgentStarted { .. } => "agent.started",
            Self::AgentCompleted { .. } => "agent.completed",
            Self::AgentError { .. } => "agent.error",
            Self::StepCompleted { .. } => "workflow.step.completed",
            Self::Output { .. } => "workflow.output",
            Self::WorkflowStatusChanged { .. } => "workflow.status",
        }
    }
}

/// Serialize Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

// ============================================================================
// Event Channel
// ============================================================================

pub type EventSender = mpsc::UnboundedSender<OrchestratorEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<OrchestratorEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Optional sender shared by the pool and engines
#[derive(Clone, Default)]
pub struct EventSink {
    sender: Option<EventSender>,
}

impl EventSink {
    pub fn new(sender: EventSender) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Discards every event
    pub fn none() -> Self {
        Self { sender: None }
    }

    pub fn is_active(&self) -> bool {
        self.sender.is_some()
    }

    pub fn send(&self, event: OrchestratorEvent) {
        if let Some(ref sender) = self.sender {
            // Receiver may have dropped
            let _ = sender.send(event);
        }
    }

    pub fn step_completed(&self, workflow_id: &str, step: u32, skipped: bool) {
        self.send(OrchestratorEvent::StepCompleted {
            workflow_id: workflow_id.to_string(),
            step,
            skipped,
        });
    }

    pub fn output(&self, workflow_id: &str, step: u32, content: &str) {
        self.send(OrchestratorEvent::Output {
            workflow_id: workflow_id.to_string(),
            step,
            content: content.to_string(),
        });
    }

    pub fn status(&self, workflow_id: &str, status: WorkflowStatus, step: u32) {
        self.send(OrchestratorEvent::WorkflowStatusChanged {
            workflow_id: workflow_id.to_string(),
            status,
            step,
        });
    }

    pub fn agent_error(&self, agent_id: &str, kind: AgentErrorKind, message: impl Into<String>) {
        self.send(OrchestratorEvent::AgentError {
            agent_id: agent_id.to_string(),
            kind,
            message: message.into(),
        });
    }
}
