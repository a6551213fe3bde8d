//! Error taxonomy for the engine and the agent pool
//!
//! Every fatal engine error carries the step number, the offending content
//! and the variable keys known at the time of failure.

use std::path::PathBuf;

/// Malformed or non-sequential instruction document
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// A `{{...}}` token with no value and no default
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unresolved variable '{variable}' (known variables: {})", known_keys.join(", "))]
pub struct VariableError {
    pub variable: String,
    pub known_keys: Vec<String>,
}

/// Expression the condition evaluator could not make sense of
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot evaluate condition '{expression}': {message}")]
pub struct ConditionError {
    pub expression: String,
    pub message: String,
}

impl ConditionError {
    pub fn new(expression: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            message: message.into(),
        }
    }
}

/// Checkpoint read/write failures
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("state IO error for {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by LLM clients
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LlmError {
    /// Worth retrying: timeouts, rate limits, 5xx responses
    #[error("transient LLM error: {0}")]
    Transient(String),

    #[error("LLM error: {0}")]
    Fatal(String),

    #[error("unsupported LLM provider: {0}")]
    UnsupportedProvider(String),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Agent pool errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    #[error("agent not found: {0}")]
    NotFound(String),

    #[error("agent {0} is already running a prompt")]
    AgentBusy(String),

    #[error("agent request rejected: wait queue is full ({queued} queued)")]
    Rejected { queued: usize },

    #[error("persona not found: {0}")]
    PersonaNotFound(String),

    #[error("failed to create LLM client for '{agent}': {source}")]
    ClientCreation {
        agent: String,
        #[source]
        source: LlmError,
    },

    #[error("agent {agent_id} invocation failed: {source}")]
    Invocation {
        agent_id: String,
        #[source]
        source: LlmError,
    },

    #[error("agent {0} was destroyed while running")]
    Aborted(String),

    #[error("agent pool closed before the request was served")]
    Closed,
}

/// Task definition loading and execution errors
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("failed to read task definition {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid task definition {path:?}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Workflow definition loading errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read workflow {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid workflow manifest {path:?}: {message}")]
    Manifest { path: PathBuf, message: String },
}

/// Why a step could not complete
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Variable(#[from] VariableError),

    #[error(transparent)]
    Condition(#[from] ConditionError),

    #[error(transparent)]
    Agent(#[from] PoolError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("nested workflow failed: {0}")]
    NestedWorkflow(Box<EngineError>),

    #[error("goto target step {target} does not exist")]
    InvalidGoto { target: u32 },

    #[error("goto loop guard tripped: more than {limit} jumps in one run")]
    GotoLimitExceeded { limit: u32 },

    #[error("workflow nesting deeper than {limit} levels")]
    NestingTooDeep { limit: usize },
}

/// Fatal engine errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("checkpoint persistence failed after {attempts} attempts: {source}")]
    State {
        attempts: u32,
        #[source]
        source: StateError,
    },

    #[error("step {step} failed: {source}\n  content: {content}\n  known variables: {}", known_variables.join(", "))]
    StepFailed {
        step: u32,
        content: String,
        known_variables: Vec<String>,
        #[source]
        source: StepError,
    },
}

impl EngineError {
    /// Step number the error occurred in, if it is step-scoped
    pub fn step(&self) -> Option<u32> {
        match self {
            Self::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_variable_error_lists_known_keys() {
        let err = VariableError {
            variable: "story".to_string(),
            known_keys: vec!["date".to_string(), "project-root".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("'story'"));
        assert!(msg.contains("date, project-root"));
    }

    #[test]
    fn test_step_failed_carries_context() {
        let err = EngineError::StepFailed {
            step: 3,
            content: "Implement {{story}}".to_string(),
            known_variables: vec!["date".to_string()],
            source: StepError::InvalidGoto { target: 9 },
        };
        assert_eq!(err.step(), Some(3));
        let msg = err.to_string();
        assert!(msg.contains("step 3"));
        assert!(msg.contains("Implement {{story}}"));
        assert!(msg.contains("target step 9"));
    }

    #[test]
    fn test_llm_error_transience() {
        assert!(LlmError::Transient("503".into()).is_transient());
        assert!(!LlmError::Fatal("bad request".into()).is_transient());
    }
}
