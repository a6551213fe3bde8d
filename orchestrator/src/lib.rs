//! Multi-agent workflow execution engine
//!
//! This crate provides:
//! - A parser for XML-like workflow instruction documents
//! - Layered variable resolution and boolean condition evaluation
//! - A workflow engine with per-step checkpoints and resume
//! - A bounded agent pool with FIFO queueing, health checks and cost tracking
//! - Built-in personas and TOML project configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use agentflow::{AgentPool, DefaultLlmFactory, FileStateStore, WorkflowDefinition, WorkflowEngine};
//!
//! let pool = AgentPool::builder(Arc::new(DefaultLlmFactory::new("http://localhost:11434"))).build();
//! let store = Arc::new(FileStateStore::new(".agentflow/state"));
//! let definition = WorkflowDefinition::from_document("story", document);
//!
//! let outcome = WorkflowEngine::new(definition, pool, store).execute().await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod llm;
pub mod personas;
pub mod pool;
pub mod prompts;
pub mod retry;
pub mod state;
pub mod tasks;
pub mod workflow;

pub use config::{FileConfig, ProjectConfig, StaticConfig};
pub use engine::checkpoint::{
    Checkpoint, CheckpointHandler, CheckpointResult, InputProvider, InputRequest,
};
pub use engine::{CancellationFlag, EngineConfig, WorkflowEngine, WorkflowOutcome};
pub use error::{EngineError, LlmError, PoolError, StateError, StepError};
pub use events::{event_channel, EventSink, OrchestratorEvent};
pub use llm::{DefaultLlmFactory, LlmClient, LlmConfig, LlmFactory, LlmResponse};
pub use personas::{Persona, PersonaRegistry};
pub use pool::{AgentContext, AgentInfo, AgentPool, AgentStatus, CostLedger, PoolConfig};
pub use retry::RetryPolicy;
pub use state::{FileStateStore, MemoryStateStore, StateStore, WorkflowExecutionState, WorkflowStatus};
pub use workflow::{parse, Step, VariableContext, WorkflowDefinition, WorkflowLoader};
