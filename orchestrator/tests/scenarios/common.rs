//! Shared doubles for scenario tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentflow::engine::checkpoint::{InputProvider, QueuedInput};
use agentflow::{
    AgentPool, EngineConfig, LlmClient, LlmConfig, LlmError, LlmFactory, LlmResponse,
    MemoryStateStore, PoolConfig, RetryPolicy, StateStore, WorkflowDefinition, WorkflowEngine,
};
use async_trait::async_trait;

/// What the scripted model does, shared by every client it hands out
#[derive(Default)]
pub struct Script {
    pub calls: AtomicU32,
    pub transient_failures: AtomicU32,
    pub prompts: Mutex<Vec<String>>,
}

impl Script {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn fail_transiently(&self, times: u32) {
        self.transient_failures.store(times, Ordering::SeqCst);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

pub struct ScriptedClient {
    script: Arc<Script>,
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn invoke(&self, prompt: &str) -> Result<LlmResponse, LlmError> {
        let n = self.script.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.script.prompts.lock().unwrap().push(prompt.to_string());

        let pending = self.script.transient_failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.script
                .transient_failures
                .store(pending - 1, Ordering::SeqCst);
            return Err(LlmError::Transient("503 service unavailable".to_string()));
        }
        Ok(LlmResponse::new(format!("reply-{}", n), 1_000, 500))
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    pub script: Arc<Script>,
}

impl LlmFactory for ScriptedFactory {
    fn create_client(&self, _config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::new(ScriptedClient {
            script: self.script.clone(),
        }))
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(1))
        .with_max_delay(Duration::from_millis(5))
}

pub fn scripted_pool(max_agents: usize) -> (AgentPool, Arc<Script>) {
    let factory = ScriptedFactory::default();
    let script = factory.script.clone();
    let pool = AgentPool::builder(Arc::new(factory))
        .config(
            PoolConfig::new()
                .with_max_concurrent_agents(max_agents)
                .with_retry(fast_retry()),
        )
        .build();
    (pool, script)
}

/// Everything a scenario needs to drive and inspect one engine
pub struct Harness {
    pub pool: AgentPool,
    pub script: Arc<Script>,
    pub store: Arc<MemoryStateStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_pool_size(3)
    }

    pub fn with_pool_size(max_agents: usize) -> Self {
        let (pool, script) = scripted_pool(max_agents);
        Self {
            pool,
            script,
            store: Arc::new(MemoryStateStore::new()),
        }
    }

    pub fn engine(&self, id: &str, document: &str, config: EngineConfig) -> WorkflowEngine {
        self.engine_for(WorkflowDefinition::from_document(id, document), config)
    }

    pub fn engine_for(&self, definition: WorkflowDefinition, config: EngineConfig) -> WorkflowEngine {
        let store: Arc<dyn StateStore> = self.store.clone();
        WorkflowEngine::new(definition, self.pool.clone(), store)
            .with_config(config.with_save_retry(fast_retry()))
    }

    pub fn answers(answers: &[&str]) -> Arc<dyn InputProvider> {
        Arc::new(QueuedInput::new(answers.iter().copied()))
    }

    /// Step numbers of every persisted checkpoint, in save order
    pub fn checkpoint_steps(&self, id: &str) -> Vec<u32> {
        self.store
            .history(id)
            .iter()
            .map(|s| s.current_step_number)
            .collect()
    }
}

/// A document of `count` plain steps, each producing one output
pub fn plain_steps(count: u32) -> String {
    (1..=count)
        .map(|n| format!("<step n=\"{n}\" goal=\"Step {n}\">\n  <output>step {n} done</output>\n</step>\n"))
        .collect()
}
