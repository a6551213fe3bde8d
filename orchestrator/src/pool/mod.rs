//! Bounded, cost-tracked agent pool
//!
//! [`AgentPool`] is a cheap `Clone` handle over one shared pool state: the
//! live agents, a strictly FIFO wait queue and the cost ledger. The state
//! lives behind a `std::sync::Mutex` that is never held across an `.await`.
//!
//! A slot is held from the moment an agent is created until its cleanup
//! finishes, so the number of live agents never exceeds
//! `max_concurrent_agents`.

mod agent;
mod cost;
mod health;

pub use agent::{AgentContext, AgentInfo, AgentStatus, QueuedTaskInfo};
pub use cost::{
    CostLedger, CostMetrics, PricingTable, ProviderPricing, Rate, DEFAULT_INPUT_COST_PER_MILLION,
    DEFAULT_OUTPUT_COST_PER_MILLION,
};
pub use health::HealthMonitor;

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{oneshot, Notify};
use uuid::Uuid;

use crate::error::PoolError;
use crate::events::{AgentErrorKind, EventSink, OrchestratorEvent};
use crate::llm::{LlmClient, LlmConfig, LlmFactory, LlmResponse, RetryingClient};
use crate::personas::{PersonaRegistry, PersonaSource};
use crate::retry::RetryPolicy;
use agent::{Agent, LogEntry};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_concurrent_agents: usize,
    /// `None` means the wait queue is unbounded
    pub max_queue_size: Option<usize>,
    /// Running longer than this marks an agent as hung
    pub hang_threshold: Duration,
    pub health_check_interval: Duration,
    /// Upper bound on cleanup when destroying an agent
    pub destroy_timeout: Duration,
    /// Directory for per-agent JSONL execution logs
    pub log_dir: Option<PathBuf>,
    /// Retry policy applied around every LLM client
    pub retry: RetryPolicy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrent_agents: 3,
            max_queue_size: None,
            hang_threshold: Duration::from_secs(600),
            health_check_interval: Duration::from_secs(30),
            destroy_timeout: Duration::from_secs(30),
            log_dir: None,
            retry: RetryPolicy::default(),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_agents(mut self, max: usize) -> Self {
        self.max_concurrent_agents = max.max(1);
        self
    }

    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(max);
        self
    }

    pub fn with_hang_threshold(mut self, threshold: Duration) -> Self {
        self.hang_threshold = threshold;
        self
    }

    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    pub fn with_destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// ============================================================================
// Requests
// ============================================================================

type AgentResult = Result<AgentInfo, PoolError>;

/// Outcome of [`AgentPool::request_agent`]
#[derive(Debug)]
pub enum AgentRequest {
    /// A slot was free; the agent exists
    Ready(AgentInfo),
    /// Waiting in the FIFO queue
    Queued(PendingAgent),
}

/// Deferred handle for a queued agent request
#[derive(Debug)]
pub struct PendingAgent {
    rx: oneshot::Receiver<AgentResult>,
    position: usize,
}

impl PendingAgent {
    /// Queue position at the time of the request, 1-based
    pub fn position(&self) -> usize {
        self.position
    }

    /// Wait until a slot frees and this request reaches the head of the queue
    pub async fn wait(self) -> AgentResult {
        self.rx.await.map_err(|_| PoolError::Closed)?
    }
}

struct AgentTask {
    name: String,
    llm_config: LlmConfig,
    context: AgentContext,
    queued_at: chrono::DateTime<Utc>,
    responder: oneshot::Sender<AgentResult>,
}

// ============================================================================
// Pool
// ============================================================================

#[derive(Default)]
struct PoolState {
    agents: HashMap<String, Agent>,
    queue: VecDeque<AgentTask>,
    ledger: CostLedger,
}

pub(crate) struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn LlmFactory>,
    personas: Arc<dyn PersonaSource>,
    pricing: PricingTable,
    events: EventSink,
    state: Mutex<PoolState>,
}

/// Shared handle to the agent pool
#[derive(Clone)]
pub struct AgentPool {
    inner: Arc<PoolInner>,
}

/// Builder for [`AgentPool`]
pub struct AgentPoolBuilder {
    config: PoolConfig,
    factory: Arc<dyn LlmFactory>,
    personas: Arc<dyn PersonaSource>,
    pricing: PricingTable,
    events: EventSink,
}

impl AgentPoolBuilder {
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn personas(mut self, personas: Arc<dyn PersonaSource>) -> Self {
        self.personas = personas;
        self
    }

    pub fn pricing(mut self, pricing: PricingTable) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> AgentPool {
        AgentPool {
            inner: Arc::new(PoolInner {
                config: self.config,
                factory: self.factory,
                personas: self.personas,
                pricing: self.pricing,
                events: self.events,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }
}

impl AgentPool {
    /// Start building a pool around an LLM factory
    pub fn builder(factory: Arc<dyn LlmFactory>) -> AgentPoolBuilder {
        AgentPoolBuilder {
            config: PoolConfig::default(),
            factory,
            personas: Arc::new(PersonaRegistry::with_defaults()),
            pricing: PricingTable::default(),
            events: EventSink::none(),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the persona and bind a client. Called with the state lock held.
    fn build_agent(
        &self,
        name: &str,
        llm_config: &LlmConfig,
        context: AgentContext,
    ) -> Result<Agent, PoolError> {
        let persona = self
            .inner
            .personas
            .persona(name)
            .ok_or_else(|| PoolError::PersonaNotFound(name.to_string()))?;

        let mut llm_config = llm_config.clone();
        if llm_config.temperature.is_none() {
            llm_config.temperature = persona.temperature;
        }

        let client = self
            .inner
            .factory
            .create_client(&llm_config)
            .map_err(|source| PoolError::ClientCreation {
                agent: name.to_string(),
                source,
            })?;
        let client: Arc<dyn LlmClient> =
            Arc::new(RetryingClient::new(client, self.inner.config.retry.clone()));

        let simple = Uuid::new_v4().simple().to_string();
        Ok(Agent {
            id: format!("{}-{}", name, &simple[..8]),
            name: name.to_string(),
            persona,
            llm_config,
            client,
            context,
            start_time: Utc::now(),
            started: Instant::now(),
            running_since: None,
            estimated_cost: 0.0,
            status: AgentStatus::Created,
            log: Vec::new(),
            kill: Arc::new(Notify::new()),
        })
    }

    fn emit_started(&self, info: &AgentInfo) {
        tracing::info!(
            agent_id = %info.id,
            persona = %info.persona,
            model = %info.model,
            "Agent started"
        );
        self.inner.events.send(OrchestratorEvent::AgentStarted {
            agent_id: info.id.clone(),
            name: info.name.clone(),
            persona: info.persona.clone(),
            workflow_id: info.context.workflow_id.clone(),
        });
    }

    // ========================================================================
    // Creation
    // ========================================================================

    /// Create an agent now if a slot is free and nobody is waiting,
    /// otherwise join the FIFO queue
    pub fn request_agent(
        &self,
        name: &str,
        llm_config: LlmConfig,
        context: AgentContext,
    ) -> Result<AgentRequest, PoolError> {
        let mut state = self.state();

        if state.agents.len() < self.inner.config.max_concurrent_agents && state.queue.is_empty() {
            let agent = self.build_agent(name, &llm_config, context)?;
            let info = agent.info();
            state.agents.insert(agent.id.clone(), agent);
            drop(state);

            self.emit_started(&info);
            return Ok(AgentRequest::Ready(info));
        }

        if let Some(max) = self.inner.config.max_queue_size {
            if state.queue.len() >= max {
                return Err(PoolError::Rejected {
                    queued: state.queue.len(),
                });
            }
        }

        let (responder, rx) = oneshot::channel();
        state.queue.push_back(AgentTask {
            name: name.to_string(),
            llm_config,
            context,
            queued_at: Utc::now(),
            responder,
        });
        let position = state.queue.len();
        tracing::debug!(agent = name, position, "Pool full, agent request queued");

        Ok(AgentRequest::Queued(PendingAgent { rx, position }))
    }

    /// Create an agent, waiting for a slot if the pool is full
    pub async fn create_agent(
        &self,
        name: &str,
        llm_config: LlmConfig,
        context: AgentContext,
    ) -> Result<AgentInfo, PoolError> {
        match self.request_agent(name, llm_config, context)? {
            AgentRequest::Ready(info) => Ok(info),
            AgentRequest::Queued(pending) => pending.wait().await,
        }
    }

    /// Hand free slots to queued requests, oldest first
    fn service_queue(&self) {
        loop {
            let (responder, result) = {
                let mut state = self.state();
                if state.agents.len() >= self.inner.config.max_concurrent_agents {
                    return;
                }
                let Some(task) = state.queue.pop_front() else {
                    return;
                };

                let result = self
                    .build_agent(&task.name, &task.llm_config, task.context)
                    .map(|agent| {
                        let info = agent.info();
                        state.agents.insert(agent.id.clone(), agent);
                        info
                    });
                (task.responder, result)
            };

            let started = result.as_ref().ok().cloned();
            match responder.send(result) {
                Ok(()) => {
                    if let Some(info) = started {
                        self.emit_started(&info);
                    }
                }
                Err(Ok(abandoned)) => {
                    // Requester went away; free the slot for the next one
                    tracing::debug!(agent_id = %abandoned.id, "Queued requester gone, discarding agent");
                    self.state().agents.remove(&abandoned.id);
                }
                Err(Err(_)) => {}
            }
        }
    }

    // ========================================================================
    // Invocation
    // ========================================================================

    /// Send a prompt to an agent and bill the successful call
    pub async fn invoke_agent(&self, id: &str, prompt: &str) -> Result<LlmResponse, PoolError> {
        let (client, kill, full_prompt, provider, model) = {
            let mut state = self.state();
            let agent = state
                .agents
                .get_mut(id)
                .filter(|a| a.status != AgentStatus::Destroyed)
                .ok_or_else(|| PoolError::NotFound(id.to_string()))?;
            if agent.status == AgentStatus::Running {
                return Err(PoolError::AgentBusy(id.to_string()));
            }

            agent.status = AgentStatus::Running;
            agent.running_since = Some(Instant::now());
            (
                agent.client.clone(),
                agent.kill.clone(),
                agent.persona.compose(prompt),
                agent.llm_config.provider.clone(),
                agent.llm_config.model.clone(),
            )
        };

        tracing::debug!(agent_id = id, prompt_len = prompt.len(), "Invoking agent");
        let started = Instant::now();
        let outcome = tokio::select! {
            result = client.invoke(&full_prompt) => Some(result),
            _ = kill.notified() => None,
        };
        let duration = started.elapsed();

        let Some(result) = outcome else {
            return Err(PoolError::Aborted(id.to_string()));
        };

        let mut state = self.state();
        let PoolState { agents, ledger, .. } = &mut *state;
        let Some(agent) = agents
            .get_mut(id)
            .filter(|a| a.status != AgentStatus::Destroyed)
        else {
            return Err(PoolError::Aborted(id.to_string()));
        };
        agent.running_since = None;

        match result {
            Ok(response) => {
                let cost = self.inner.pricing.cost(
                    &provider,
                    &model,
                    response.tokens_in,
                    response.tokens_out,
                );
                agent.estimated_cost += cost;
                agent.status = AgentStatus::Idle;
                agent.log.push(LogEntry {
                    timestamp: Utc::now(),
                    prompt_chars: full_prompt.len(),
                    response_chars: response.text.len(),
                    tokens_in: response.tokens_in,
                    tokens_out: response.tokens_out,
                    cost,
                    duration,
                    error: None,
                });
                ledger.record(
                    id,
                    agent.context.workflow_id.as_deref(),
                    agent.context.project_id.as_deref(),
                    cost,
                    response.tokens_in,
                    response.tokens_out,
                );

                tracing::debug!(
                    agent_id = id,
                    cost,
                    tokens_in = response.tokens_in,
                    tokens_out = response.tokens_out,
                    duration_ms = duration.as_millis() as u64,
                    "Agent invocation complete"
                );
                Ok(response)
            }
            Err(source) => {
                agent.status = AgentStatus::Error;
                agent.log.push(LogEntry {
                    timestamp: Utc::now(),
                    prompt_chars: full_prompt.len(),
                    response_chars: 0,
                    tokens_in: 0,
                    tokens_out: 0,
                    cost: 0.0,
                    duration,
                    error: Some(source.to_string()),
                });
                drop(state);

                tracing::warn!(agent_id = id, error = %source, "Agent invocation failed");
                self.inner
                    .events
                    .agent_error(id, AgentErrorKind::Failed, source.to_string());
                Err(PoolError::Invocation {
                    agent_id: id.to_string(),
                    source,
                })
            }
        }
    }

    // ========================================================================
    // Destruction
    // ========================================================================

    /// Flush logs, release the client and free the slot
    pub async fn destroy_agent(&self, id: &str) -> Result<(), PoolError> {
        let (client, log, name, cost, elapsed) = {
            let mut state = self.state();
            let agent = state
                .agents
                .get_mut(id)
                .filter(|a| a.status != AgentStatus::Destroyed)
                .ok_or_else(|| PoolError::NotFound(id.to_string()))?;

            if agent.status == AgentStatus::Running {
                agent.kill.notify_one();
            }
            agent.status = AgentStatus::Destroyed;
            (
                agent.client.clone(),
                std::mem::take(&mut agent.log),
                agent.name.clone(),
                agent.estimated_cost,
                agent.started.elapsed(),
            )
        };

        let log_dir = self.inner.config.log_dir.clone();
        let cleanup = async {
            if let Some(dir) = log_dir {
                flush_log(&dir, id, &log).await;
            }
            client.release().await
        };

        match tokio::time::timeout(self.inner.config.destroy_timeout, cleanup).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(agent_id = id, error = %e, "Failed to release agent client");
            }
            Err(_) => {
                tracing::warn!(
                    agent_id = id,
                    timeout_ms = self.inner.config.destroy_timeout.as_millis() as u64,
                    "Agent cleanup timed out, force-removing"
                );
                self.inner.events.agent_error(
                    id,
                    AgentErrorKind::ResourceLeak,
                    "cleanup did not finish within the destroy timeout",
                );
            }
        }

        self.state().agents.remove(id);
        tracing::info!(
            agent_id = id,
            cost,
            duration_ms = elapsed.as_millis() as u64,
            "Agent destroyed"
        );
        self.inner.events.send(OrchestratorEvent::AgentCompleted {
            agent_id: id.to_string(),
            name,
            cost,
            duration: elapsed,
        });

        self.service_queue();
        Ok(())
    }

    /// Force-destroy agents running longer than the hang threshold.
    ///
    /// Returns the ids that were removed.
    pub async fn sweep_hung_agents(&self) -> Vec<String> {
        let threshold = self.inner.config.hang_threshold;
        let hung: Vec<Agent> = {
            let mut state = self.state();
            let ids: Vec<String> = state
                .agents
                .values()
                .filter(|a| {
                    a.status == AgentStatus::Running
                        && a.running_since.is_some_and(|since| since.elapsed() > threshold)
                })
                .map(|a| a.id.clone())
                .collect();
            ids.iter()
                .filter_map(|id| state.agents.remove(id))
                .collect()
        };

        let mut swept = Vec::with_capacity(hung.len());
        for agent in hung {
            agent.kill.notify_one();
            tracing::warn!(
                agent_id = %agent.id,
                threshold_secs = threshold.as_secs(),
                "Agent hung, force-destroying"
            );
            self.inner.events.agent_error(
                &agent.id,
                AgentErrorKind::Hung,
                format!("running longer than {:?}", threshold),
            );

            let release = agent.client.release();
            if tokio::time::timeout(self.inner.config.destroy_timeout, release)
                .await
                .is_err()
            {
                self.inner.events.agent_error(
                    &agent.id,
                    AgentErrorKind::ResourceLeak,
                    "release of hung agent timed out",
                );
            }
            swept.push(agent.id);
        }

        if !swept.is_empty() {
            self.service_queue();
        }
        swept
    }

    /// Start the periodic hung-agent sweep
    pub fn start_health_monitor(&self) -> HealthMonitor {
        HealthMonitor::spawn(
            Arc::downgrade(&self.inner),
            self.inner.config.health_check_interval,
        )
    }

    /// Destroy every agent and fail every queued request
    pub async fn shutdown(&self) {
        let (queued, ids) = {
            let mut state = self.state();
            let queued: Vec<AgentTask> = state.queue.drain(..).collect();
            let ids: Vec<String> = state.agents.keys().cloned().collect();
            (queued, ids)
        };

        for task in queued {
            let _ = task.responder.send(Err(PoolError::Closed));
        }
        for id in ids {
            if let Err(e) = self.destroy_agent(&id).await {
                tracing::debug!(agent_id = %id, error = %e, "Agent already gone during shutdown");
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Live agents, excluding any mid-destruction
    pub fn active_agents(&self) -> Vec<AgentInfo> {
        let mut agents: Vec<AgentInfo> = self
            .state()
            .agents
            .values()
            .filter(|a| a.status != AgentStatus::Destroyed)
            .map(Agent::info)
            .collect();
        agents.sort_by_key(|a| a.start_time);
        agents
    }

    pub fn agent_by_id(&self, id: &str) -> Option<AgentInfo> {
        self.state().agents.get(id).map(Agent::info)
    }

    /// Waiting requests in service order
    pub fn queued_tasks(&self) -> Vec<QueuedTaskInfo> {
        self.state()
            .queue
            .iter()
            .map(|task| QueuedTaskInfo {
                name: task.name.clone(),
                provider: task.llm_config.provider.clone(),
                model: task.llm_config.model.clone(),
                context: task.context.clone(),
                queued_at: task.queued_at,
            })
            .collect()
    }

    pub fn cost_metrics(&self) -> CostMetrics {
        self.state().ledger.clone()
    }

    pub fn reset_ledger(&self) {
        self.state().ledger = CostLedger::default();
    }
}

/// Append an agent's log entries as JSON lines to `<dir>/<agent_id>.jsonl`
async fn flush_log(dir: &Path, agent_id: &str, entries: &[LogEntry]) {
    if entries.is_empty() {
        return;
    }

    let mut buf = String::new();
    for entry in entries {
        match serde_json::to_string(entry) {
            Ok(line) => {
                buf.push_str(&line);
                buf.push('\n');
            }
            Err(e) => tracing::warn!(agent_id, error = %e, "Failed to serialize log entry"),
        }
    }

    let path = dir.join(format!("{}.jsonl", agent_id));
    let result = async {
        tokio::fs::create_dir_all(dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(buf.as_bytes()).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = result {
        tracing::warn!(agent_id, path = %path.display(), error = %e, "Failed to flush agent log");
    }
}
