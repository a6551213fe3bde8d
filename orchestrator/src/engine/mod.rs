//! Workflow execution engine
//!
//! Drives one workflow run: parse the instruction document once, then walk
//! the steps in order, resolving variables and evaluating conditions right
//! before each action, borrowing agents from the shared pool when a step
//! needs model work, and checkpointing through the [`StateStore`] after
//! every step.
//!
//! Runs move through `initializing → running → (paused | completed | error)`.
//! A stored checkpoint for the same workflow id is resumed automatically.

pub mod checkpoint;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::{ProjectConfig, StaticConfig};
use crate::error::{EngineError, StateError, StepError};
use crate::events::EventSink;
use crate::pool::{AgentContext, AgentInfo, AgentPool};
use crate::retry::{retry_with_backoff, RetryPolicy};
use crate::state::{StateStore, WorkflowExecutionState, WorkflowStatus};
use crate::tasks::TaskDefinition;
use crate::workflow::loader::file_stem;
use crate::workflow::{
    evaluate, parse, resolve, resolve_lenient, Action, ActionKind, FileWorkflowLoader, Layer,
    Step, StepItem, VariableContext, WorkflowDefinition, WorkflowLoader,
};
use checkpoint::{
    AutoApproveCheckpointHandler, Checkpoint, CheckpointHandler, CheckpointResult, InputProvider,
    InputRequest, NoInput,
};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Skip optional steps and interactive prompts, auto-approve output
    pub yolo: bool,

    /// Goto jumps allowed in one run before it fails
    pub max_goto_jumps: u32,

    /// Deepest allowed `<invoke-workflow>` chain
    pub max_nesting_depth: usize,

    /// Agent used by steps that do not name one
    pub default_agent: Option<String>,

    /// Billed alongside the workflow id in the cost ledger
    pub project_id: Option<String>,

    /// Exposed as `{project-root}`; relative paths resolve against it
    pub project_root: Option<PathBuf>,

    /// Retry policy for checkpoint writes
    pub save_retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            yolo: false,
            max_goto_jumps: 25,
            max_nesting_depth: 8,
            default_agent: None,
            project_id: None,
            project_root: None,
            save_retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_yolo(mut self, yolo: bool) -> Self {
        self.yolo = yolo;
        self
    }

    pub fn with_max_goto_jumps(mut self, max: u32) -> Self {
        self.max_goto_jumps = max;
        self
    }

    pub fn with_max_nesting_depth(mut self, max: usize) -> Self {
        self.max_nesting_depth = max;
        self
    }

    pub fn with_default_agent(mut self, agent: impl Into<String>) -> Self {
        self.default_agent = Some(agent.into());
        self
    }

    pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    pub fn with_save_retry(mut self, retry: RetryPolicy) -> Self {
        self.save_retry = retry;
        self
    }
}

/// Cooperative cancellation, honoured between steps
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a run ended (for now)
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOutcome {
    pub workflow_id: String,
    pub status: WorkflowStatus,
    /// Last step that finished
    pub current_step_number: u32,
    /// Runtime variables at the end of the run
    pub variables: Map<String, Value>,
    /// Steps whose items ran during this call, in order
    pub executed_steps: Vec<u32>,
    /// Steps skipped in yolo mode during this call
    pub skipped_steps: Vec<u32>,
}

impl WorkflowOutcome {
    fn from_state(state: &WorkflowExecutionState, executed: Vec<u32>, skipped: Vec<u32>) -> Self {
        Self {
            workflow_id: state.workflow_id.clone(),
            status: state.status,
            current_step_number: state.current_step_number,
            variables: state.variables.clone(),
            executed_steps: executed,
            skipped_steps: skipped,
        }
    }
}

/// What the step loop does after an action or step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepFlow {
    Continue,
    Jump(u32),
    Pause,
}

/// A fatal action error with the content that caused it
struct ActionFailure {
    content: String,
    source: StepError,
}

type BoxedRun<'a> = Pin<Box<dyn Future<Output = Result<WorkflowOutcome, EngineError>> + Send + 'a>>;

// ============================================================================
// Engine
// ============================================================================

/// Executes one workflow definition
pub struct WorkflowEngine {
    definition: WorkflowDefinition,
    config: EngineConfig,
    pool: AgentPool,
    store: Arc<dyn StateStore>,
    project: Arc<dyn ProjectConfig>,
    loader: Arc<dyn WorkflowLoader>,
    checkpoints: Arc<dyn CheckpointHandler>,
    input: Arc<dyn InputProvider>,
    events: EventSink,
    cancel: CancellationFlag,
    depth: usize,
}

impl WorkflowEngine {
    /// Engine with non-interactive defaults: template output is approved
    /// and questions without input pause the run
    pub fn new(definition: WorkflowDefinition, pool: AgentPool, store: Arc<dyn StateStore>) -> Self {
        Self {
            definition,
            config: EngineConfig::default(),
            pool,
            store,
            project: Arc::new(StaticConfig::default()),
            loader: Arc::new(FileWorkflowLoader::new()),
            checkpoints: Arc::new(AutoApproveCheckpointHandler),
            input: Arc::new(NoInput),
            events: EventSink::none(),
            cancel: CancellationFlag::new(),
            depth: 0,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_project_config(mut self, project: Arc<dyn ProjectConfig>) -> Self {
        self.project = project;
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn WorkflowLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn with_checkpoint_handler(mut self, handler: Arc<dyn CheckpointHandler>) -> Self {
        self.checkpoints = handler;
        self
    }

    pub fn with_input_provider(mut self, input: Arc<dyn InputProvider>) -> Self {
        self.input = input;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn workflow_id(&self) -> &str {
        &self.definition.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn child(&self, definition: WorkflowDefinition) -> Self {
        Self {
            definition,
            config: self.config.clone(),
            pool: self.pool.clone(),
            store: self.store.clone(),
            project: self.project.clone(),
            loader: self.loader.clone(),
            checkpoints: self.checkpoints.clone(),
            input: self.input.clone(),
            events: self.events.clone(),
            cancel: self.cancel.clone(),
            depth: self.depth + 1,
        }
    }

    // ========================================================================
    // Entry points
    // ========================================================================

    /// Run the workflow, resuming a stored checkpoint if there is one
    pub async fn execute(&self) -> Result<WorkflowOutcome, EngineError> {
        let steps = parse(&self.definition.instructions)?;
        let id = self.workflow_id();

        let stored = retry_with_backoff(
            &self.config.save_retry,
            || self.store.load_state(id),
            |e| !matches!(e, StateError::Serialization(_)),
        )
        .await;

        match stored {
            Ok(Some(state)) => {
                tracing::info!(
                    workflow_id = id,
                    step = state.current_step_number,
                    status = %state.status,
                    "Found stored checkpoint"
                );
                self.run_from_state(&steps, state).await
            }
            Ok(None) => self.run_fresh(&steps).await,
            Err(e) if matches!(e.last_error, StateError::Serialization(_)) => {
                tracing::warn!(
                    workflow_id = id,
                    error = %e.last_error,
                    "Corrupt checkpoint, restarting from step 1"
                );
                self.run_fresh(&steps).await
            }
            Err(e) => Err(EngineError::State {
                attempts: e.attempts,
                source: e.last_error,
            }),
        }
    }

    /// Continue from an explicit checkpoint
    pub async fn resume_from_state(
        &self,
        state: WorkflowExecutionState,
    ) -> Result<WorkflowOutcome, EngineError> {
        let steps = parse(&self.definition.instructions)?;
        self.run_from_state(&steps, state).await
    }

    fn execute_boxed(&self) -> BoxedRun<'_> {
        Box::pin(self.execute())
    }

    async fn run_fresh(&self, steps: &[Step]) -> Result<WorkflowOutcome, EngineError> {
        let mut state = WorkflowExecutionState::new(self.workflow_id());
        self.events
            .status(self.workflow_id(), WorkflowStatus::Initializing, 0);
        state.status = WorkflowStatus::Running;
        self.run_loop(steps, state, 1).await
    }

    async fn run_from_state(
        &self,
        steps: &[Step],
        state: WorkflowExecutionState,
    ) -> Result<WorkflowOutcome, EngineError> {
        let id = self.workflow_id();

        if state.workflow_id != id {
            tracing::warn!(
                workflow_id = id,
                stored = %state.workflow_id,
                "Checkpoint belongs to another workflow, restarting from step 1"
            );
            return self.run_fresh(steps).await;
        }

        if state.status == WorkflowStatus::Completed {
            tracing::info!(workflow_id = id, "Workflow already completed, nothing to do");
            return Ok(WorkflowOutcome::from_state(&state, Vec::new(), Vec::new()));
        }

        let last = steps.len() as u32;
        let valid_target = state.jump_target.map_or(true, |t| (1..=last).contains(&t));
        if state.current_step_number > last || !valid_target {
            tracing::warn!(
                workflow_id = id,
                step = state.current_step_number,
                jump_target = ?state.jump_target,
                steps = last,
                "Checkpoint does not fit this workflow, restarting from step 1"
            );
            return self.run_fresh(steps).await;
        }

        let next = state.next_step();
        tracing::info!(workflow_id = id, next_step = next, "Resuming workflow");

        let mut state = state;
        state.status = WorkflowStatus::Running;
        state.error = None;
        self.run_loop(steps, state, next).await
    }

    // ========================================================================
    // Step loop
    // ========================================================================

    async fn run_loop(
        &self,
        steps: &[Step],
        mut state: WorkflowExecutionState,
        first_step: u32,
    ) -> Result<WorkflowOutcome, EngineError> {
        let id = self.workflow_id().to_string();
        let mut ctx = self.build_context(state.variables.clone());
        let mut checkpoint = state.clone();
        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut number = first_step;
        state.jump_target = None;

        self.events
            .status(&id, WorkflowStatus::Running, state.current_step_number);

        while let Some(step) = steps.get((number as usize).wrapping_sub(1)) {
            if self.cancel.is_cancelled() {
                tracing::info!(workflow_id = %id, step = number, "Cancelled, pausing");
                return Ok(self.pause(checkpoint, executed, skipped).await);
            }

            let skip = self.config.yolo && step.skippable_in_yolo();
            let flow = if skip {
                tracing::info!(workflow_id = %id, step = step.number, "Skipping optional step (yolo)");
                skipped.push(step.number);
                StepFlow::Continue
            } else {
                tracing::info!(workflow_id = %id, "Executing {}", step.label());
                executed.push(step.number);
                match self.run_step(step, steps, &mut ctx, &mut state).await {
                    Ok(flow) => flow,
                    Err(failure) => {
                        return Err(self.fail(step.number, failure, &ctx, checkpoint).await);
                    }
                }
            };

            if flow == StepFlow::Pause {
                return Ok(self.pause(checkpoint, executed, skipped).await);
            }

            state.current_step_number = step.number;
            state.variables = ctx.runtime().clone();
            state.jump_target = match flow {
                StepFlow::Jump(target) => Some(target),
                _ => None,
            };
            state.touch();
            self.save(&state).await?;

            checkpoint = state.clone();
            self.events.step_completed(&id, step.number, skip);

            number = state.jump_target.take().unwrap_or(step.number + 1);
        }

        state.status = WorkflowStatus::Completed;
        state.touch();
        self.save(&state).await?;
        self.events
            .status(&id, WorkflowStatus::Completed, state.current_step_number);
        tracing::info!(workflow_id = %id, "Workflow completed");

        Ok(WorkflowOutcome::from_state(&state, executed, skipped))
    }

    async fn run_step(
        &self,
        step: &Step,
        steps: &[Step],
        ctx: &mut VariableContext,
        state: &mut WorkflowExecutionState,
    ) -> Result<StepFlow, ActionFailure> {
        let mut agent: Option<AgentInfo> = None;
        let result = self.run_items(step, steps, ctx, state, &mut agent).await;
        self.release_agent(&mut agent).await;
        result
    }

    async fn release_agent(&self, slot: &mut Option<AgentInfo>) {
        if let Some(agent) = slot.take() {
            if let Err(e) = self.pool.destroy_agent(&agent.id).await {
                tracing::warn!(agent_id = %agent.id, error = %e, "Failed to destroy step agent");
            }
        }
    }

    async fn run_items(
        &self,
        step: &Step,
        steps: &[Step],
        ctx: &mut VariableContext,
        state: &mut WorkflowExecutionState,
        agent: &mut Option<AgentInfo>,
    ) -> Result<StepFlow, ActionFailure> {
        let mut stack = vec![step.items().into_iter()];

        loop {
            let Some(top) = stack.last_mut() else {
                return Ok(StepFlow::Continue);
            };
            let Some(item) = top.next() else {
                stack.pop();
                continue;
            };

            match item {
                StepItem::Check(check) => {
                    let holds = evaluate(&check.condition, ctx).map_err(|e| ActionFailure {
                        content: check.condition.clone(),
                        source: e.into(),
                    })?;
                    tracing::debug!(step = step.number, condition = %check.condition, holds, "Check");
                    if holds {
                        stack.push(check.items().into_iter());
                    }
                }
                StepItem::Action(action) => {
                    let flow = self
                        .run_action(step, action, steps, ctx, state, agent)
                        .await
                        .map_err(|source| ActionFailure {
                            content: action.content.clone(),
                            source,
                        })?;
                    if flow != StepFlow::Continue {
                        return Ok(flow);
                    }
                }
            }
        }
    }

    async fn run_action(
        &self,
        step: &Step,
        action: &Action,
        steps: &[Step],
        ctx: &mut VariableContext,
        state: &mut WorkflowExecutionState,
        agent: &mut Option<AgentInfo>,
    ) -> Result<StepFlow, StepError> {
        let id = self.workflow_id();

        if let Some(condition) = &action.condition {
            if !evaluate(condition, ctx)? {
                tracing::debug!(step = step.number, action = action.kind.tag(), "Condition false, skipping");
                return Ok(StepFlow::Continue);
            }
        }

        let content = match resolve(&action.content, ctx) {
            Ok(content) => content,
            Err(e) if !step.is_critical() => {
                tracing::warn!(
                    workflow_id = id,
                    step = step.number,
                    action = action.kind.tag(),
                    error = %e,
                    "Skipping action in non-critical step"
                );
                return Ok(StepFlow::Continue);
            }
            Err(e) => return Err(e.into()),
        };

        match &action.kind {
            ActionKind::Action { var } => {
                let agent_name = step.agent.as_ref().or(self.config.default_agent.as_ref());
                let Some(agent_name) = agent_name else {
                    tracing::info!(workflow_id = id, step = step.number, "Action: {}", content);
                    return Ok(StepFlow::Continue);
                };

                let agent_id = self.ensure_agent(agent_name, step, agent).await?;
                let response = self.pool.invoke_agent(&agent_id, &content).await?;

                if let Some(var) = var {
                    ctx.set(Layer::Runtime, var.clone(), response.text.clone());
                }
                ctx.set(
                    Layer::Runtime,
                    format!("step_{}_output", step.number),
                    response.text.clone(),
                );
                ctx.set(Layer::Runtime, "last_agent_output", response.text);
            }

            ActionKind::Output => {
                tracing::info!(workflow_id = id, step = step.number, "Output: {}", content);
                self.events.output(id, step.number, &content);
            }

            ActionKind::TemplateOutput => {
                self.events.output(id, step.number, &content);
                ctx.set(Layer::Runtime, "last_template_output", content.clone());

                if !self.config.yolo {
                    let checkpoint = Checkpoint::new(id, step.number, "Approve this section?")
                        .with_content(&content);
                    match self.checkpoints.handle(&checkpoint) {
                        CheckpointResult::Approved => {}
                        CheckpointResult::ApprovedWithNote(note) => {
                            ctx.set(Layer::Runtime, "checkpoint_note", note);
                        }
                        CheckpointResult::Edit(edited) => {
                            ctx.set(Layer::Runtime, "last_template_output", edited);
                        }
                        CheckpointResult::Rejected => {
                            tracing::info!(workflow_id = id, step = step.number, "Template output rejected");
                            return Ok(StepFlow::Pause);
                        }
                    }
                }
            }

            ActionKind::Ask { var, default } | ActionKind::ElicitRequired { var, default } => {
                if self.config.yolo {
                    tracing::info!(
                        workflow_id = id,
                        step = step.number,
                        action = action.kind.tag(),
                        "Skipping prompt (yolo): {}",
                        content
                    );
                    if let (Some(var), Some(default)) = (var, default) {
                        ctx.set(Layer::Runtime, var.clone(), resolve_lenient(default, ctx));
                    }
                    return Ok(StepFlow::Continue);
                }

                let request = InputRequest {
                    workflow_id: id.to_string(),
                    step: step.number,
                    prompt: content,
                    var: var.clone(),
                    default: default.as_ref().map(|d| resolve_lenient(d, ctx)),
                    required: matches!(action.kind, ActionKind::ElicitRequired { .. }),
                };
                match self.input.provide(&request) {
                    Some(answer) => {
                        let key = var.clone().unwrap_or_else(|| "last_answer".to_string());
                        ctx.set(Layer::Runtime, key, answer);
                    }
                    None => {
                        tracing::info!(workflow_id = id, step = step.number, "No input available, pausing");
                        return Ok(StepFlow::Pause);
                    }
                }
            }

            ActionKind::Goto { target } => {
                if state.jumps_taken >= self.config.max_goto_jumps {
                    return Err(StepError::GotoLimitExceeded {
                        limit: self.config.max_goto_jumps,
                    });
                }
                if !steps.iter().any(|s| s.number == *target) {
                    return Err(StepError::InvalidGoto { target: *target });
                }
                state.jumps_taken += 1;
                tracing::info!(workflow_id = id, from = step.number, to = target, "Goto");
                return Ok(StepFlow::Jump(*target));
            }

            // A step holds no agent while a nested run or task waits on the pool
            ActionKind::InvokeWorkflow { path } => {
                self.release_agent(agent).await;
                return self.invoke_workflow(path, ctx).await;
            }

            ActionKind::InvokeTask { path } => {
                self.release_agent(agent).await;
                self.invoke_task(path, step, ctx).await?;
            }
        }

        Ok(StepFlow::Continue)
    }

    // ========================================================================
    // Agents, nested workflows, tasks
    // ========================================================================

    fn agent_context(&self, step: u32) -> AgentContext {
        let mut context = AgentContext::for_workflow(self.workflow_id()).with_step(step);
        context.project_id = self.config.project_id.clone();
        context
    }

    async fn ensure_agent(
        &self,
        name: &str,
        step: &Step,
        slot: &mut Option<AgentInfo>,
    ) -> Result<String, StepError> {
        if let Some(agent) = slot {
            return Ok(agent.id.clone());
        }

        let llm_config = self.project.agent_assignment(name);
        let info = self
            .pool
            .create_agent(name, llm_config, self.agent_context(step.number))
            .await?;
        let id = info.id.clone();
        *slot = Some(info);
        Ok(id)
    }

    async fn invoke_workflow(&self, path: &str, ctx: &mut VariableContext) -> Result<StepFlow, StepError> {
        if self.depth + 1 > self.config.max_nesting_depth {
            return Err(StepError::NestingTooDeep {
                limit: self.config.max_nesting_depth,
            });
        }

        let path = self.resolve_path(&resolve(path, ctx)?);
        let mut definition = self.loader.load(&path)?;
        definition.id = format!("{}/{}", self.workflow_id(), file_stem(&path));

        // Caller's workflow and runtime values are visible to the nested
        // workflow unless it declares its own
        for (key, value) in ctx.runtime().iter().chain(ctx.layer(Layer::Workflow)) {
            definition
                .variables
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }

        tracing::info!(
            workflow_id = self.workflow_id(),
            nested = %definition.id,
            depth = self.depth + 1,
            "Invoking nested workflow"
        );
        let child = self.child(definition);
        let outcome = child
            .execute_boxed()
            .await
            .map_err(|e| StepError::NestedWorkflow(Box::new(e)))?;

        match outcome.status {
            WorkflowStatus::Completed => {
                ctx.extend(Layer::Runtime, outcome.variables);
                // Forget the finished run so a later invocation starts over
                if let Err(e) = self.store.clear_state(child.workflow_id()).await {
                    tracing::warn!(nested = child.workflow_id(), error = %e, "Failed to clear nested checkpoint");
                }
                Ok(StepFlow::Continue)
            }
            _ => Ok(StepFlow::Pause),
        }
    }

    async fn invoke_task(
        &self,
        path: &str,
        step: &Step,
        ctx: &mut VariableContext,
    ) -> Result<(), StepError> {
        let path = self.resolve_path(&resolve(path, ctx)?);
        let task = TaskDefinition::from_toml_file(&path)?;
        tracing::info!(workflow_id = self.workflow_id(), task = %task.name, "Running task");

        if let (Some(agent_name), Some(prompt)) = (&task.agent, &task.prompt) {
            let prompt = resolve(prompt, ctx)?;
            let info = self
                .pool
                .create_agent(
                    agent_name,
                    self.project.agent_assignment(agent_name),
                    self.agent_context(step.number),
                )
                .await?;
            let result = self.pool.invoke_agent(&info.id, &prompt).await;
            if let Err(e) = self.pool.destroy_agent(&info.id).await {
                tracing::warn!(agent_id = %info.id, error = %e, "Failed to destroy task agent");
            }
            ctx.set(Layer::Runtime, task.output_var(), result?.text);
        }

        for (key, value) in task.static_outputs() {
            let value = match value {
                Value::String(s) => Value::String(resolve_lenient(&s, ctx)),
                other => other,
            };
            ctx.set(Layer::Runtime, key, value);
        }
        Ok(())
    }

    /// Relative paths resolve against the workflow's own directory, then
    /// the project root
    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            return path.to_path_buf();
        }
        if let Some(dir) = &self.definition.source_dir {
            let candidate = dir.join(path);
            if candidate.exists() {
                return candidate;
            }
        }
        match &self.config.project_root {
            Some(root) => root.join(path),
            None => path.to_path_buf(),
        }
    }

    // ========================================================================
    // Context and persistence
    // ========================================================================

    fn build_context(&self, runtime: Map<String, Value>) -> VariableContext {
        let mut ctx = VariableContext::new();

        ctx.set(
            Layer::System,
            "date",
            chrono::Local::now().format("%Y-%m-%d").to_string(),
        );
        ctx.set(Layer::System, "workflow_id", self.workflow_id());
        ctx.set(Layer::System, "workflow_name", self.definition.name.as_str());
        ctx.set(Layer::System, "yolo", self.config.yolo);

        if let Some(root) = &self.config.project_root {
            ctx.set(Layer::Path, "project-root", root.to_string_lossy().to_string());
        }
        if let Some(dir) = &self.definition.source_dir {
            ctx.set(Layer::Path, "installed-path", dir.to_string_lossy().to_string());
        }

        ctx.replace_layer(Layer::Config, self.project.variables());

        let mut workflow_vars = Map::new();
        for (key, value) in &self.definition.variables {
            let value = match value {
                Value::String(s) => Value::String(resolve_lenient(s, &ctx)),
                other => other.clone(),
            };
            workflow_vars.insert(key.clone(), value);
        }
        ctx.replace_layer(Layer::Workflow, workflow_vars);

        ctx.replace_layer(Layer::Runtime, runtime);
        ctx
    }

    async fn save(&self, state: &WorkflowExecutionState) -> Result<(), EngineError> {
        retry_with_backoff(
            &self.config.save_retry,
            || self.store.save_state(state),
            |_| true,
        )
        .await
        .map_err(|e| EngineError::State {
            attempts: e.attempts,
            source: e.last_error,
        })
    }

    async fn pause(
        &self,
        mut checkpoint: WorkflowExecutionState,
        executed: Vec<u32>,
        skipped: Vec<u32>,
    ) -> WorkflowOutcome {
        checkpoint.status = WorkflowStatus::Paused;
        checkpoint.touch();
        if let Err(e) = self.save(&checkpoint).await {
            tracing::warn!(workflow_id = self.workflow_id(), error = %e, "Failed to persist paused checkpoint");
        }
        self.events.status(
            self.workflow_id(),
            WorkflowStatus::Paused,
            checkpoint.current_step_number,
        );
        WorkflowOutcome::from_state(&checkpoint, executed, skipped)
    }

    /// Persist the last good checkpoint as failed and build the error
    async fn fail(
        &self,
        step: u32,
        failure: ActionFailure,
        ctx: &VariableContext,
        mut checkpoint: WorkflowExecutionState,
    ) -> EngineError {
        tracing::error!(
            workflow_id = self.workflow_id(),
            step,
            error = %failure.source,
            "Step failed"
        );

        checkpoint.status = WorkflowStatus::Error;
        checkpoint.error = Some(failure.source.to_string());
        checkpoint.touch();
        if let Err(e) = self.save(&checkpoint).await {
            tracing::warn!(workflow_id = self.workflow_id(), error = %e, "Failed to persist error checkpoint");
        }
        self.events.status(
            self.workflow_id(),
            WorkflowStatus::Error,
            checkpoint.current_step_number,
        );

        EngineError::StepFailed {
            step,
            content: failure.content,
            known_variables: ctx.known_keys(),
            source: failure.source,
        }
    }
}
