//! Checkpoint persistence
//!
//! The engine writes a [`WorkflowExecutionState`] after every step. The
//! file store writes and fsyncs a temp file, renames it into place, and
//! serializes writes per workflow id so concurrent saves never interleave.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::AsyncWriteExt;

use crate::error::StateError;

/// Lifecycle of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Initializing,
    Running,
    Paused,
    Completed,
    Error,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initializing => "initializing",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Persisted checkpoint of a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionState {
    pub workflow_id: String,
    /// Last step that finished; 0 before the first one does
    pub current_step_number: u32,
    pub status: WorkflowStatus,
    /// Runtime variables only
    #[serde(default)]
    pub variables: Map<String, Value>,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    /// Step to continue at instead of `current_step_number + 1`
    #[serde(default)]
    pub jump_target: Option<u32>,
    #[serde(default)]
    pub jumps_taken: u32,
    #[serde(default)]
    pub error: Option<String>,
}

impl WorkflowExecutionState {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            current_step_number: 0,
            status: WorkflowStatus::Initializing,
            variables: Map::new(),
            start_time: now,
            last_update: now,
            jump_target: None,
            jumps_taken: 0,
            error: None,
        }
    }

    /// Step a resumed run continues at
    pub fn next_step(&self) -> u32 {
        self.jump_target
            .unwrap_or(self.current_step_number.saturating_add(1))
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }
}

/// Where checkpoints live
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn save_state(&self, state: &WorkflowExecutionState) -> Result<(), StateError>;

    async fn load_state(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowExecutionState>, StateError>;

    /// Forget a workflow's checkpoint
    async fn clear_state(&self, workflow_id: &str) -> Result<(), StateError>;
}

// ============================================================================
// File store
// ============================================================================

/// JSON checkpoints, one file per workflow id
pub struct FileStateStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl FileStateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Checkpoint path for a workflow id; nested ids (`parent/child`) map
    /// to flat file names
    pub fn path_for(&self, workflow_id: &str) -> PathBuf {
        let name: String = workflow_id
            .replace('/', "__")
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    fn lock_for(&self, workflow_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, StateError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| StateError::Unavailable("state lock poisoned".to_string()))?;
        Ok(locks.entry(workflow_id.to_string()).or_default().clone())
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StateError + '_ {
        move |source| StateError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn save_state(&self, state: &WorkflowExecutionState) -> Result<(), StateError> {
        let lock = self.lock_for(&state.workflow_id)?;
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(Self::io_error(&self.dir))?;

        let path = self.path_for(&state.workflow_id);
        let tmp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(state)?;

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(Self::io_error(&tmp_path))?;
        file.write_all(&bytes)
            .await
            .map_err(Self::io_error(&tmp_path))?;
        file.sync_all().await.map_err(Self::io_error(&tmp_path))?;
        drop(file);
        tokio::fs::rename(&tmp_path, &path)
            .await
            .map_err(Self::io_error(&path))?;

        tracing::trace!(
            workflow_id = %state.workflow_id,
            step = state.current_step_number,
            status = %state.status,
            "Checkpoint written"
        );
        Ok(())
    }

    async fn load_state(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowExecutionState>, StateError> {
        let path = self.path_for(workflow_id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::io_error(&path)(e)),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    async fn clear_state(&self, workflow_id: &str) -> Result<(), StateError> {
        let lock = self.lock_for(workflow_id)?;
        let _guard = lock.lock().await;

        let path = self.path_for(workflow_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path)(e)),
        }
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Keeps checkpoints in memory, recording every save
#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    states: HashMap<String, WorkflowExecutionState>,
    history: Vec<WorkflowExecutionState>,
    failures_remaining: u32,
    load_failures_remaining: u32,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` saves fail
    pub fn fail_next_saves(&self, count: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failures_remaining = count;
        }
    }

    /// Make the next `count` loads fail
    pub fn fail_next_loads(&self, count: u32) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.load_failures_remaining = count;
        }
    }

    /// Every successful save for a workflow, oldest first
    pub fn history(&self, workflow_id: &str) -> Vec<WorkflowExecutionState> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .history
                    .iter()
                    .filter(|s| s.workflow_id == workflow_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, StateError> {
        self.inner
            .lock()
            .map_err(|_| StateError::Unavailable("memory store poisoned".to_string()))
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn save_state(&self, state: &WorkflowExecutionState) -> Result<(), StateError> {
        let mut inner = self.guard()?;
        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            return Err(StateError::Unavailable("injected save failure".to_string()));
        }
        inner.history.push(state.clone());
        inner
            .states
            .insert(state.workflow_id.clone(), state.clone());
        Ok(())
    }

    async fn load_state(
        &self,
        workflow_id: &str,
    ) -> Result<Option<WorkflowExecutionState>, StateError> {
        let mut inner = self.guard()?;
        if inner.load_failures_remaining > 0 {
            inner.load_failures_remaining -= 1;
            return Err(StateError::Unavailable("injected load failure".to_string()));
        }
        Ok(inner.states.get(workflow_id).cloned())
    }

    async fn clear_state(&self, workflow_id: &str) -> Result<(), StateError> {
        self.guard()?.states.remove(workflow_id);
        Ok(())
    }
}
