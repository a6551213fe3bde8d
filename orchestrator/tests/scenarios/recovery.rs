//! Checkpointing, crash recovery and persistence failures

use std::sync::Arc;

use agentflow::{
    EngineConfig, EngineError, FileStateStore, StateStore, WorkflowDefinition, WorkflowEngine,
    WorkflowExecutionState, WorkflowStatus,
};
use serde_json::json;

use crate::common::{plain_steps, scripted_pool, Harness};

#[tokio::test]
async fn test_resume_after_crash_runs_remaining_steps() {
    let harness = Harness::new();
    let document = plain_steps(5);

    // Crash after step 2: the last durable checkpoint says step 2, running
    let mut crashed = WorkflowExecutionState::new("crash");
    crashed.status = WorkflowStatus::Running;
    crashed.current_step_number = 2;
    crashed.variables.insert("carried".to_string(), json!("over"));
    harness.store.save_state(&crashed).await.unwrap();

    let outcome = harness
        .engine("crash", &document, EngineConfig::default())
        .resume_from_state(crashed)
        .await
        .unwrap();

    assert_eq!(outcome.executed_steps, vec![3, 4, 5]);
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.variables.get("carried"), Some(&json!("over")));
}

#[tokio::test]
async fn test_execute_picks_up_stored_checkpoint() {
    let harness = Harness::new();
    let mut paused = WorkflowExecutionState::new("stored");
    paused.status = WorkflowStatus::Paused;
    paused.current_step_number = 3;
    harness.store.save_state(&paused).await.unwrap();

    let outcome = harness
        .engine("stored", &plain_steps(4), EngineConfig::default())
        .execute()
        .await
        .unwrap();
    assert_eq!(outcome.executed_steps, vec![4]);
}

#[tokio::test]
async fn test_resume_of_completed_run_is_noop() {
    let harness = Harness::new();
    let engine = harness.engine("done", &plain_steps(3), EngineConfig::default());

    engine.execute().await.unwrap();
    let final_state = harness.store.load_state("done").await.unwrap().unwrap();
    assert_eq!(final_state.status, WorkflowStatus::Completed);
    let saves = harness.store.history("done").len();

    let outcome = engine.resume_from_state(final_state).await.unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert!(outcome.executed_steps.is_empty());
    assert_eq!(harness.store.history("done").len(), saves);
}

#[tokio::test]
async fn test_checkpoints_advance_monotonically() {
    let harness = Harness::new();
    harness
        .engine("mono", &plain_steps(4), EngineConfig::default())
        .execute()
        .await
        .unwrap();

    let steps = harness.checkpoint_steps("mono");
    assert_eq!(steps, vec![1, 2, 3, 4, 4]);
    assert!(steps.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn test_resume_never_reruns_checkpointed_step() {
    let harness = Harness::new();
    for k in 0..4u32 {
        let id = format!("resume-{k}");
        let mut state = WorkflowExecutionState::new(&id);
        state.current_step_number = k;
        state.status = WorkflowStatus::Paused;

        let outcome = harness
            .engine(&id, &plain_steps(4), EngineConfig::default())
            .resume_from_state(state)
            .await
            .unwrap();
        assert_eq!(outcome.executed_steps.first(), Some(&(k + 1)));
    }
}

#[tokio::test]
async fn test_pending_jump_survives_crash() {
    let harness = Harness::new();
    let mut state = WorkflowExecutionState::new("pending-jump");
    state.current_step_number = 3;
    state.jump_target = Some(1);
    state.jumps_taken = 1;

    let outcome = harness
        .engine("pending-jump", &plain_steps(3), EngineConfig::default())
        .resume_from_state(state)
        .await
        .unwrap();
    assert_eq!(outcome.executed_steps, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_foreign_or_invalid_checkpoint_restarts() {
    let harness = Harness::new();

    let foreign = WorkflowExecutionState::new("someone-else");
    let outcome = harness
        .engine("mine", &plain_steps(2), EngineConfig::default())
        .resume_from_state(foreign)
        .await
        .unwrap();
    assert_eq!(outcome.executed_steps, vec![1, 2]);

    let mut beyond = WorkflowExecutionState::new("short");
    beyond.current_step_number = 7;
    let outcome = harness
        .engine("short", &plain_steps(2), EngineConfig::default())
        .resume_from_state(beyond)
        .await
        .unwrap();
    assert_eq!(outcome.executed_steps, vec![1, 2]);
}

#[tokio::test]
async fn test_transient_save_failures_are_retried() {
    let harness = Harness::new();
    harness.store.fail_next_saves(2);

    let outcome = harness
        .engine("flaky-store", &plain_steps(2), EngineConfig::default())
        .execute()
        .await
        .unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(harness.checkpoint_steps("flaky-store"), vec![1, 2, 2]);
}

#[tokio::test]
async fn test_persistent_save_failure_is_fatal() {
    let harness = Harness::new();
    harness.store.fail_next_saves(100);

    let err = harness
        .engine("dead-store", &plain_steps(3), EngineConfig::default())
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::State { attempts: 3, .. }));
    assert!(harness.store.history("dead-store").is_empty());
}

#[tokio::test]
async fn test_file_store_round_trip_across_engines() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(dir.path()));
    let (pool, _) = scripted_pool(2);
    let document = r#"
<step n="1" goal="One"><output>1</output></step>
<step n="2" goal="Ask"><ask var="name">Name?</ask></step>
<step n="3" goal="Greet"><output>Hi {{name}}</output></step>
"#;

    let first = WorkflowEngine::new(
        WorkflowDefinition::from_document("greet", document),
        pool.clone(),
        store.clone(),
    );
    assert_eq!(first.execute().await.unwrap().status, WorkflowStatus::Paused);
    assert!(dir.path().join("greet.json").exists());

    let second = WorkflowEngine::new(
        WorkflowDefinition::from_document("greet", document),
        pool,
        store.clone(),
    )
    .with_input_provider(Harness::answers(&["Ada"]));
    let outcome = second.execute().await.unwrap();

    assert_eq!(outcome.executed_steps, vec![2, 3]);
    let stored = store.load_state("greet").await.unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::Completed);
    assert_eq!(stored.variables.get("name"), Some(&json!("Ada")));
}

#[tokio::test]
async fn test_transient_load_failure_is_retried_not_restarted() {
    let harness = Harness::new();
    let mut paused = WorkflowExecutionState::new("flaky-load");
    paused.status = WorkflowStatus::Paused;
    paused.current_step_number = 2;
    harness.store.save_state(&paused).await.unwrap();
    harness.store.fail_next_loads(1);

    let outcome = harness
        .engine("flaky-load", &plain_steps(4), EngineConfig::default())
        .execute()
        .await
        .unwrap();

    assert_eq!(outcome.executed_steps, vec![3, 4]);
    assert_eq!(harness.checkpoint_steps("flaky-load"), vec![2, 3, 4, 4]);
}

#[tokio::test]
async fn test_persistent_load_failure_is_fatal() {
    let harness = Harness::new();
    let mut paused = WorkflowExecutionState::new("dead-load");
    paused.status = WorkflowStatus::Paused;
    paused.current_step_number = 2;
    harness.store.save_state(&paused).await.unwrap();
    harness.store.fail_next_loads(100);

    let err = harness
        .engine("dead-load", &plain_steps(4), EngineConfig::default())
        .execute()
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::State { attempts: 3, .. }));
    // The stored checkpoint was not overwritten
    assert_eq!(harness.checkpoint_steps("dead-load"), vec![2]);
}

#[tokio::test]
async fn test_corrupt_checkpoint_restarts_from_first_step() {
    let dir = tempfile::tempdir().unwrap();
    let file_store = FileStateStore::new(dir.path());
    std::fs::write(file_store.path_for("corrupt"), "{ not json").unwrap();
    let store: Arc<dyn StateStore> = Arc::new(file_store);
    let (pool, _) = scripted_pool(1);

    let outcome = WorkflowEngine::new(
        WorkflowDefinition::from_document("corrupt", plain_steps(2)),
        pool,
        store.clone(),
    )
    .execute()
    .await
    .unwrap();

    assert_eq!(outcome.executed_steps, vec![1, 2]);
    let stored = store.load_state("corrupt").await.unwrap().unwrap();
    assert_eq!(stored.status, WorkflowStatus::Completed);
}
