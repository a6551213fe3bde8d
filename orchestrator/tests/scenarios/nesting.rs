//! `<invoke-workflow>` and `<invoke-task>`

use std::time::Duration;

use agentflow::workflow::FileWorkflowLoader;
use agentflow::{
    EngineConfig, EngineError, StateStore, StepError, WorkflowDefinition, WorkflowLoader,
    WorkflowStatus,
};
use serde_json::json;

use crate::common::Harness;

#[tokio::test]
async fn test_nested_workflow_shares_variables() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("child.md"),
        r#"
<step n="1" goal="Pick">
  <ask var="branch" default="feature/{{ticket}}">Branch?</ask>
</step>
"#,
    )
    .unwrap();

    let parent = r#"
<step n="1" goal="Delegate"><invoke-workflow path="child.md"/></step>
<step n="2" goal="Use"><output>On {{branch}}</output></step>
"#;
    let harness = Harness::new();
    let definition = WorkflowDefinition::from_document("parent", parent)
        .with_variable("ticket", "T-7")
        .with_source_dir(dir.path());

    let outcome = harness
        .engine_for(definition, EngineConfig::default().with_yolo(true))
        .execute()
        .await
        .unwrap();

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.variables.get("branch"), Some(&json!("feature/T-7")));
    assert!(!harness.store.history("parent/child").is_empty());
    // Finished nested runs are forgotten so the next invocation starts over
    assert!(harness.store.load_state("parent/child").await.unwrap().is_none());
}

#[tokio::test]
async fn test_nested_failure_fails_calling_step() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("broken.md"),
        r#"<step n="1" goal="Boom"><output>{{undefined_thing}}</output></step>"#,
    )
    .unwrap();

    let harness = Harness::new();
    let definition = WorkflowDefinition::from_document(
        "caller",
        r#"<step n="1" goal="Call"><invoke-workflow path="broken.md"/></step>"#,
    )
    .with_source_dir(dir.path());

    let err = harness
        .engine_for(definition, EngineConfig::default())
        .execute()
        .await
        .unwrap_err();

    match err {
        EngineError::StepFailed {
            step: 1,
            source: StepError::NestedWorkflow(inner),
            ..
        } => assert_eq!(inner.step(), Some(1)),
        other => panic!("unexpected error: {other}"),
    }
    let child = harness.store.load_state("caller/broken").await.unwrap().unwrap();
    assert_eq!(child.status, WorkflowStatus::Error);
}

#[tokio::test]
async fn test_recursive_workflow_hits_depth_cap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("again.md");
    std::fs::write(
        &path,
        r#"<step n="1" goal="Recurse"><invoke-workflow path="again.md"/></step>"#,
    )
    .unwrap();

    let harness = Harness::new();
    let definition = FileWorkflowLoader::new().load(&path).unwrap();

    let err = harness
        .engine_for(definition, EngineConfig::default().with_max_nesting_depth(2))
        .execute()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nesting deeper than 2 levels"));
}

#[tokio::test]
async fn test_missing_nested_workflow_is_a_load_error() {
    let harness = Harness::new();
    let err = harness
        .engine(
            "orphan",
            r#"<step n="1" goal="Call"><invoke-workflow path="/nowhere/at/all.md"/></step>"#,
            EngineConfig::default(),
        )
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::StepFailed {
            source: StepError::Load(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_invoke_task_runs_agent_and_sets_outputs() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("summarize.toml"),
        r#"
name = "summarize"
description = "Summarize a topic"
agent = "analyst"
prompt = "Summarize {{topic}}"

[outputs]
summary_path = "{project-root}/summary.md"
reviewed = false
"#,
    )
    .unwrap();

    let harness = Harness::new();
    let definition = WorkflowDefinition::from_document(
        "tasks",
        r#"<step n="1" goal="Summarize"><invoke-task path="summarize.toml"/></step>"#,
    )
    .with_variable("topic", "caching")
    .with_source_dir(dir.path());

    let outcome = harness
        .engine_for(definition, EngineConfig::default().with_project_root("/work"))
        .execute()
        .await
        .unwrap();

    assert_eq!(outcome.variables.get("summarize_output"), Some(&json!("reply-1")));
    assert_eq!(outcome.variables.get("summary_path"), Some(&json!("/work/summary.md")));
    assert_eq!(outcome.variables.get("reviewed"), Some(&json!(false)));
    assert!(harness.script.prompts()[0].ends_with("Summarize caching"));
    assert!(harness.pool.active_agents().is_empty());
}

#[tokio::test]
async fn test_invalid_task_file_fails_step() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("bad.toml"), "name = \"\"\n").unwrap();

    let harness = Harness::new();
    let definition = WorkflowDefinition::from_document(
        "bad-task",
        r#"<step n="1" goal="Run"><invoke-task path="bad.toml"/></step>"#,
    )
    .with_source_dir(dir.path());

    let err = harness
        .engine_for(definition, EngineConfig::default())
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::StepFailed {
            source: StepError::Task(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_single_slot_pool_runs_step_agent_then_task_agent() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("review.toml"),
        "name = \"review\"\nagent = \"analyst\"\nprompt = \"Review {{draft}}\"\n",
    )
    .unwrap();

    let harness = Harness::with_pool_size(1);
    let definition = WorkflowDefinition::from_document(
        "one-slot",
        r#"
<step n="1" goal="Draft and review" agent="dev">
  <action var="draft">Write it</action>
  <invoke-task path="review.toml"/>
  <action var="final">Polish {{review_output}}</action>
</step>
"#,
    )
    .with_source_dir(dir.path());

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        harness
            .engine_for(definition, EngineConfig::default())
            .execute(),
    )
    .await
    .expect("run finished without waiting on its own slot")
    .unwrap();

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.variables.get("draft"), Some(&json!("reply-1")));
    assert_eq!(outcome.variables.get("review_output"), Some(&json!("reply-2")));
    assert_eq!(outcome.variables.get("final"), Some(&json!("reply-3")));
    assert!(harness.pool.active_agents().is_empty());
    assert!(harness.pool.queued_tasks().is_empty());
}

#[tokio::test]
async fn test_single_slot_pool_runs_nested_agent_steps() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("inner.md"),
        r#"<step n="1" goal="Inner" agent="qa"><action var="checked">Check it</action></step>"#,
    )
    .unwrap();

    let harness = Harness::with_pool_size(1);
    let definition = WorkflowDefinition::from_document(
        "outer",
        r#"
<step n="1" goal="Outer" agent="dev">
  <action>Build it</action>
  <invoke-workflow path="inner.md"/>
</step>
"#,
    )
    .with_source_dir(dir.path());

    let outcome = tokio::time::timeout(
        Duration::from_secs(5),
        harness
            .engine_for(definition, EngineConfig::default())
            .execute(),
    )
    .await
    .expect("nested run finished without waiting on the caller's slot")
    .unwrap();

    assert_eq!(outcome.variables.get("checked"), Some(&json!("reply-2")));
    assert_eq!(harness.script.calls(), 2);
}
