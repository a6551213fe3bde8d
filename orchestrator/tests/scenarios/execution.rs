//! Step walking, yolo mode, goto and human-in-the-loop pauses

use std::sync::Arc;

use agentflow::engine::checkpoint::RejectCheckpointHandler;
use agentflow::events::OrchestratorEvent;
use agentflow::{event_channel, EngineConfig, EngineError, EventSink, StepError, WorkflowStatus};
use serde_json::json;

use crate::common::{plain_steps, Harness};

#[tokio::test]
async fn test_yolo_skips_optional_step() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Gather">
  <output>one</output>
</step>
<step n="2" goal="Polish" optional="true">
  <output>two</output>
</step>
<step n="3" goal="Finish">
  <output>three</output>
</step>
"#;
    let (tx, mut rx) = event_channel();
    let engine = harness
        .engine("yolo", document, EngineConfig::default().with_yolo(true))
        .with_events(EventSink::new(tx));

    let outcome = engine.execute().await.unwrap();
    drop(engine);

    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.executed_steps, vec![1, 3]);
    assert_eq!(outcome.skipped_steps, vec![2]);

    let mut skipped_events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let OrchestratorEvent::StepCompleted { step, skipped, .. } = event {
            skipped_events.push((step, skipped));
        }
    }
    assert_eq!(skipped_events, vec![(1, false), (2, true), (3, false)]);
}

#[tokio::test]
async fn test_optional_critical_step_runs_in_yolo() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Must run" optional="true" critical="true">
  <output>kept</output>
</step>
"#;
    let outcome = harness
        .engine("critical", document, EngineConfig::default().with_yolo(true))
        .execute()
        .await
        .unwrap();
    assert_eq!(outcome.executed_steps, vec![1]);
    assert!(outcome.skipped_steps.is_empty());
}

#[tokio::test]
async fn test_agent_action_stores_output_and_releases_agent() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Draft" agent="dev">
  <action var="draft">Write a draft for {{feature}}</action>
</step>
<step n="2" goal="Report">
  <output>Draft: {{draft}}</output>
</step>
"#;
    let definition = agentflow::WorkflowDefinition::from_document("draft", document)
        .with_variable("feature", "dark mode");
    let outcome = harness
        .engine_for(definition, EngineConfig::default())
        .execute()
        .await
        .unwrap();

    assert_eq!(outcome.variables.get("draft"), Some(&json!("reply-1")));
    assert_eq!(outcome.variables.get("step_1_output"), Some(&json!("reply-1")));
    assert_eq!(outcome.variables.get("last_agent_output"), Some(&json!("reply-1")));
    assert!(harness.script.prompts()[0].ends_with("Write a draft for dark mode"));
    assert!(harness.pool.active_agents().is_empty());
    assert_eq!(harness.pool.cost_metrics().invocations, 1);
}

#[tokio::test]
async fn test_default_agent_used_when_step_names_none() {
    let harness = Harness::new();
    let document = r#"<step n="1" goal="Plan"><action>Plan it</action></step>"#;
    harness
        .engine("default-agent", document, EngineConfig::default().with_default_agent("sm"))
        .execute()
        .await
        .unwrap();
    assert_eq!(harness.script.calls(), 1);
}

#[tokio::test]
async fn test_action_without_agent_is_logged_only() {
    let harness = Harness::new();
    let document = r#"<step n="1" goal="Note"><action>Remember the milk</action></step>"#;
    let outcome = harness
        .engine("no-agent", document, EngineConfig::default())
        .execute()
        .await
        .unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(harness.script.calls(), 0);
}

#[tokio::test]
async fn test_checks_and_action_conditions_gate_execution() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Branch">
  <check if="mode == 'fast'">
    <ask var="picked_fast">Fast path?</ask>
  </check>
  <check if="NOT mode == 'fast'">
    <ask var="picked_slow">Slow path?</ask>
  </check>
  <ask var="extra" if="retries > 2">Why so many retries?</ask>
</step>
"#;
    let definition = agentflow::WorkflowDefinition::from_document("branch", document)
        .with_variable("mode", "fast")
        .with_variable("retries", 1);
    let outcome = harness
        .engine_for(definition, EngineConfig::default())
        .with_input_provider(Harness::answers(&["yes"]))
        .execute()
        .await
        .unwrap();

    assert_eq!(outcome.variables.get("picked_fast"), Some(&json!("yes")));
    assert!(!outcome.variables.contains_key("picked_slow"));
    assert!(!outcome.variables.contains_key("extra"));
}

#[tokio::test]
async fn test_goto_jumps_forward() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Start"><output>start</output></step>
<step n="2" goal="Jump">
  <goto step="4"/>
  <output>never printed</output>
</step>
<step n="3" goal="Skipped by jump"><output>three</output></step>
<step n="4" goal="Land"><output>four</output></step>
"#;
    let outcome = harness
        .engine("jump", document, EngineConfig::default())
        .execute()
        .await
        .unwrap();

    assert_eq!(outcome.executed_steps, vec![1, 2, 4]);
    let saved = harness.store.history("jump");
    assert_eq!(saved[1].jump_target, Some(4));
    assert_eq!(saved[1].jumps_taken, 1);
}

#[tokio::test]
async fn test_backward_goto_trips_loop_guard() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Work"><output>working</output></step>
<step n="2" goal="Again"><goto step="1"/></step>
"#;
    let err = harness
        .engine("loop", document, EngineConfig::default().with_max_goto_jumps(3))
        .execute()
        .await
        .unwrap_err();

    match err {
        EngineError::StepFailed { step, source, .. } => {
            assert_eq!(step, 2);
            assert!(matches!(source, StepError::GotoLimitExceeded { limit: 3 }));
        }
        other => panic!("unexpected error: {other}"),
    }

    let last = harness.store.history("loop").pop().unwrap();
    assert_eq!(last.status, WorkflowStatus::Error);
    assert_eq!(last.jumps_taken, 3);
}

#[tokio::test]
async fn test_goto_to_missing_step_fails() {
    let harness = Harness::new();
    let document = r#"<step n="1" goal="Bad"><goto step="9"/></step>"#;
    let err = harness
        .engine("bad-goto", document, EngineConfig::default())
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::StepFailed {
            source: StepError::InvalidGoto { target: 9 },
            ..
        }
    ));
}

#[tokio::test]
async fn test_unresolved_variable_fails_with_context() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Ok"><output>fine</output></step>
<step n="2" goal="Broken"><output>Story {{story_id}}</output></step>
"#;
    let definition = agentflow::WorkflowDefinition::from_document("unresolved", document)
        .with_variable("epic", "E-1");
    let err = harness
        .engine_for(definition, EngineConfig::default())
        .execute()
        .await
        .unwrap_err();

    match &err {
        EngineError::StepFailed {
            step,
            content,
            known_variables,
            source: StepError::Variable(inner),
        } => {
            assert_eq!(*step, 2);
            assert_eq!(content, "Story {{story_id}}");
            assert_eq!(inner.variable, "story_id");
            assert!(known_variables.contains(&"epic".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("known variables"));

    // Last good checkpoint is step 1, now marked failed
    let last = harness.store.history("unresolved").pop().unwrap();
    assert_eq!(last.current_step_number, 1);
    assert_eq!(last.status, WorkflowStatus::Error);
    assert!(last.error.is_some());
}

#[tokio::test]
async fn test_unresolved_variable_skipped_in_non_critical_step() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Nice to have" optional="true">
  <output>Missing {{nothing_here}}</output>
  <ask var="after">Still asked</ask>
</step>
"#;
    let outcome = harness
        .engine("lenient", document, EngineConfig::default())
        .with_input_provider(Harness::answers(&["sure"]))
        .execute()
        .await
        .unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Completed);
    assert_eq!(outcome.variables.get("after"), Some(&json!("sure")));
}

#[tokio::test]
async fn test_malformed_condition_is_fatal() {
    let harness = Harness::new();
    let document = r#"<step n="1" goal="Bad"><check if="(count > 1"><output>x</output></check></step>"#;
    let err = harness
        .engine("bad-condition", document, EngineConfig::default())
        .execute()
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::StepFailed {
            source: StepError::Condition(_),
            ..
        }
    ));
}

#[tokio::test]
async fn test_ask_without_input_pauses_then_resumes() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Intro"><output>hello</output></step>
<step n="2" goal="Question"><ask var="story">Which story?</ask></step>
<step n="3" goal="Use"><output>Working on {{story}}</output></step>
"#;

    let paused = harness
        .engine("ask", document, EngineConfig::default())
        .execute()
        .await
        .unwrap();
    assert_eq!(paused.status, WorkflowStatus::Paused);
    assert_eq!(paused.current_step_number, 1);

    let resumed = harness
        .engine("ask", document, EngineConfig::default())
        .with_input_provider(Harness::answers(&["S-42"]))
        .execute()
        .await
        .unwrap();
    assert_eq!(resumed.status, WorkflowStatus::Completed);
    assert_eq!(resumed.executed_steps, vec![2, 3]);
    assert_eq!(resumed.variables.get("story"), Some(&json!("S-42")));
}

#[tokio::test]
async fn test_yolo_uses_ask_default() {
    let harness = Harness::new();
    let document = r#"<step n="1" goal="Q"><ask var="branch" default="main">Branch?</ask></step>"#;
    let outcome = harness
        .engine("ask-default", document, EngineConfig::default().with_yolo(true))
        .execute()
        .await
        .unwrap();
    assert_eq!(outcome.variables.get("branch"), Some(&json!("main")));
}

#[tokio::test]
async fn test_rejected_template_output_pauses() {
    let harness = Harness::new();
    let document = r#"
<step n="1" goal="Draft"><output>drafting</output></step>
<step n="2" goal="Review"><template-output>## Story</template-output></step>
"#;
    let outcome = harness
        .engine("review", document, EngineConfig::default())
        .with_checkpoint_handler(Arc::new(RejectCheckpointHandler))
        .execute()
        .await
        .unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Paused);
    assert_eq!(outcome.current_step_number, 1);
}

#[tokio::test]
async fn test_cancellation_pauses_between_steps() {
    let harness = Harness::new();
    let cancel = agentflow::CancellationFlag::new();
    cancel.cancel();

    let outcome = harness
        .engine("cancelled", &plain_steps(3), EngineConfig::default())
        .with_cancellation(cancel)
        .execute()
        .await
        .unwrap();
    assert_eq!(outcome.status, WorkflowStatus::Paused);
    assert!(outcome.executed_steps.is_empty());
}
