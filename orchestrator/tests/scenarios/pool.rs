//! Pool ceiling, FIFO fairness and retry billing through the public API

use std::time::Duration;

use agentflow::{AgentContext, LlmConfig};

use crate::common::scripted_pool;

fn paid() -> LlmConfig {
    LlmConfig::new("anthropic", "claude-sonnet-4-5")
}

#[tokio::test]
async fn test_third_agent_waits_for_a_free_slot() {
    let (pool, _) = scripted_pool(2);

    let first = pool
        .create_agent("dev", paid(), AgentContext::for_workflow("wf"))
        .await
        .unwrap();
    let second = pool
        .create_agent("qa", paid(), AgentContext::for_workflow("wf"))
        .await
        .unwrap();

    let waiting = {
        let pool = pool.clone();
        tokio::spawn(async move {
            pool.create_agent("sm", paid(), AgentContext::for_workflow("wf"))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());
    assert_eq!(pool.active_agents().len(), 2);
    assert_eq!(pool.queued_tasks().len(), 1);

    pool.destroy_agent(&first.id).await.unwrap();
    let third = tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    assert_eq!(third.name, "sm");
    let active: Vec<String> = pool.active_agents().into_iter().map(|a| a.id).collect();
    assert_eq!(active.len(), 2);
    assert!(active.contains(&second.id));
    assert!(active.contains(&third.id));
}

#[tokio::test]
async fn test_ceiling_holds_under_concurrent_requests() {
    let (pool, _) = scripted_pool(3);

    let mut handles = Vec::new();
    for i in 0..10 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let agent = pool
                .create_agent("dev", paid(), AgentContext::for_workflow(format!("wf-{i}")))
                .await
                .unwrap();
            let active = pool.active_agents().len();
            pool.invoke_agent(&agent.id, "work").await.unwrap();
            pool.destroy_agent(&agent.id).await.unwrap();
            active
        }));
    }

    for handle in handles {
        assert!(handle.await.unwrap() <= 3);
    }
    assert!(pool.active_agents().is_empty());
    assert_eq!(pool.cost_metrics().invocations, 10);
}

#[tokio::test]
async fn test_transient_error_retried_and_billed_once() {
    let (pool, script) = scripted_pool(1);
    script.fail_transiently(1);

    let agent = pool
        .create_agent("dev", paid(), AgentContext::for_workflow("wf").with_project("proj"))
        .await
        .unwrap();
    let response = pool.invoke_agent(&agent.id, "implement").await.unwrap();

    assert_eq!(response.text, "reply-2");
    assert_eq!(script.calls(), 2);

    // 1000 in / 500 out at 3 / 15 per million
    let ledger = pool.cost_metrics();
    let expected = 1_000.0 * 3.0 / 1e6 + 500.0 * 15.0 / 1e6;
    assert_eq!(ledger.invocations, 1);
    assert_eq!(ledger.tokens_in, 1_000);
    assert!((ledger.total - expected).abs() < 1e-12);
    assert!((ledger.by_workflow["wf"] - expected).abs() < 1e-12);
    assert!((ledger.by_project["proj"] - expected).abs() < 1e-12);
}
