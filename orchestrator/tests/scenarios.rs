//! Scenario tests for the workflow engine and agent pool
//!
//! Everything runs in-process against a scripted LLM factory and an
//! in-memory state store; no model server is needed.
//!
//! Run with: cargo test --test scenarios
//!
//! Test structure:
//! - common: scripted LLM doubles and engine helpers
//! - execution: step walking, yolo, goto, pauses and failures
//! - recovery: checkpoints, crash resume and save failures
//! - nesting: invoke-workflow and invoke-task
//! - pool: concurrency ceiling, FIFO and retry billing

#[path = "scenarios/common.rs"]
mod common;

#[path = "scenarios/execution.rs"]
mod execution;

#[path = "scenarios/recovery.rs"]
mod recovery;

#[path = "scenarios/nesting.rs"]
mod nesting;

#[path = "scenarios/pool.rs"]
mod pool;
