//! Human-in-the-loop hooks
//!
//! `<template-output>` asks a [`CheckpointHandler`] for approval;
//! `<ask>` and `<elicit-required>` ask an [`InputProvider`] for a value.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::Mutex;

/// Result of a checkpoint interaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointResult {
    /// Approved, continue
    Approved,
    /// Approved with a note for later steps
    ApprovedWithNote(String),
    /// Rejected; the run pauses at the last completed step
    Rejected,
    /// Approved with replacement content
    Edit(String),
}

/// Content waiting for approval
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub workflow_id: String,
    pub step: u32,
    pub message: String,
    pub content: Option<String>,
}

impl Checkpoint {
    pub fn new(workflow_id: impl Into<String>, step: u32, message: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            step,
            message: message.into(),
            content: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    /// Prompt on the terminal
    pub fn execute(&self) -> io::Result<CheckpointResult> {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        println!("\n{}", "═".repeat(60));
        println!("  CHECKPOINT  {} / step {}", self.workflow_id, self.step);
        println!("{}\n", "═".repeat(60));

        if let Some(content) = &self.content {
            println!("{}\n", content);
            println!("{}", "─".repeat(60));
        }
        println!("\n{}\n", self.message);

        println!("Options:");
        println!("  [y/yes]     - Approve and continue");
        println!("  [n/no]      - Reject and pause the workflow");
        println!("  [e/edit]    - Replace the content");
        println!("  [note TEXT] - Approve with a note");
        println!();
        print!("Your choice: ");
        stdout.flush()?;

        let mut input = String::new();
        stdin.lock().read_line(&mut input)?;
        let input = input.trim();

        let result = match input.to_lowercase().as_str() {
            "y" | "yes" | "" => CheckpointResult::Approved,
            "n" | "no" => CheckpointResult::Rejected,
            "e" | "edit" => {
                println!("\nEnter the replacement (end with empty line):");
                let mut edits = Vec::new();
                loop {
                    let mut line = String::new();
                    if stdin.lock().read_line(&mut line)? == 0 || line.trim().is_empty() {
                        break;
                    }
                    edits.push(line);
                }
                CheckpointResult::Edit(edits.join(""))
            }
            s if s.starts_with("note ") => CheckpointResult::ApprovedWithNote(input[5..].to_string()),
            _ => {
                println!("Invalid input, treating as rejection.");
                CheckpointResult::Rejected
            }
        };

        Ok(result)
    }
}

/// Strategy for approving template output
pub trait CheckpointHandler: Send + Sync {
    fn handle(&self, checkpoint: &Checkpoint) -> CheckpointResult;
}

/// Prompts on the terminal
pub struct InteractiveCheckpointHandler;

impl CheckpointHandler for InteractiveCheckpointHandler {
    fn handle(&self, checkpoint: &Checkpoint) -> CheckpointResult {
        checkpoint.execute().unwrap_or(CheckpointResult::Rejected)
    }
}

/// Approves everything (yolo, CI)
pub struct AutoApproveCheckpointHandler;

impl CheckpointHandler for AutoApproveCheckpointHandler {
    fn handle(&self, checkpoint: &Checkpoint) -> CheckpointResult {
        tracing::info!(
            workflow_id = %checkpoint.workflow_id,
            step = checkpoint.step,
            "Checkpoint auto-approved"
        );
        CheckpointResult::Approved
    }
}

/// Rejects everything
pub struct RejectCheckpointHandler;

impl CheckpointHandler for RejectCheckpointHandler {
    fn handle(&self, checkpoint: &Checkpoint) -> CheckpointResult {
        tracing::info!(
            workflow_id = %checkpoint.workflow_id,
            step = checkpoint.step,
            "Checkpoint auto-rejected"
        );
        CheckpointResult::Rejected
    }
}

// ============================================================================
// Input
// ============================================================================

/// A value the workflow needs from a person
#[derive(Debug, Clone)]
pub struct InputRequest {
    pub workflow_id: String,
    pub step: u32,
    /// Resolved question text
    pub prompt: String,
    /// Variable that receives the answer
    pub var: Option<String>,
    pub default: Option<String>,
    /// `elicit-required` rather than `ask`
    pub required: bool,
}

/// Supplies answers for `<ask>` and `<elicit-required>`.
///
/// `None` means no input is available right now; the run pauses and can
/// be resumed later.
pub trait InputProvider: Send + Sync {
    fn provide(&self, request: &InputRequest) -> Option<String>;
}

/// Never has input; every question pauses the run
pub struct NoInput;

impl InputProvider for NoInput {
    fn provide(&self, _request: &InputRequest) -> Option<String> {
        None
    }
}

/// Reads one line from stdin; EOF means no input
pub struct StdinInputProvider;

impl InputProvider for StdinInputProvider {
    fn provide(&self, request: &InputRequest) -> Option<String> {
        println!("\n{}", request.prompt);
        match &request.default {
            Some(default) => print!("[{}] > ", default),
            None => print!("> "),
        }
        io::stdout().flush().ok()?;

        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => {
                let answer = line.trim().to_string();
                if answer.is_empty() {
                    request.default.clone().or(Some(answer))
                } else {
                    Some(answer)
                }
            }
        }
    }
}

/// Hands out pre-recorded answers in order
#[derive(Default)]
pub struct QueuedInput {
    answers: Mutex<VecDeque<String>>,
}

impl QueuedInput {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.answers.lock().map(|a| a.len()).unwrap_or(0)
    }
}

impl InputProvider for QueuedInput {
    fn provide(&self, _request: &InputRequest) -> Option<String> {
        self.answers.lock().ok()?.pop_front()
    }
}
