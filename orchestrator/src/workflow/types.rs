//! Parsed instruction types
//!
//! A workflow document parses into an ordered list of [`Step`]s. Each step
//! holds actions and condition-gated checks; [`Step::items`] walks both in
//! document order.

use serde::{Deserialize, Serialize};

/// What an action does when executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    /// Work to perform, sent to the step's agent when one is assigned
    Action {
        /// Variable that receives the agent response
        #[serde(default)]
        var: Option<String>,
    },

    /// Ask the user for input
    Ask {
        #[serde(default)]
        var: Option<String>,
        #[serde(default)]
        default: Option<String>,
    },

    /// Show text to the user
    Output,

    /// Save a template section and request approval
    TemplateOutput,

    /// Input that must be elicited before continuing
    ElicitRequired {
        #[serde(default)]
        var: Option<String>,
        #[serde(default)]
        default: Option<String>,
    },

    /// Jump to another step
    Goto { target: u32 },

    /// Run another workflow to completion
    InvokeWorkflow { path: String },

    /// Run a task definition and merge its outputs
    InvokeTask { path: String },
}

impl ActionKind {
    /// Tag name as written in instruction documents
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Action { .. } => "action",
            Self::Ask { .. } => "ask",
            Self::Output => "output",
            Self::TemplateOutput => "template-output",
            Self::ElicitRequired { .. } => "elicit-required",
            Self::Goto { .. } => "goto",
            Self::InvokeWorkflow { .. } => "invoke-workflow",
            Self::InvokeTask { .. } => "invoke-task",
        }
    }

    /// Whether this action needs someone at the keyboard
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Ask { .. } | Self::ElicitRequired { .. })
    }
}

/// A single executable instruction inside a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Raw (unresolved) content
    pub content: String,
    /// Optional `if` condition gating this action
    #[serde(default)]
    pub condition: Option<String>,
    /// Source line of the opening tag
    pub line: usize,
}

impl Action {
    pub fn new(kind: ActionKind, content: impl Into<String>, line: usize) -> Self {
        Self {
            kind,
            content: content.into(),
            condition: None,
            line,
        }
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }
}

/// A nested block that only runs when its condition holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub condition: String,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub checks: Vec<Check>,
    pub line: usize,
}

impl Check {
    /// Nested actions and checks in document order
    pub fn items(&self) -> Vec<StepItem<'_>> {
        merge_items(&self.actions, &self.checks)
    }
}

/// One numbered step of a workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub number: u32,
    pub goal: String,
    /// Raw body text between the step tags
    pub content: String,
    pub optional: bool,
    pub critical: bool,
    /// Agent assigned to the step's actions, if any
    #[serde(default)]
    pub agent: Option<String>,
    pub actions: Vec<Action>,
    pub checks: Vec<Check>,
    pub line: usize,
}

impl Step {
    /// Actions and checks in document order
    pub fn items(&self) -> Vec<StepItem<'_>> {
        merge_items(&self.actions, &self.checks)
    }

    /// Whether a failure inside this step must halt the run.
    ///
    /// Only steps explicitly marked optional (and not critical) are lenient.
    pub fn is_critical(&self) -> bool {
        self.critical || !self.optional
    }

    /// Whether yolo mode may skip this step entirely
    pub fn skippable_in_yolo(&self) -> bool {
        self.optional && !self.critical
    }

    /// Short label used in logs and error context
    pub fn label(&self) -> String {
        if self.goal.is_empty() {
            format!("step {}", self.number)
        } else {
            format!("step {} ({})", self.number, self.goal)
        }
    }
}

/// Borrowed view over a step or check body entry
#[derive(Debug, Clone, Copy)]
pub enum StepItem<'a> {
    Action(&'a Action),
    Check(&'a Check),
}

impl StepItem<'_> {
    pub fn line(&self) -> usize {
        match self {
            StepItem::Action(a) => a.line,
            StepItem::Check(c) => c.line,
        }
    }
}

fn merge_items<'a>(actions: &'a [Action], checks: &'a [Check]) -> Vec<StepItem<'a>> {
    let mut items: Vec<StepItem<'a>> = actions
        .iter()
        .map(StepItem::Action)
        .chain(checks.iter().map(StepItem::Check))
        .collect();
    // Items sharing a line keep actions ahead of checks
    items.sort_by_key(|item| item.line());
    items
}
