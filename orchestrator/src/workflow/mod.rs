//! Instruction documents: parsing, variables, conditions and loading

pub mod condition;
pub mod loader;
pub mod parser;
pub mod types;
pub mod variables;

pub use condition::evaluate;
pub use loader::{FileWorkflowLoader, WorkflowDefinition, WorkflowLoader};
pub use parser::parse;
pub use types::{Action, ActionKind, Check, Step, StepItem};
pub use variables::{
    referenced_variables, resolve, resolve_lenient, value_to_string, Layer, VariableContext,
};
