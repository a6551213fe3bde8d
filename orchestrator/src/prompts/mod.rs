//! System prompts for the built-in personas
//!
//! Each persona prompt defines a role, how it approaches a request and
//! what shape its answer takes. The workflow step supplies the actual task.

mod analyst;
mod architect;
mod developer;
mod qa;
mod scrum_master;

pub use analyst::ANALYST_PROMPT;
pub use architect::ARCHITECT_PROMPT;
pub use developer::DEVELOPER_PROMPT;
pub use qa::QA_PROMPT;
pub use scrum_master::SCRUM_MASTER_PROMPT;
