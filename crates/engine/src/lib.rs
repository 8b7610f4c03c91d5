//! Orchestration layer: drives submissions through configured approval
//! workflows, draws document numbers, and enforces blocking rules, on top of
//! the `formflow-core` domain and the `formflow-db` stores.

pub mod assignees;
pub mod blocking;
pub mod engine;
pub mod errors;
pub mod logging;
pub mod numbering;

#[cfg(test)]
mod support;

pub use assignees::{ApproverSet, AssigneeResolver, ResolvedApprover};
pub use blocking::BlockingService;
pub use engine::{ApprovalWorkflowEngine, EngineServices};
pub use errors::EngineError;
pub use numbering::{IssuedNumber, NumberingService};
