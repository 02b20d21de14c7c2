//! Multi-step workflow state machines, defined as data.
//!
//! Workflows (booking, check-in, complaint, emergency escalation) are
//! declarative step tables in `workflows.json`; the executor interprets
//! them one guest turn at a time. Side effects resolve through a registry
//! keyed by name so tests substitute fakes, and they run after the reply is
//! queued — a slow staff notification never blocks the guest.

pub mod effects;
pub mod executor;
pub mod types;

pub use effects::{EffectCall, EffectRegistry, SideEffect};
pub use executor::{TurnOutcome, TurnResult, WorkflowExecutor};
pub use types::{LocalizedText, StepDef, ValidationRule, WorkflowDef, WorkflowError, WorkflowSet};
