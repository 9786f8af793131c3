// Automation Engine
//
// Rule-evaluation and multi-step sequencing for the Carepath pipeline.
// Watches caregiver/client state and reacts to business events with
// communications and record mutations, strictly best-effort behind the
// primary mutation path.

pub mod actions;
pub mod action_items;
pub mod conditions;
pub mod dispatcher;
pub mod engine;
pub mod executor;
pub mod log;
pub mod merge_fields;
pub mod sequences;
pub mod store;
pub mod triggers;

#[cfg(test)]
pub mod testing;

pub use actions::{ActionOutcome, ActionRequest, ActionSource, OutcomeStatus};
pub use action_items::{score, ScorerConfig, StallRule};
pub use conditions::matches;
pub use dispatcher::RuleDispatcher;
pub use engine::AutomationEngine;
pub use executor::{ActionExecutor, StoreExecutor};
pub use merge_fields::resolve;
pub use sequences::{
    compose_delay, decompose_delay, should_auto_enroll, DelayUnit, EnrollOutcome, SequenceManager,
};
pub use store::{AutomationStore, EnrollmentPatch, LogFilter, PgAutomationStore, StoreError};
pub use triggers::{TriggerContext, TriggerEvent};
