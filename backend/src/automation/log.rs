// Execution-log entry construction
//
// The log is append-only. The single permitted in-place update is a pending
// row resolving to executed/failed/skipped, enforced here via
// `LogStatus::may_transition_to` and again by the store's guarded UPDATE.

use carepath_shared::{
    AutomationRule, EntitySnapshot, ExecutionLogEntry, LogStatus, Sequence, SequenceEnrollment,
    SequenceStep,
};
use chrono::{DateTime, Utc};
use std::fmt::Display;
use tracing::warn;
use uuid::Uuid;

const PREVIEW_LEN: usize = 120;

/// First line of a rendered message, truncated for the audit view.
pub fn preview(rendered: &str) -> Option<String> {
    let line = rendered.lines().next()?.trim();
    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(PREVIEW_LEN).collect())
}

/// Terminal entry for a rule-fired attempt.
pub fn rule_entry(
    rule: &AutomationRule,
    entity: &EntitySnapshot,
    status: LogStatus,
    rendered: &str,
    error_detail: Option<String>,
    now: DateTime<Utc>,
) -> ExecutionLogEntry {
    ExecutionLogEntry {
        id: Uuid::new_v4(),
        rule_id: Some(rule.id),
        sequence_id: None,
        enrollment_id: None,
        step_index: None,
        entity_id: entity.id,
        entity_type: entity.entity_type,
        action_type: rule.action_type,
        status,
        scheduled_at: now,
        executed_at: Some(now),
        error_detail,
        rendered_preview: preview(rendered),
    }
}

/// Entry for a sequence step executed inline at enrollment time.
pub fn step_executed_entry(
    sequence: &Sequence,
    enrollment: &SequenceEnrollment,
    step: &SequenceStep,
    entity: &EntitySnapshot,
    rendered: &str,
    now: DateTime<Utc>,
) -> ExecutionLogEntry {
    ExecutionLogEntry {
        id: Uuid::new_v4(),
        rule_id: None,
        sequence_id: Some(sequence.id),
        enrollment_id: Some(enrollment.id),
        step_index: Some(step.step_index),
        entity_id: entity.id,
        entity_type: entity.entity_type,
        action_type: step.action_type,
        status: LogStatus::Executed,
        scheduled_at: now,
        executed_at: Some(now),
        error_detail: None,
        rendered_preview: preview(rendered),
    }
}

/// Pending entry for a delayed step awaiting scheduler pickup.
pub fn step_pending_entry(
    sequence: &Sequence,
    enrollment: &SequenceEnrollment,
    step: &SequenceStep,
    entity: &EntitySnapshot,
    scheduled_at: DateTime<Utc>,
) -> ExecutionLogEntry {
    ExecutionLogEntry {
        id: Uuid::new_v4(),
        rule_id: None,
        sequence_id: Some(sequence.id),
        enrollment_id: Some(enrollment.id),
        step_index: Some(step.step_index),
        entity_id: entity.id,
        entity_type: entity.entity_type,
        action_type: step.action_type,
        status: LogStatus::Pending,
        scheduled_at,
        executed_at: None,
        error_detail: None,
        rendered_preview: None,
    }
}

/// Capture a best-effort result solely for logging. Automation work must
/// never surface failures to the mutation path that triggered it; this is
/// the one place those errors become visible.
pub fn log_or_warn<T, E: Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("automation: {context}: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_takes_first_line_truncated() {
        assert_eq!(preview("hello\nworld"), Some("hello".to_string()));
        assert_eq!(preview("   \n"), None);

        let long = "x".repeat(300);
        assert_eq!(preview(&long).unwrap().len(), PREVIEW_LEN);
    }

    #[test]
    fn pending_is_the_only_mutable_status() {
        assert!(LogStatus::Pending.may_transition_to(LogStatus::Executed));
        assert!(LogStatus::Pending.may_transition_to(LogStatus::Failed));
        assert!(LogStatus::Pending.may_transition_to(LogStatus::Skipped));

        assert!(!LogStatus::Executed.may_transition_to(LogStatus::Failed));
        assert!(!LogStatus::Success.may_transition_to(LogStatus::Executed));
        assert!(!LogStatus::Pending.may_transition_to(LogStatus::Pending));
    }

    #[test]
    fn log_or_warn_swallows_errors() {
        let ok: Result<i32, String> = Ok(7);
        assert_eq!(log_or_warn(ok, "test"), Some(7));

        let err: Result<i32, String> = Err("boom".into());
        assert_eq!(log_or_warn(err, "test"), None);
    }
}
