// Trigger events - business events that activate rule and sequence evaluation

use carepath_shared::{EntitySnapshot, TriggerType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event-specific context evaluated alongside the entity snapshot.
///
/// `now` is captured when the event is raised so that condition evaluation
/// and template rendering stay pure functions of their inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerContext {
    pub now: DateTime<Utc>,
    pub from_phase: Option<String>,
    pub to_phase: Option<String>,
    pub task_id: Option<String>,
    pub message_text: Option<String>,
    /// Extra event data carried through to the executor for audit.
    pub payload: serde_json::Value,
}

impl TriggerContext {
    pub fn empty() -> Self {
        Self {
            now: Utc::now(),
            from_phase: None,
            to_phase: None,
            task_id: None,
            message_text: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            ..Self::empty()
        }
    }
}

/// A trigger event queued for the automation engine.
#[derive(Debug, Clone)]
pub struct TriggerEvent {
    pub trigger_type: TriggerType,
    pub entity: EntitySnapshot,
    pub context: TriggerContext,
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType, entity: EntitySnapshot, context: TriggerContext) -> Self {
        Self {
            trigger_type,
            entity,
            context,
        }
    }

    /// A caregiver or client record was just created.
    pub fn new_record(entity: EntitySnapshot) -> Self {
        Self::new(TriggerType::NewRecord, entity, TriggerContext::empty())
    }

    /// An entity moved from one pipeline phase to another.
    pub fn phase_change(entity: EntitySnapshot, from_phase: &str, to_phase: &str) -> Self {
        let context = TriggerContext {
            from_phase: Some(from_phase.to_string()),
            to_phase: Some(to_phase.to_string()),
            payload: serde_json::json!({
                "from_phase": from_phase,
                "to_phase": to_phase,
            }),
            ..TriggerContext::empty()
        };
        Self::new(TriggerType::PhaseChange, entity, context)
    }

    /// A checklist task on the entity was marked complete.
    pub fn task_completed(entity: EntitySnapshot, task_id: &str, completed_by: &str) -> Self {
        let context = TriggerContext {
            task_id: Some(task_id.to_string()),
            payload: serde_json::json!({
                "task_id": task_id,
                "completed_by": completed_by,
            }),
            ..TriggerContext::empty()
        };
        Self::new(TriggerType::TaskCompleted, entity, context)
    }

    /// An inbound SMS or email reply was received from the entity.
    pub fn inbound_message(entity: EntitySnapshot, message_text: &str) -> Self {
        let context = TriggerContext {
            message_text: Some(message_text.to_string()),
            payload: serde_json::json!({ "message_text": message_text }),
            ..TriggerContext::empty()
        };
        Self::new(TriggerType::InboundMessage, entity, context)
    }

    /// A document was uploaded for the entity.
    pub fn document_uploaded(entity: EntitySnapshot, document_name: &str) -> Self {
        let context = TriggerContext {
            payload: serde_json::json!({ "document_name": document_name }),
            ..TriggerContext::empty()
        };
        Self::new(TriggerType::DocumentUploaded, entity, context)
    }

    /// A sent document packet came back signed.
    pub fn document_signed(entity: EntitySnapshot, document_name: &str) -> Self {
        let context = TriggerContext {
            payload: serde_json::json!({ "document_name": document_name }),
            ..TriggerContext::empty()
        };
        Self::new(TriggerType::DocumentSigned, entity, context)
    }

    /// Raised by the inactivity scan when an entity has gone quiet.
    pub fn days_inactive(entity: EntitySnapshot, idle_days: i64) -> Self {
        let context = TriggerContext {
            payload: serde_json::json!({ "idle_days": idle_days }),
            ..TriggerContext::empty()
        };
        Self::new(TriggerType::DaysInactive, entity, context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::caregiver;

    #[test]
    fn phase_change_carries_both_phases() {
        let event = TriggerEvent::phase_change(caregiver("applied"), "applied", "interview");

        assert_eq!(event.trigger_type, TriggerType::PhaseChange);
        assert_eq!(event.context.from_phase.as_deref(), Some("applied"));
        assert_eq!(event.context.to_phase.as_deref(), Some("interview"));
    }

    #[test]
    fn inbound_message_carries_text() {
        let event = TriggerEvent::inbound_message(caregiver("applied"), "YES, still interested");

        assert_eq!(event.trigger_type, TriggerType::InboundMessage);
        assert_eq!(
            event.context.message_text.as_deref(),
            Some("YES, still interested")
        );
    }
}
