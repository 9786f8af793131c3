// Action requests and outcomes crossing the executor boundary

use carepath_shared::{ActionType, AutomationRule, EntitySnapshot, EntityType, LogStatus, SequenceStep};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What produced an action request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ActionSource {
    Rule {
        rule_id: Uuid,
    },
    SequenceStep {
        sequence_id: Uuid,
        enrollment_id: Uuid,
        step_index: i32,
    },
}

/// One invocation handed to the executor boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub source: ActionSource,
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub action_type: ActionType,
    /// Template with merge fields already resolved.
    pub rendered_message: String,
    pub subject: Option<String>,
    pub action_config: serde_json::Value,
    /// Event payload carried through for provider-side audit.
    pub trigger_payload: serde_json::Value,
}

impl ActionRequest {
    pub fn from_rule(
        rule: &AutomationRule,
        entity: &EntitySnapshot,
        rendered_message: String,
        trigger_payload: serde_json::Value,
    ) -> Self {
        Self {
            source: ActionSource::Rule { rule_id: rule.id },
            entity_id: entity.id,
            entity_type: entity.entity_type,
            action_type: rule.action_type,
            rendered_message,
            subject: None,
            action_config: rule.action_config.clone(),
            trigger_payload,
        }
    }

    pub fn from_step(
        sequence_id: Uuid,
        enrollment_id: Uuid,
        step: &SequenceStep,
        entity: &EntitySnapshot,
        rendered_message: String,
    ) -> Self {
        Self {
            source: ActionSource::SequenceStep {
                sequence_id,
                enrollment_id,
                step_index: step.step_index,
            },
            entity_id: entity.id,
            entity_type: entity.entity_type,
            action_type: step.action_type,
            rendered_message,
            subject: step.subject.clone(),
            action_config: serde_json::Value::Null,
            trigger_payload: serde_json::Value::Null,
        }
    }
}

/// Terminal status reported by the executor boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
    Skipped,
}

/// Result of one executor invocation. The executor never raises; provider
/// errors come back as `Failed` with detail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub status: OutcomeStatus,
    pub detail: Option<String>,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self {
            status: OutcomeStatus::Success,
            detail: None,
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Failed,
            detail: Some(detail.into()),
        }
    }

    pub fn skipped(detail: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Skipped,
            detail: Some(detail.into()),
        }
    }

    pub fn log_status(&self) -> LogStatus {
        match self.status {
            OutcomeStatus::Success => LogStatus::Success,
            OutcomeStatus::Failed => LogStatus::Failed,
            OutcomeStatus::Skipped => LogStatus::Skipped,
        }
    }
}
