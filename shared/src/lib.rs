use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Kind of pipeline record the automation engine operates on.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "entity_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Caregiver,
    Client,
}

/// Business events that activate rule and sequence evaluation.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "trigger_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    NewRecord,
    DaysInactive,
    PhaseChange,
    TaskCompleted,
    DocumentUploaded,
    DocumentSigned,
    InboundMessage,
}

/// Actions the engine can request from the executor boundary.
///
/// `CreateTask` is only valid inside a sequence step; a rule configured with
/// it is reported as skipped.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "action_type", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    SendSms,
    SendEmail,
    UpdatePhase,
    CompleteTask,
    AddNote,
    UpdateField,
    SendDocumentPacket,
    CreateTask,
}

/// Completion state of a single checklist task on an entity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskState {
    pub done: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
}

impl TaskState {
    pub fn complete(by: &str, at: DateTime<Utc>) -> Self {
        Self {
            done: true,
            completed_at: Some(at),
            completed_by: Some(by.to_string()),
        }
    }
}

/// A timeline note on an entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityNote {
    pub body: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
}

/// Read-only snapshot of a caregiver or client record.
///
/// Owned and mutated by the storage layer; the automation engine only reads
/// these and requests mutations through the executor boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: Uuid,
    pub entity_type: EntityType,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub phase: String,
    #[serde(default)]
    pub tasks: HashMap<String, TaskState>,
    #[serde(default)]
    pub notes: Vec<EntityNote>,
    /// First-entry instant per phase id.
    #[serde(default)]
    pub phase_timestamps: HashMap<String, DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl EntitySnapshot {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn task_done(&self, task_id: &str) -> bool {
        self.tasks.get(task_id).map(|t| t.done).unwrap_or(false)
    }

    /// When the entity first entered its current phase. Falls back to
    /// `created_at` when no entry was recorded.
    pub fn phase_entered_at(&self) -> DateTime<Utc> {
        self.phase_timestamps
            .get(&self.phase)
            .copied()
            .unwrap_or(self.created_at)
    }

    /// Timestamp of the most recent note, if any.
    pub fn last_note_at(&self) -> Option<DateTime<Utc>> {
        self.notes.iter().map(|n| n.created_at).max()
    }
}

/// Declarative filters on an automation rule.
///
/// All fields optional; set filters are AND-ed, unset filters never exclude.
/// Unknown keys in stored JSON are ignored on read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleConditions {
    /// Entity must currently be in this phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Phase-change triggers only: the phase being entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_phase: Option<String>,
    /// Task-completion triggers only: the completed task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    /// Inbound-message triggers only: case-insensitive substring.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    /// Minimum whole days spent in the current phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_days: Option<i64>,
}

impl RuleConditions {
    /// A wildcard condition set: matches every event of the rule's trigger.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn is_wildcard(&self) -> bool {
        self.phase.is_none()
            && self.to_phase.is_none()
            && self.task_id.is_none()
            && self.keyword.is_none()
            && self.min_days.is_none()
    }
}

/// An administrator-authored automation rule. Read-only to the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationRule {
    pub id: Uuid,
    pub name: String,
    pub entity_type: EntityType,
    pub trigger_type: TriggerType,
    pub conditions: RuleConditions,
    pub action_type: ActionType,
    /// Action-specific parameters (target phase, field patch, packet id...).
    pub action_config: serde_json::Value,
    /// Template with `{{field}}` merge placeholders.
    pub message_template: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One step of a drip sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub step_index: i32,
    /// Non-negative. Zero means "fire immediately on enrollment".
    pub delay_hours: f64,
    pub action_type: ActionType,
    pub template: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
}

/// A multi-step drip campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequence {
    pub id: Uuid,
    pub name: String,
    pub entity_type: EntityType,
    /// Entering this phase auto-enrolls the entity. None = manual-only.
    pub trigger_phase: Option<String>,
    pub enabled: bool,
    pub steps: Vec<SequenceStep>,
    pub created_at: DateTime<Utc>,
}

impl Sequence {
    pub fn step(&self, index: i32) -> Option<&SequenceStep> {
        self.steps.iter().find(|s| s.step_index == index)
    }

    pub fn last_step_index(&self) -> i32 {
        self.steps.iter().map(|s| s.step_index).max().unwrap_or(-1)
    }
}

#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "enrollment_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Completed,
    Cancelled,
}

/// Tracks one entity's progress through one sequence instance.
///
/// Invariant upheld by the enrollment manager and the storage uniqueness
/// guard: at most one Active enrollment per (sequence_id, entity_id).
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEnrollment {
    pub id: Uuid,
    pub sequence_id: Uuid,
    pub entity_id: Uuid,
    pub status: EnrollmentStatus,
    /// Index of the next step to execute.
    pub current_step: i32,
    pub started_by: String,
    pub start_from_step: i32,
    pub started_at: DateTime<Utc>,
    pub last_step_executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Outcome status of a logged automation attempt.
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "log_status", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    /// Sequence step executed inline at enrollment time.
    Executed,
    /// Scheduled for later pickup by the sequence runner.
    Pending,
    /// Rule action dispatched and acknowledged by the executor.
    Success,
    Failed,
    Skipped,
}

impl LogStatus {
    /// The only permitted in-place update is a pending row being resolved.
    pub fn may_transition_to(self, next: LogStatus) -> bool {
        matches!(
            (self, next),
            (LogStatus::Pending, LogStatus::Executed)
                | (LogStatus::Pending, LogStatus::Failed)
                | (LogStatus::Pending, LogStatus::Skipped)
        )
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, LogStatus::Pending)
    }
}

/// Append-only record of one attempted automated action.
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub id: Uuid,
    /// Set for rule-fired attempts.
    pub rule_id: Option<Uuid>,
    /// Set for sequence-step attempts.
    pub sequence_id: Option<Uuid>,
    pub enrollment_id: Option<Uuid>,
    pub step_index: Option<i32>,
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub action_type: ActionType,
    pub status: LogStatus,
    pub scheduled_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub error_detail: Option<String>,
    /// First line of the rendered template, kept for the audit view.
    pub rendered_preview: Option<String>,
}

/// Urgency of a scored follow-up item, ordered critical > warning > info.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// A human-readable, urgency-ranked follow-up item for the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionItem {
    pub entity_id: Uuid,
    pub entity_name: String,
    pub entity_type: EntityType,
    /// Machine-readable item kind, e.g. "speed_to_contact".
    pub kind: String,
    pub message: String,
    pub severity: Severity,
    pub phase: String,
}
