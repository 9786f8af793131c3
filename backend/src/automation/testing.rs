// Test doubles and fixtures shared by the automation unit tests

use async_trait::async_trait;
use carepath_shared::{
    ActionType, AutomationRule, EnrollmentStatus, EntitySnapshot, EntityType, ExecutionLogEntry,
    LogStatus, RuleConditions, Sequence, SequenceEnrollment, SequenceStep, TriggerType,
};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::actions::{ActionOutcome, ActionRequest};
use super::executor::ActionExecutor;
use super::store::{AutomationStore, EnrollmentPatch, LogFilter, StoreError};

/// A caregiver snapshot in the given phase, created "now".
pub fn caregiver(phase: &str) -> EntitySnapshot {
    EntitySnapshot {
        id: Uuid::new_v4(),
        entity_type: EntityType::Caregiver,
        first_name: "Maria".to_string(),
        last_name: "Santos".to_string(),
        phone: Some("555-0147".to_string()),
        email: Some("maria@example.com".to_string()),
        phase: phase.to_string(),
        tasks: Default::default(),
        notes: Vec::new(),
        phase_timestamps: Default::default(),
        created_at: Utc::now(),
    }
}

pub fn rule(
    trigger_type: TriggerType,
    conditions: RuleConditions,
    action_type: ActionType,
    template: &str,
) -> AutomationRule {
    AutomationRule {
        id: Uuid::new_v4(),
        name: format!("{action_type:?} on {trigger_type:?}"),
        entity_type: EntityType::Caregiver,
        trigger_type,
        conditions,
        action_type,
        action_config: serde_json::Value::Null,
        message_template: template.to_string(),
        enabled: true,
        created_at: Utc::now(),
        updated_at: None,
    }
}

/// A caregiver sequence from (delay_hours, action, template) triples.
pub fn sequence(steps: &[(f64, ActionType, &str)]) -> Sequence {
    Sequence {
        id: Uuid::new_v4(),
        name: "Test drip".to_string(),
        entity_type: EntityType::Caregiver,
        trigger_phase: None,
        enabled: true,
        steps: steps
            .iter()
            .enumerate()
            .map(|(i, (delay_hours, action_type, template))| SequenceStep {
                step_index: i as i32,
                delay_hours: *delay_hours,
                action_type: *action_type,
                template: (*template).to_string(),
                subject: None,
            })
            .collect(),
        created_at: Utc::now(),
    }
}

pub fn enrollment(status: EnrollmentStatus) -> SequenceEnrollment {
    SequenceEnrollment {
        id: Uuid::new_v4(),
        sequence_id: Uuid::new_v4(),
        entity_id: Uuid::new_v4(),
        status,
        current_step: 0,
        started_by: "automation".to_string(),
        start_from_step: 0,
        started_at: Utc::now(),
        last_step_executed_at: None,
        completed_at: None,
    }
}

/// In-memory store enforcing the same uniqueness guard as the Postgres
/// implementation.
#[derive(Default)]
pub struct MemoryStore {
    rules: Mutex<Vec<AutomationRule>>,
    sequences: Mutex<Vec<Sequence>>,
    enrollments: Mutex<Vec<SequenceEnrollment>>,
    log: Mutex<Vec<ExecutionLogEntry>>,
    entities: Mutex<Vec<EntitySnapshot>>,
    notes: Mutex<Vec<(Uuid, String)>>,
    fail_reads: AtomicBool,
}

impl MemoryStore {
    pub fn add_rule(&self, rule: AutomationRule) {
        self.rules.lock().unwrap().push(rule);
    }

    pub fn add_sequence(&self, sequence: Sequence) {
        self.sequences.lock().unwrap().push(sequence);
    }

    pub fn add_entity(&self, entity: EntitySnapshot) {
        self.entities.lock().unwrap().push(entity);
    }

    pub fn log(&self) -> Vec<ExecutionLogEntry> {
        self.log.lock().unwrap().clone()
    }

    pub fn enrollments_all(&self) -> Vec<SequenceEnrollment> {
        self.enrollments.lock().unwrap().clone()
    }

    pub fn notes(&self) -> Vec<(Uuid, String)> {
        self.notes.lock().unwrap().clone()
    }

    /// Make every read method fail, to exercise abandonment paths.
    pub fn fail_reads(&self) {
        self.fail_reads.store(true, Ordering::SeqCst);
    }

    fn read_guard(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }
}

#[async_trait]
impl AutomationStore for MemoryStore {
    async fn enabled_rules(
        &self,
        trigger: TriggerType,
        entity_type: EntityType,
    ) -> Result<Vec<AutomationRule>, StoreError> {
        self.read_guard()?;
        Ok(self
            .rules
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.enabled && r.trigger_type == trigger && r.entity_type == entity_type)
            .cloned()
            .collect())
    }

    async fn enabled_sequences(
        &self,
        entity_type: EntityType,
        trigger_phase: &str,
    ) -> Result<Vec<Sequence>, StoreError> {
        self.read_guard()?;
        Ok(self
            .sequences
            .lock()
            .unwrap()
            .iter()
            .filter(|s| {
                s.enabled
                    && s.entity_type == entity_type
                    && s.trigger_phase.as_deref() == Some(trigger_phase)
            })
            .cloned()
            .collect())
    }

    async fn sequence_by_id(&self, id: Uuid) -> Result<Option<Sequence>, StoreError> {
        self.read_guard()?;
        Ok(self
            .sequences
            .lock()
            .unwrap()
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn enrollments(
        &self,
        sequence_id: Uuid,
        entity_id: Uuid,
    ) -> Result<Vec<SequenceEnrollment>, StoreError> {
        self.read_guard()?;
        Ok(self
            .enrollments
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.sequence_id == sequence_id && e.entity_id == entity_id)
            .cloned()
            .collect())
    }

    async fn enrollment_by_id(&self, id: Uuid) -> Result<Option<SequenceEnrollment>, StoreError> {
        self.read_guard()?;
        Ok(self
            .enrollments
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn insert_enrollment(&self, enrollment: &SequenceEnrollment) -> Result<(), StoreError> {
        let mut enrollments = self.enrollments.lock().unwrap();
        let duplicate = enrollments.iter().any(|e| {
            e.sequence_id == enrollment.sequence_id
                && e.entity_id == enrollment.entity_id
                && e.status == EnrollmentStatus::Active
        });
        if duplicate && enrollment.status == EnrollmentStatus::Active {
            return Err(StoreError::Conflict);
        }
        enrollments.push(enrollment.clone());
        Ok(())
    }

    async fn update_enrollment(&self, id: Uuid, patch: EnrollmentPatch) -> Result<(), StoreError> {
        let mut enrollments = self.enrollments.lock().unwrap();
        let enrollment = enrollments
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(status) = patch.status {
            enrollment.status = status;
        }
        if let Some(step) = patch.current_step {
            enrollment.current_step = step;
        }
        if patch.last_step_executed_at.is_some() {
            enrollment.last_step_executed_at = patch.last_step_executed_at;
        }
        if patch.completed_at.is_some() {
            enrollment.completed_at = patch.completed_at;
        }
        Ok(())
    }

    async fn insert_log_entry(&self, entry: &ExecutionLogEntry) -> Result<(), StoreError> {
        self.log.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn mark_log_entry(
        &self,
        id: Uuid,
        status: LogStatus,
        executed_at: Option<DateTime<Utc>>,
        error_detail: Option<String>,
    ) -> Result<(), StoreError> {
        let mut log = self.log.lock().unwrap();
        let entry = log
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(StoreError::NotFound)?;
        if !entry.status.may_transition_to(status) {
            return Err(StoreError::InvalidTransition);
        }
        entry.status = status;
        entry.executed_at = executed_at;
        entry.error_detail = error_detail;
        Ok(())
    }

    async fn due_log_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        self.read_guard()?;
        let enrollments = self.enrollments.lock().unwrap();
        let active = |id: Option<Uuid>| {
            id.and_then(|id| enrollments.iter().find(|e| e.id == id))
                .map(|e| e.status == EnrollmentStatus::Active)
                .unwrap_or(false)
        };
        Ok(self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                e.status == LogStatus::Pending && e.scheduled_at <= now && active(e.enrollment_id)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn log_entries(&self, filter: LogFilter) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        self.read_guard()?;
        Ok(self
            .log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| {
                filter.entity_id.map(|id| e.entity_id == id).unwrap_or(true)
                    && filter.status.map(|s| e.status == s).unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn append_entity_note(
        &self,
        entity_id: Uuid,
        _entity_type: EntityType,
        body: &str,
        _author: &str,
    ) -> Result<(), StoreError> {
        self.notes
            .lock()
            .unwrap()
            .push((entity_id, body.to_string()));
        Ok(())
    }

    async fn update_entity_field(
        &self,
        entity_id: Uuid,
        _entity_type: EntityType,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut entities = self.entities.lock().unwrap();
        let entity = entities
            .iter_mut()
            .find(|e| e.id == entity_id)
            .ok_or(StoreError::NotFound)?;
        if field == "phase" {
            if let serde_json::Value::String(phase) = value {
                entity.phase = phase.clone();
            }
        }
        Ok(())
    }

    async fn entity_snapshot(
        &self,
        entity_id: Uuid,
        entity_type: EntityType,
    ) -> Result<Option<EntitySnapshot>, StoreError> {
        self.read_guard()?;
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == entity_id && e.entity_type == entity_type)
            .cloned())
    }

    async fn entities_idle_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EntitySnapshot>, StoreError> {
        self.read_guard()?;
        Ok(self
            .entities
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.last_note_at().unwrap_or(e.created_at) <= cutoff)
            .cloned()
            .collect())
    }

    async fn entities_in_pipeline(&self) -> Result<Vec<EntitySnapshot>, StoreError> {
        self.read_guard()?;
        Ok(self.entities.lock().unwrap().clone())
    }

    async fn all_rules(&self) -> Result<Vec<AutomationRule>, StoreError> {
        self.read_guard()?;
        Ok(self.rules.lock().unwrap().clone())
    }

    async fn all_sequences(&self) -> Result<Vec<Sequence>, StoreError> {
        self.read_guard()?;
        Ok(self.sequences.lock().unwrap().clone())
    }
}

/// Executor that records every request and can be told to fail specific
/// action types.
#[derive(Default)]
pub struct RecordingExecutor {
    requests: Mutex<Vec<ActionRequest>>,
    failures: Mutex<Vec<(ActionType, String)>>,
}

impl RecordingExecutor {
    pub fn requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn fail_action(&self, action_type: ActionType, detail: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((action_type, detail.to_string()));
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, request: ActionRequest) -> ActionOutcome {
        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(action, _)| *action == request.action_type)
            .map(|(_, detail)| detail.clone());

        self.requests.lock().unwrap().push(request);

        match failure {
            Some(detail) => ActionOutcome::failed(detail),
            None => ActionOutcome::success(),
        }
    }
}
