// Sequence enrollment manager - the drip-campaign state machine
//
// Enrollments move active -> completed | cancelled. The core correctness
// property: at most one active enrollment per (sequence, entity), upheld by
// the dedup check here plus the store's uniqueness guard for the race where
// two triggers enroll concurrently.

use carepath_shared::{
    ActionType, EnrollmentStatus, EntitySnapshot, ExecutionLogEntry, LogStatus, Sequence,
    SequenceEnrollment, SequenceStep,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::{ActionRequest, OutcomeStatus};
use super::executor::ActionExecutor;
use super::log::{self, log_or_warn};
use super::merge_fields;
use super::store::{AutomationStore, EnrollmentPatch, StoreError};

/// True iff a new enrollment may be created for this history: no existing
/// entry is still active. Completed and cancelled runs never block.
pub fn should_auto_enroll(existing: &[SequenceEnrollment]) -> bool {
    !existing
        .iter()
        .any(|e| e.status == EnrollmentStatus::Active)
}

/// User-facing delay units for sequence steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
}

/// Break an hour count into the largest unit that represents it cleanly.
/// Sub-hour delays come back in minutes, whole multiples of 24h in days.
pub fn decompose_delay(hours: f64) -> (f64, DelayUnit) {
    if hours > 0.0 && hours < 1.0 {
        ((hours * 60.0).round(), DelayUnit::Minutes)
    } else if hours >= 24.0 && hours % 24.0 == 0.0 {
        (hours / 24.0, DelayUnit::Days)
    } else {
        (hours, DelayUnit::Hours)
    }
}

/// Inverse of [`decompose_delay`], lossless except sub-minute rounding.
pub fn compose_delay(value: f64, unit: DelayUnit) -> f64 {
    match unit {
        DelayUnit::Minutes => value / 60.0,
        DelayUnit::Hours => value,
        DelayUnit::Days => value * 24.0,
    }
}

/// Wall-clock deadline for a delayed step.
pub fn step_deadline(now: DateTime<Utc>, delay_hours: f64) -> DateTime<Utc> {
    now + Duration::milliseconds((delay_hours * 3_600_000.0).round() as i64)
}

/// Result of an enrollment attempt. Duplicate enrollment is expected
/// control flow, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled { enrollment_id: Uuid },
    AlreadyEnrolled,
    /// Storage failed mid-flight; logged, nothing surfaced to the caller.
    Aborted,
}

pub struct SequenceManager {
    store: Arc<dyn AutomationStore>,
    executor: Arc<dyn ActionExecutor>,
}

impl SequenceManager {
    pub fn new(store: Arc<dyn AutomationStore>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self { store, executor }
    }

    /// Enroll an entity into a sequence, executing the leading run of
    /// delay-zero steps inline and scheduling the rest for pickup.
    pub async fn enroll(
        &self,
        sequence: &Sequence,
        entity: &EntitySnapshot,
        started_by: &str,
        start_from_step: i32,
    ) -> EnrollOutcome {
        let now = Utc::now();

        let existing = match self.store.enrollments(sequence.id, entity.id).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!("automation: enrollment lookup failed for {}: {e}", sequence.id);
                return EnrollOutcome::Aborted;
            }
        };

        if !should_auto_enroll(&existing) {
            self.note_duplicate(sequence, entity).await;
            return EnrollOutcome::AlreadyEnrolled;
        }

        let mut enrollment = SequenceEnrollment {
            id: Uuid::new_v4(),
            sequence_id: sequence.id,
            entity_id: entity.id,
            status: EnrollmentStatus::Active,
            current_step: start_from_step,
            started_by: started_by.to_string(),
            start_from_step,
            started_at: now,
            last_step_executed_at: None,
            completed_at: None,
        };

        match self.store.insert_enrollment(&enrollment).await {
            Ok(()) => {}
            // Lost the check-then-act race to a concurrent trigger: the
            // other enrollment stands, ours is a duplicate.
            Err(StoreError::Conflict) => {
                self.note_duplicate(sequence, entity).await;
                return EnrollOutcome::AlreadyEnrolled;
            }
            Err(e) => {
                warn!("automation: enrollment insert failed for {}: {e}", sequence.id);
                return EnrollOutcome::Aborted;
            }
        }

        info!(
            "automation: enrolled entity {} in sequence '{}' at step {}",
            entity.id, sequence.name, start_from_step
        );

        self.run_inline_steps(sequence, &mut enrollment, entity, now)
            .await;
        self.schedule_remaining(sequence, &enrollment, entity, now)
            .await;
        self.persist_progress(&enrollment).await;

        EnrollOutcome::Enrolled {
            enrollment_id: enrollment.id,
        }
    }

    /// Pickup path for a due pending entry, re-invoked by the external
    /// scheduler. Mirrors the inline execution logic: executes the step,
    /// resolves the pending row, advances or completes the enrollment.
    ///
    /// The enrollment-status re-check is mandatory: entries scheduled before
    /// a cancellation must die here, not execute.
    pub async fn execute_due_step(
        &self,
        entry: &ExecutionLogEntry,
    ) -> Result<LogStatus, StoreError> {
        let enrollment_id = entry.enrollment_id.ok_or(StoreError::NotFound)?;
        let sequence_id = entry.sequence_id.ok_or(StoreError::NotFound)?;
        let step_index = entry.step_index.ok_or(StoreError::NotFound)?;
        let now = Utc::now();

        let enrollment = self
            .store
            .enrollment_by_id(enrollment_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if enrollment.status != EnrollmentStatus::Active {
            self.store
                .mark_log_entry(
                    entry.id,
                    LogStatus::Skipped,
                    Some(now),
                    Some("enrollment no longer active".to_string()),
                )
                .await?;
            return Ok(LogStatus::Skipped);
        }

        let sequence = self
            .store
            .sequence_by_id(sequence_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        let entity = self
            .store
            .entity_snapshot(entry.entity_id, entry.entity_type)
            .await?
            .ok_or(StoreError::NotFound)?;

        let Some(step) = sequence.step(step_index) else {
            self.store
                .mark_log_entry(
                    entry.id,
                    LogStatus::Skipped,
                    Some(now),
                    Some("step no longer exists".to_string()),
                )
                .await?;
            return Ok(LogStatus::Skipped);
        };

        let (status, detail, _) = self
            .perform_step(&sequence, &enrollment, step, &entity, now)
            .await;

        self.store
            .mark_log_entry(entry.id, status, Some(now), detail)
            .await?;

        let next_step = (step_index + 1).max(enrollment.current_step);
        let mut patch = EnrollmentPatch {
            current_step: Some(next_step),
            last_step_executed_at: Some(now),
            ..Default::default()
        };
        if next_step > sequence.last_step_index() {
            patch.status = Some(EnrollmentStatus::Completed);
            patch.completed_at = Some(now);
        }
        self.store.update_enrollment(enrollment.id, patch).await?;

        Ok(status)
    }

    /// Cancel an active enrollment. Already-scheduled pending entries stay
    /// in place and are skipped at pickup by the status re-check.
    pub async fn cancel(&self, enrollment_id: Uuid) -> Result<bool, StoreError> {
        let enrollment = self
            .store
            .enrollment_by_id(enrollment_id)
            .await?
            .ok_or(StoreError::NotFound)?;

        if enrollment.status != EnrollmentStatus::Active {
            return Ok(false);
        }

        self.store
            .update_enrollment(
                enrollment_id,
                EnrollmentPatch {
                    status: Some(EnrollmentStatus::Cancelled),
                    ..Default::default()
                },
            )
            .await?;

        info!("automation: cancelled enrollment {}", enrollment_id);
        Ok(true)
    }

    /// Auto-enroll the entity into every enabled sequence triggered by the
    /// phase it just entered. Best-effort; failures are contained per
    /// sequence.
    pub async fn handle_phase_change(&self, entity: &EntitySnapshot, to_phase: &str) {
        let sequences = match self
            .store
            .enabled_sequences(entity.entity_type, to_phase)
            .await
        {
            Ok(sequences) => sequences,
            Err(e) => {
                warn!("automation: sequence fetch failed for phase '{to_phase}': {e}");
                return;
            }
        };

        for sequence in sequences {
            self.enroll(&sequence, entity, "automation", 0).await;
        }
    }

    async fn note_duplicate(&self, sequence: &Sequence, entity: &EntitySnapshot) {
        let note = format!(
            "Skipped enrollment in '{}': an active enrollment already exists",
            sequence.name
        );
        log_or_warn(
            self.store
                .append_entity_note(entity.id, entity.entity_type, &note, "automation")
                .await,
            "record duplicate-enrollment note",
        );
    }

    /// Execute the leading run of delay-zero steps synchronously, advancing
    /// `current_step` after each. Completes the enrollment when the final
    /// step executes.
    async fn run_inline_steps(
        &self,
        sequence: &Sequence,
        enrollment: &mut SequenceEnrollment,
        entity: &EntitySnapshot,
        now: DateTime<Utc>,
    ) {
        while enrollment.status == EnrollmentStatus::Active {
            if enrollment.current_step > sequence.last_step_index() {
                enrollment.status = EnrollmentStatus::Completed;
                enrollment.completed_at = Some(now);
                break;
            }

            let Some(step) = sequence.step(enrollment.current_step) else {
                // Gap in step indices; skip over it.
                enrollment.current_step += 1;
                continue;
            };

            if step.delay_hours > 0.0 {
                break;
            }

            let (status, detail, rendered) = self
                .perform_step(sequence, enrollment, step, entity, now)
                .await;
            let mut log_entry =
                log::step_executed_entry(sequence, enrollment, step, entity, &rendered, now);
            log_entry.status = status;
            log_entry.error_detail = detail;
            log_or_warn(
                self.store.insert_log_entry(&log_entry).await,
                "record inline step",
            );

            enrollment.current_step += 1;
            enrollment.last_step_executed_at = Some(now);
        }
    }

    /// Write a pending row for every step from the current index onward.
    /// The enrollment itself is not advanced for these; advancement happens
    /// at pickup.
    async fn schedule_remaining(
        &self,
        sequence: &Sequence,
        enrollment: &SequenceEnrollment,
        entity: &EntitySnapshot,
        now: DateTime<Utc>,
    ) {
        if enrollment.status != EnrollmentStatus::Active {
            return;
        }

        for step in sequence
            .steps
            .iter()
            .filter(|s| s.step_index >= enrollment.current_step)
        {
            let scheduled_at = step_deadline(now, step.delay_hours);
            let entry = log::step_pending_entry(sequence, enrollment, step, entity, scheduled_at);
            log_or_warn(
                self.store.insert_log_entry(&entry).await,
                "schedule delayed step",
            );
        }
    }

    async fn persist_progress(&self, enrollment: &SequenceEnrollment) {
        let patch = EnrollmentPatch {
            status: Some(enrollment.status),
            current_step: Some(enrollment.current_step),
            last_step_executed_at: enrollment.last_step_executed_at,
            completed_at: enrollment.completed_at,
        };
        log_or_warn(
            self.store.update_enrollment(enrollment.id, patch).await,
            "persist enrollment progress",
        );
    }

    /// Execute one step's action. Follow-up tasks append a note directly;
    /// everything else goes through the executor boundary. Returns the log
    /// status, failure detail, and the rendered template.
    async fn perform_step(
        &self,
        sequence: &Sequence,
        enrollment: &SequenceEnrollment,
        step: &SequenceStep,
        entity: &EntitySnapshot,
        now: DateTime<Utc>,
    ) -> (LogStatus, Option<String>, String) {
        let rendered = merge_fields::resolve(&step.template, entity, now);

        if step.action_type == ActionType::CreateTask {
            let note = format!("Follow-up task: {rendered}");
            let appended = self
                .store
                .append_entity_note(entity.id, entity.entity_type, &note, "automation")
                .await;
            return match appended {
                Ok(()) => (LogStatus::Executed, None, rendered),
                Err(e) => (LogStatus::Failed, Some(e.to_string()), rendered),
            };
        }

        let request =
            ActionRequest::from_step(sequence.id, enrollment.id, step, entity, rendered.clone());
        let outcome = self.executor.execute(request).await;
        match outcome.status {
            OutcomeStatus::Success => (LogStatus::Executed, None, rendered),
            OutcomeStatus::Failed => (LogStatus::Failed, outcome.detail, rendered),
            OutcomeStatus::Skipped => (LogStatus::Skipped, outcome.detail, rendered),
        }
    }
}
