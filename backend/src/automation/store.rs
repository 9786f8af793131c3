// Storage boundary for the automation engine
//
// The engine never touches entity rows directly; everything goes through
// this trait. The Postgres implementation carries the uniqueness guard that
// makes concurrent enrollment races safe: a partial unique index on
// (sequence_id, entity_id) WHERE status = 'active', surfaced as
// `StoreError::Conflict`.

use async_trait::async_trait;
use carepath_shared::{
    AutomationRule, EnrollmentStatus, EntitySnapshot, EntityType, ExecutionLogEntry, LogStatus,
    RuleConditions, Sequence, SequenceEnrollment, SequenceStep, TriggerType,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Another active enrollment already exists for the same pair.
    #[error("duplicate active enrollment")]
    Conflict,
    #[error("row not found")]
    NotFound,
    /// Attempted log update other than pending -> executed/failed/skipped.
    #[error("invalid log status transition")]
    InvalidTransition,
    #[error("unknown entity field: {0}")]
    UnknownField(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Partial update applied to an enrollment row. Unset fields keep their
/// current value.
#[derive(Debug, Clone, Default)]
pub struct EnrollmentPatch {
    pub status: Option<EnrollmentStatus>,
    pub current_step: Option<i32>,
    pub last_step_executed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Filter for the audit/log listing endpoints.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub entity_id: Option<Uuid>,
    pub status: Option<LogStatus>,
    pub limit: i64,
}

#[async_trait]
pub trait AutomationStore: Send + Sync {
    async fn enabled_rules(
        &self,
        trigger: TriggerType,
        entity_type: EntityType,
    ) -> Result<Vec<AutomationRule>, StoreError>;

    async fn enabled_sequences(
        &self,
        entity_type: EntityType,
        trigger_phase: &str,
    ) -> Result<Vec<Sequence>, StoreError>;

    async fn sequence_by_id(&self, id: Uuid) -> Result<Option<Sequence>, StoreError>;

    /// Every enrollment ever created for the pair, newest first.
    async fn enrollments(
        &self,
        sequence_id: Uuid,
        entity_id: Uuid,
    ) -> Result<Vec<SequenceEnrollment>, StoreError>;

    async fn enrollment_by_id(&self, id: Uuid) -> Result<Option<SequenceEnrollment>, StoreError>;

    /// Insert a new enrollment. Returns `StoreError::Conflict` when an
    /// active enrollment for (sequence_id, entity_id) already exists.
    async fn insert_enrollment(&self, enrollment: &SequenceEnrollment) -> Result<(), StoreError>;

    async fn update_enrollment(&self, id: Uuid, patch: EnrollmentPatch) -> Result<(), StoreError>;

    async fn insert_log_entry(&self, entry: &ExecutionLogEntry) -> Result<(), StoreError>;

    /// Resolve a pending log row. Any source status other than `pending`
    /// yields `StoreError::InvalidTransition`.
    async fn mark_log_entry(
        &self,
        id: Uuid,
        status: LogStatus,
        executed_at: Option<DateTime<Utc>>,
        error_detail: Option<String>,
    ) -> Result<(), StoreError>;

    /// Pending entries due at `now` whose enrollment is still active.
    async fn due_log_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError>;

    async fn log_entries(&self, filter: LogFilter) -> Result<Vec<ExecutionLogEntry>, StoreError>;

    async fn append_entity_note(
        &self,
        entity_id: Uuid,
        entity_type: EntityType,
        body: &str,
        author: &str,
    ) -> Result<(), StoreError>;

    async fn update_entity_field(
        &self,
        entity_id: Uuid,
        entity_type: EntityType,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn entity_snapshot(
        &self,
        entity_id: Uuid,
        entity_type: EntityType,
    ) -> Result<Option<EntitySnapshot>, StoreError>;

    /// Entities whose last recorded activity is at or before `cutoff`.
    async fn entities_idle_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EntitySnapshot>, StoreError>;

    /// Every non-archived entity, for the action-items dashboard.
    async fn entities_in_pipeline(&self) -> Result<Vec<EntitySnapshot>, StoreError>;

    async fn all_rules(&self) -> Result<Vec<AutomationRule>, StoreError>;

    async fn all_sequences(&self) -> Result<Vec<Sequence>, StoreError>;
}

pub struct PgAutomationStore {
    pool: PgPool,
}

impl PgAutomationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

type RuleRow = (
    Uuid,
    String,
    EntityType,
    TriggerType,
    serde_json::Value,
    carepath_shared::ActionType,
    serde_json::Value,
    String,
    bool,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
);

type SequenceRow = (
    Uuid,
    String,
    EntityType,
    Option<String>,
    bool,
    serde_json::Value,
    DateTime<Utc>,
);

type EntityRow = (
    Uuid,
    EntityType,
    String,
    String,
    Option<String>,
    Option<String>,
    String,
    serde_json::Value,
    serde_json::Value,
    serde_json::Value,
    DateTime<Utc>,
);

const RULE_COLUMNS: &str = "id, name, entity_type, trigger_type, conditions, action_type, \
     action_config, message_template, enabled, created_at, updated_at";

const SEQUENCE_COLUMNS: &str =
    "id, name, entity_type, trigger_phase, enabled, steps, created_at";

const ENTITY_COLUMNS: &str = "id, entity_type, first_name, last_name, phone, email, phase, \
     tasks, notes, phase_timestamps, created_at";

fn rule_from_row(row: RuleRow) -> AutomationRule {
    // Stored condition JSON may carry keys newer than this build; the
    // tolerant reader ignores them instead of dropping the rule.
    let conditions: RuleConditions = serde_json::from_value(row.4).unwrap_or_default();
    AutomationRule {
        id: row.0,
        name: row.1,
        entity_type: row.2,
        trigger_type: row.3,
        conditions,
        action_type: row.5,
        action_config: row.6,
        message_template: row.7,
        enabled: row.8,
        created_at: row.9,
        updated_at: row.10,
    }
}

fn sequence_from_row(row: SequenceRow) -> Option<Sequence> {
    let steps: Vec<SequenceStep> = serde_json::from_value(row.5).ok()?;
    Some(Sequence {
        id: row.0,
        name: row.1,
        entity_type: row.2,
        trigger_phase: row.3,
        enabled: row.4,
        steps,
        created_at: row.6,
    })
}

fn entity_from_row(row: EntityRow) -> EntitySnapshot {
    EntitySnapshot {
        id: row.0,
        entity_type: row.1,
        first_name: row.2,
        last_name: row.3,
        phone: row.4,
        email: row.5,
        phase: row.6,
        tasks: serde_json::from_value(row.7).unwrap_or_default(),
        notes: serde_json::from_value(row.8).unwrap_or_default(),
        phase_timestamps: serde_json::from_value(row.9).unwrap_or_default(),
        created_at: row.10,
    }
}

fn map_unique_violation(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => StoreError::Conflict,
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl AutomationStore for PgAutomationStore {
    async fn enabled_rules(
        &self,
        trigger: TriggerType,
        entity_type: EntityType,
    ) -> Result<Vec<AutomationRule>, StoreError> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM automation_rules \
             WHERE enabled = true AND trigger_type = $1 AND entity_type = $2 \
             ORDER BY created_at ASC"
        ))
        .bind(trigger)
        .bind(entity_type)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(rule_from_row).collect())
    }

    async fn enabled_sequences(
        &self,
        entity_type: EntityType,
        trigger_phase: &str,
    ) -> Result<Vec<Sequence>, StoreError> {
        let rows = sqlx::query_as::<_, SequenceRow>(&format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sequences \
             WHERE enabled = true AND entity_type = $1 AND trigger_phase = $2 \
             ORDER BY created_at ASC"
        ))
        .bind(entity_type)
        .bind(trigger_phase)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(sequence_from_row).collect())
    }

    async fn sequence_by_id(&self, id: Uuid) -> Result<Option<Sequence>, StoreError> {
        let row = sqlx::query_as::<_, SequenceRow>(&format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sequences WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(sequence_from_row))
    }

    async fn enrollments(
        &self,
        sequence_id: Uuid,
        entity_id: Uuid,
    ) -> Result<Vec<SequenceEnrollment>, StoreError> {
        let rows = sqlx::query_as::<_, SequenceEnrollment>(
            "SELECT * FROM sequence_enrollments \
             WHERE sequence_id = $1 AND entity_id = $2 \
             ORDER BY started_at DESC",
        )
        .bind(sequence_id)
        .bind(entity_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn enrollment_by_id(&self, id: Uuid) -> Result<Option<SequenceEnrollment>, StoreError> {
        let row = sqlx::query_as::<_, SequenceEnrollment>(
            "SELECT * FROM sequence_enrollments WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn insert_enrollment(&self, enrollment: &SequenceEnrollment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sequence_enrollments \
             (id, sequence_id, entity_id, status, current_step, started_by, start_from_step, \
              started_at, last_step_executed_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(enrollment.id)
        .bind(enrollment.sequence_id)
        .bind(enrollment.entity_id)
        .bind(enrollment.status)
        .bind(enrollment.current_step)
        .bind(&enrollment.started_by)
        .bind(enrollment.start_from_step)
        .bind(enrollment.started_at)
        .bind(enrollment.last_step_executed_at)
        .bind(enrollment.completed_at)
        .execute(&self.pool)
        .await
        .map_err(map_unique_violation)?;

        Ok(())
    }

    async fn update_enrollment(&self, id: Uuid, patch: EnrollmentPatch) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE sequence_enrollments SET \
             status = COALESCE($2, status), \
             current_step = COALESCE($3, current_step), \
             last_step_executed_at = COALESCE($4, last_step_executed_at), \
             completed_at = COALESCE($5, completed_at) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(patch.status)
        .bind(patch.current_step)
        .bind(patch.last_step_executed_at)
        .bind(patch.completed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn insert_log_entry(&self, entry: &ExecutionLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO automation_log \
             (id, rule_id, sequence_id, enrollment_id, step_index, entity_id, entity_type, \
              action_type, status, scheduled_at, executed_at, error_detail, rendered_preview) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(entry.id)
        .bind(entry.rule_id)
        .bind(entry.sequence_id)
        .bind(entry.enrollment_id)
        .bind(entry.step_index)
        .bind(entry.entity_id)
        .bind(entry.entity_type)
        .bind(entry.action_type)
        .bind(entry.status)
        .bind(entry.scheduled_at)
        .bind(entry.executed_at)
        .bind(&entry.error_detail)
        .bind(&entry.rendered_preview)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_log_entry(
        &self,
        id: Uuid,
        status: LogStatus,
        executed_at: Option<DateTime<Utc>>,
        error_detail: Option<String>,
    ) -> Result<(), StoreError> {
        if !LogStatus::Pending.may_transition_to(status) {
            return Err(StoreError::InvalidTransition);
        }

        // The status guard in the WHERE clause makes the flip idempotent
        // under concurrent runners: only one update can win.
        let result = sqlx::query(
            "UPDATE automation_log \
             SET status = $2, executed_at = $3, error_detail = $4 \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(status)
        .bind(executed_at)
        .bind(error_detail)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::InvalidTransition);
        }
        Ok(())
    }

    async fn due_log_entries(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let rows = sqlx::query_as::<_, ExecutionLogEntry>(
            "SELECT l.* FROM automation_log l \
             JOIN sequence_enrollments e ON l.enrollment_id = e.id \
             WHERE l.status = 'pending' AND l.scheduled_at <= $1 AND e.status = 'active' \
             ORDER BY l.scheduled_at ASC \
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn log_entries(&self, filter: LogFilter) -> Result<Vec<ExecutionLogEntry>, StoreError> {
        let limit = if filter.limit > 0 { filter.limit } else { 100 };
        let rows = sqlx::query_as::<_, ExecutionLogEntry>(
            "SELECT * FROM automation_log \
             WHERE ($1::uuid IS NULL OR entity_id = $1) \
               AND ($2::log_status IS NULL OR status = $2) \
             ORDER BY scheduled_at DESC \
             LIMIT $3",
        )
        .bind(filter.entity_id)
        .bind(filter.status)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn append_entity_note(
        &self,
        entity_id: Uuid,
        entity_type: EntityType,
        body: &str,
        author: &str,
    ) -> Result<(), StoreError> {
        let note = serde_json::json!([{
            "body": body,
            "author": author,
            "created_at": Utc::now(),
        }]);

        let result = sqlx::query(
            "UPDATE pipeline_entities \
             SET notes = notes || $3::jsonb, last_activity_at = NOW() \
             WHERE id = $1 AND entity_type = $2",
        )
        .bind(entity_id)
        .bind(entity_type)
        .bind(note)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_entity_field(
        &self,
        entity_id: Uuid,
        entity_type: EntityType,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<(), StoreError> {
        // Column whitelist; arbitrary field names never reach SQL.
        let column = match field {
            "phase" | "first_name" | "last_name" | "phone" | "email" => field,
            other => return Err(StoreError::UnknownField(other.to_string())),
        };

        let text = match value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        let result = sqlx::query(&format!(
            "UPDATE pipeline_entities SET {column} = $3, last_activity_at = NOW() \
             WHERE id = $1 AND entity_type = $2"
        ))
        .bind(entity_id)
        .bind(entity_type)
        .bind(text)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }

        // Record first entry into a phase for days-in-phase math.
        if column == "phase" {
            if let serde_json::Value::String(phase) = value {
                sqlx::query(
                    "UPDATE pipeline_entities \
                     SET phase_timestamps = phase_timestamps || \
                         jsonb_build_object($3::text, NOW()) \
                     WHERE id = $1 AND entity_type = $2 \
                       AND NOT phase_timestamps ? $3::text",
                )
                .bind(entity_id)
                .bind(entity_type)
                .bind(phase)
                .execute(&self.pool)
                .await?;
            }
        }

        Ok(())
    }

    async fn entity_snapshot(
        &self,
        entity_id: Uuid,
        entity_type: EntityType,
    ) -> Result<Option<EntitySnapshot>, StoreError> {
        let row = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM pipeline_entities \
             WHERE id = $1 AND entity_type = $2"
        ))
        .bind(entity_id)
        .bind(entity_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(entity_from_row))
    }

    async fn entities_idle_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<EntitySnapshot>, StoreError> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM pipeline_entities \
             WHERE archived_at IS NULL \
               AND COALESCE(last_activity_at, created_at) <= $1 \
             ORDER BY created_at ASC"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(entity_from_row).collect())
    }

    async fn entities_in_pipeline(&self) -> Result<Vec<EntitySnapshot>, StoreError> {
        let rows = sqlx::query_as::<_, EntityRow>(&format!(
            "SELECT {ENTITY_COLUMNS} FROM pipeline_entities \
             WHERE archived_at IS NULL \
             ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(entity_from_row).collect())
    }

    async fn all_rules(&self) -> Result<Vec<AutomationRule>, StoreError> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {RULE_COLUMNS} FROM automation_rules ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(rule_from_row).collect())
    }

    async fn all_sequences(&self) -> Result<Vec<Sequence>, StoreError> {
        let rows = sqlx::query_as::<_, SequenceRow>(&format!(
            "SELECT {SEQUENCE_COLUMNS} FROM sequences ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(sequence_from_row).collect())
    }
}
