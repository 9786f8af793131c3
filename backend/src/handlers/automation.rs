use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use carepath_shared::{
    ActionItem, AutomationRule, EntityType, ExecutionLogEntry, LogStatus, Sequence, TriggerType,
};

use crate::automation::{
    self, decompose_delay, DelayUnit, EnrollOutcome, LogFilter, TriggerEvent,
};
use crate::error::{ApiResult, AppError};
use crate::AppState;

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rules", get(list_rules))
        .route("/sequences", get(list_sequences))
        .route("/sequences/:id/enrollments", post(enroll))
        .route("/enrollments/:id/cancel", post(cancel_enrollment))
        .route("/log", get(list_log))
        .route("/action-items", get(action_items))
        .route("/events", post(submit_event))
}

async fn list_rules(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<AutomationRule>>> {
    let rules = state.store.all_rules().await?;
    Ok(Json(rules))
}

/// Step delay rendered in the largest clean unit for the sequence editor.
#[derive(Serialize)]
pub struct StepDelayView {
    pub step_index: i32,
    pub delay_value: f64,
    pub delay_unit: DelayUnit,
}

#[derive(Serialize)]
pub struct SequenceView {
    #[serde(flatten)]
    pub sequence: Sequence,
    pub step_delays: Vec<StepDelayView>,
}

async fn list_sequences(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<SequenceView>>> {
    let sequences = state.store.all_sequences().await?;
    let views = sequences
        .into_iter()
        .map(|sequence| {
            let step_delays = sequence
                .steps
                .iter()
                .map(|step| {
                    let (delay_value, delay_unit) = decompose_delay(step.delay_hours);
                    StepDelayView {
                        step_index: step.step_index,
                        delay_value,
                        delay_unit,
                    }
                })
                .collect();
            SequenceView {
                sequence,
                step_delays,
            }
        })
        .collect();
    Ok(Json(views))
}

#[derive(Deserialize)]
pub struct EnrollRequest {
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub started_by: Option<String>,
    pub start_from_step: Option<i32>,
}

#[derive(Serialize)]
pub struct EnrollResponse {
    pub outcome: String,
    pub enrollment_id: Option<Uuid>,
}

async fn enroll(
    State(state): State<Arc<AppState>>,
    Path(sequence_id): Path<Uuid>,
    Json(body): Json<EnrollRequest>,
) -> ApiResult<(StatusCode, Json<EnrollResponse>)> {
    let sequence = state
        .store
        .sequence_by_id(sequence_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Sequence".to_string()))?;

    if sequence.entity_type != body.entity_type {
        return Err(AppError::BadRequest(
            "Sequence targets a different entity type".to_string(),
        ));
    }

    let entity = state
        .store
        .entity_snapshot(body.entity_id, body.entity_type)
        .await?
        .ok_or_else(|| AppError::NotFound("Entity".to_string()))?;

    let started_by = body.started_by.as_deref().unwrap_or("manual");
    let outcome = state
        .sequences
        .enroll(
            &sequence,
            &entity,
            started_by,
            body.start_from_step.unwrap_or(0),
        )
        .await;

    let response = match outcome {
        EnrollOutcome::Enrolled { enrollment_id } => (
            StatusCode::CREATED,
            Json(EnrollResponse {
                outcome: "enrolled".to_string(),
                enrollment_id: Some(enrollment_id),
            }),
        ),
        EnrollOutcome::AlreadyEnrolled => (
            StatusCode::OK,
            Json(EnrollResponse {
                outcome: "already_enrolled".to_string(),
                enrollment_id: None,
            }),
        ),
        EnrollOutcome::Aborted => {
            return Err(AppError::InternalError(
                "Enrollment aborted by storage failure".to_string(),
            ))
        }
    };

    Ok(response)
}

async fn cancel_enrollment(
    State(state): State<Arc<AppState>>,
    Path(enrollment_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let cancelled = state.sequences.cancel(enrollment_id).await?;
    Ok(Json(serde_json::json!({ "cancelled": cancelled })))
}

#[derive(Deserialize)]
pub struct LogQuery {
    pub entity_id: Option<Uuid>,
    pub status: Option<LogStatus>,
    pub limit: Option<i64>,
}

async fn list_log(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LogQuery>,
) -> ApiResult<Json<Vec<ExecutionLogEntry>>> {
    let entries = state
        .store
        .log_entries(LogFilter {
            entity_id: params.entity_id,
            status: params.status,
            limit: params.limit.unwrap_or(100),
        })
        .await?;
    Ok(Json(entries))
}

async fn action_items(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ActionItem>>> {
    let entities = state.store.entities_in_pipeline().await?;
    let items = automation::score(&entities, &state.scorer, chrono::Utc::now());
    Ok(Json(items))
}

#[derive(Deserialize)]
pub struct EventRequest {
    pub trigger_type: TriggerType,
    pub entity_id: Uuid,
    pub entity_type: EntityType,
    pub from_phase: Option<String>,
    pub to_phase: Option<String>,
    pub task_id: Option<String>,
    pub message_text: Option<String>,
    pub document_name: Option<String>,
    pub idle_days: Option<i64>,
}

/// Manual trigger injection for testing rules from the admin UI. The event
/// is queued fire-and-forget, exactly like one raised by a record mutation.
async fn submit_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EventRequest>,
) -> ApiResult<StatusCode> {
    let entity = state
        .store
        .entity_snapshot(body.entity_id, body.entity_type)
        .await?
        .ok_or_else(|| AppError::NotFound("Entity".to_string()))?;

    let event = match body.trigger_type {
        TriggerType::NewRecord => TriggerEvent::new_record(entity),
        TriggerType::PhaseChange => {
            let (Some(from), Some(to)) = (&body.from_phase, &body.to_phase) else {
                return Err(AppError::BadRequest(
                    "phase_change requires from_phase and to_phase".to_string(),
                ));
            };
            TriggerEvent::phase_change(entity, from, to)
        }
        TriggerType::TaskCompleted => {
            let Some(task_id) = &body.task_id else {
                return Err(AppError::BadRequest(
                    "task_completed requires task_id".to_string(),
                ));
            };
            TriggerEvent::task_completed(entity, task_id, "manual")
        }
        TriggerType::InboundMessage => {
            let Some(text) = &body.message_text else {
                return Err(AppError::BadRequest(
                    "inbound_message requires message_text".to_string(),
                ));
            };
            TriggerEvent::inbound_message(entity, text)
        }
        TriggerType::DocumentUploaded => {
            TriggerEvent::document_uploaded(entity, body.document_name.as_deref().unwrap_or(""))
        }
        TriggerType::DocumentSigned => {
            TriggerEvent::document_signed(entity, body.document_name.as_deref().unwrap_or(""))
        }
        TriggerType::DaysInactive => {
            TriggerEvent::days_inactive(entity, body.idle_days.unwrap_or(0))
        }
    };

    state.engine.submit(event);

    Ok(StatusCode::ACCEPTED)
}
