// Action executor boundary
//
// Communication providers (SMS/email/telephony, document packets) live
// outside the automation core. The contract: accept a request, perform the
// side effect, report a terminal status. Never raises to the caller.

use async_trait::async_trait;
use carepath_shared::ActionType;
use std::sync::Arc;
use tracing::info;

use super::actions::{ActionOutcome, ActionRequest};
use super::store::AutomationStore;

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: ActionRequest) -> ActionOutcome;
}

/// Default executor: performs record-mutation actions through the store
/// boundary and reports communication actions as skipped until a provider
/// is wired in. Provider errors never raise; they come back as `Failed`.
pub struct StoreExecutor {
    store: Arc<dyn AutomationStore>,
}

impl StoreExecutor {
    pub fn new(store: Arc<dyn AutomationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ActionExecutor for StoreExecutor {
    async fn execute(&self, request: ActionRequest) -> ActionOutcome {
        match request.action_type {
            ActionType::AddNote => {
                let appended = self
                    .store
                    .append_entity_note(
                        request.entity_id,
                        request.entity_type,
                        &request.rendered_message,
                        "automation",
                    )
                    .await;
                match appended {
                    Ok(()) => ActionOutcome::success(),
                    Err(e) => ActionOutcome::failed(e.to_string()),
                }
            }

            ActionType::UpdatePhase => {
                let Some(phase) = request.action_config.get("phase").and_then(|v| v.as_str())
                else {
                    return ActionOutcome::skipped("update_phase requires a target phase");
                };
                let updated = self
                    .store
                    .update_entity_field(
                        request.entity_id,
                        request.entity_type,
                        "phase",
                        &serde_json::Value::String(phase.to_string()),
                    )
                    .await;
                match updated {
                    Ok(()) => ActionOutcome::success(),
                    Err(e) => ActionOutcome::failed(e.to_string()),
                }
            }

            ActionType::UpdateField => {
                let field = request.action_config.get("field").and_then(|v| v.as_str());
                let value = request.action_config.get("value");
                let (Some(field), Some(value)) = (field, value) else {
                    return ActionOutcome::skipped("update_field requires field and value");
                };
                match self
                    .store
                    .update_entity_field(request.entity_id, request.entity_type, field, value)
                    .await
                {
                    Ok(()) => ActionOutcome::success(),
                    Err(e) => ActionOutcome::failed(e.to_string()),
                }
            }

            // Task rows belong to the task service, not this boundary.
            ActionType::CompleteTask => {
                ActionOutcome::skipped("task completion is handled by the task service")
            }

            ActionType::SendSms
            | ActionType::SendEmail
            | ActionType::SendDocumentPacket => {
                info!(
                    "no provider configured for {:?}, entity {}",
                    request.action_type, request.entity_id
                );
                ActionOutcome::skipped("no communication provider configured")
            }

            ActionType::CreateTask => {
                // Handled by the sequence manager before the boundary.
                ActionOutcome::skipped("create_task never reaches the executor")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::actions::{ActionSource, OutcomeStatus};
    use crate::automation::testing::{caregiver, MemoryStore};
    use carepath_shared::EntityType;
    use uuid::Uuid;

    fn request(action_type: ActionType, config: serde_json::Value) -> (Arc<MemoryStore>, ActionRequest) {
        let store = Arc::new(MemoryStore::default());
        let entity = caregiver("applied");
        store.add_entity(entity.clone());
        let request = ActionRequest {
            source: ActionSource::Rule {
                rule_id: Uuid::new_v4(),
            },
            entity_id: entity.id,
            entity_type: EntityType::Caregiver,
            action_type,
            rendered_message: "Left a voicemail".to_string(),
            subject: None,
            action_config: config,
            trigger_payload: serde_json::Value::Null,
        };
        (store, request)
    }

    #[tokio::test]
    async fn add_note_writes_through_the_store() {
        let (store, req) = request(ActionType::AddNote, serde_json::Value::Null);
        let executor = StoreExecutor::new(Arc::clone(&store) as Arc<dyn AutomationStore>);

        let outcome = executor.execute(req).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);
        assert_eq!(store.notes().len(), 1);
        assert_eq!(store.notes()[0].1, "Left a voicemail");
    }

    #[tokio::test]
    async fn update_phase_requires_config() {
        let (store, req) = request(
            ActionType::UpdatePhase,
            serde_json::json!({ "phase": "contacted" }),
        );
        let executor = StoreExecutor::new(Arc::clone(&store) as Arc<dyn AutomationStore>);
        let entity_id = req.entity_id;

        let outcome = executor.execute(req).await;
        assert_eq!(outcome.status, OutcomeStatus::Success);

        let snapshot = store
            .entity_snapshot(entity_id, EntityType::Caregiver)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.phase, "contacted");

        // Missing target phase is a config problem, reported as skipped.
        let (store, req) = request(ActionType::UpdatePhase, serde_json::Value::Null);
        let executor = StoreExecutor::new(store as Arc<dyn AutomationStore>);
        let outcome = executor.execute(req).await;
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
    }

    #[tokio::test]
    async fn communication_actions_skip_without_provider() {
        let (store, req) = request(ActionType::SendSms, serde_json::Value::Null);
        let executor = StoreExecutor::new(store as Arc<dyn AutomationStore>);

        let outcome = executor.execute(req).await;
        assert_eq!(outcome.status, OutcomeStatus::Skipped);
    }
}
