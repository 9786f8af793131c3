// Automation engine - trigger intake queue
//
// The entity-mutation path hands events to `submit` and moves on; a spawned
// drain loop feeds the rule dispatcher and the sequence manager. Ordering
// is only stable within the queue itself; nothing downstream depends on
// cross-entity ordering.

use carepath_shared::TriggerType;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::dispatcher::RuleDispatcher;
use super::executor::ActionExecutor;
use super::sequences::SequenceManager;
use super::store::AutomationStore;
use super::triggers::TriggerEvent;

#[derive(Clone)]
pub struct AutomationEngine {
    sender: mpsc::UnboundedSender<TriggerEvent>,
}

impl AutomationEngine {
    /// Spawn the drain loop and return a handle the mutation path can clone
    /// freely.
    pub fn start(store: Arc<dyn AutomationStore>, executor: Arc<dyn ActionExecutor>) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel::<TriggerEvent>();

        let dispatcher = RuleDispatcher::new(Arc::clone(&store), Arc::clone(&executor));
        let sequences = SequenceManager::new(store, executor);

        tokio::spawn(async move {
            info!("automation engine started");
            while let Some(event) = receiver.recv().await {
                dispatcher
                    .fire(event.trigger_type, &event.entity, &event.context)
                    .await;

                // Phase changes additionally drive sequence auto-enrollment.
                if event.trigger_type == TriggerType::PhaseChange {
                    if let Some(to_phase) = event.context.to_phase.clone() {
                        sequences.handle_phase_change(&event.entity, &to_phase).await;
                    }
                }
            }
            info!("automation engine stopped");
        });

        Self { sender }
    }

    /// Fire-and-forget intake. Never blocks and never errors outward; the
    /// triggering business mutation has already succeeded by the time this
    /// runs.
    pub fn submit(&self, event: TriggerEvent) {
        if self.sender.send(event).is_err() {
            warn!("automation: engine queue closed, dropping trigger event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::{caregiver, rule, MemoryStore, RecordingExecutor};
    use carepath_shared::{ActionType, RuleConditions};
    use std::time::Duration;

    async fn drained(executor: &RecordingExecutor, expected: usize) -> bool {
        for _ in 0..50 {
            if executor.requests().len() >= expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn submitted_events_reach_the_dispatcher() {
        let store = Arc::new(MemoryStore::default());
        let executor = Arc::new(RecordingExecutor::default());

        store.add_rule(rule(
            TriggerType::NewRecord,
            RuleConditions::any(),
            ActionType::SendSms,
            "Welcome!",
        ));

        let engine = AutomationEngine::start(
            Arc::clone(&store) as Arc<dyn AutomationStore>,
            Arc::clone(&executor) as Arc<dyn ActionExecutor>,
        );

        engine.submit(TriggerEvent::new_record(caregiver("new_lead")));
        assert!(drained(&executor, 1).await);
    }

    #[tokio::test]
    async fn phase_change_events_also_drive_sequence_enrollment() {
        let store = Arc::new(MemoryStore::default());
        let executor = Arc::new(RecordingExecutor::default());

        let mut seq = crate::automation::testing::sequence(&[(
            0.0,
            ActionType::SendSms,
            "Welcome to the team",
        )]);
        seq.trigger_phase = Some("hired".into());
        store.add_sequence(seq);

        let engine = AutomationEngine::start(
            Arc::clone(&store) as Arc<dyn AutomationStore>,
            Arc::clone(&executor) as Arc<dyn ActionExecutor>,
        );

        let mut entity = caregiver("hired");
        entity.phase = "hired".into();
        store.add_entity(entity.clone());

        engine.submit(TriggerEvent::phase_change(entity, "paperwork", "hired"));
        assert!(drained(&executor, 1).await);
        assert_eq!(store.enrollments_all().len(), 1);
    }
}
