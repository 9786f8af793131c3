// Sequence Runner Job - picks up due delayed steps and executes them
//
// The periodic half of the drip-sequence contract: select pending log
// entries whose deadline has passed and whose enrollment is still active,
// then hand each to the enrollment manager's execute-due-step path.

use carepath_shared::LogStatus;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::automation::{AutomationEngine, AutomationStore, SequenceManager, TriggerEvent};

pub struct SequenceRunnerJob {
    store: Arc<dyn AutomationStore>,
    manager: Arc<SequenceManager>,
    batch_size: i64,
}

#[derive(Debug, Default)]
pub struct SequenceRunResult {
    pub entries_due: i32,
    pub steps_executed: i32,
    pub steps_failed: i32,
    pub steps_skipped: i32,
    pub errors: Vec<String>,
}

impl SequenceRunnerJob {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        manager: Arc<SequenceManager>,
        batch_size: i64,
    ) -> Self {
        Self {
            store,
            manager,
            batch_size,
        }
    }

    pub async fn run(&self) -> Result<SequenceRunResult, super::JobError> {
        let mut result = SequenceRunResult::default();

        let due = self
            .store
            .due_log_entries(Utc::now(), self.batch_size)
            .await?;
        result.entries_due = due.len() as i32;

        for entry in due {
            match self.manager.execute_due_step(&entry).await {
                Ok(LogStatus::Executed) => result.steps_executed += 1,
                Ok(LogStatus::Failed) => result.steps_failed += 1,
                Ok(LogStatus::Skipped) => result.steps_skipped += 1,
                Ok(_) => {}
                Err(e) => {
                    // One broken entry must not starve the rest of the batch.
                    result
                        .errors
                        .push(format!("step pickup failed for entry {}: {e}", entry.id));
                }
            }
        }

        if result.entries_due > 0 {
            info!(
                "sequence runner: {} due, {} executed, {} failed, {} skipped",
                result.entries_due,
                result.steps_executed,
                result.steps_failed,
                result.steps_skipped
            );
        }

        Ok(result)
    }
}

/// Scans for entities with no recent activity and raises `days_inactive`
/// trigger events for the rule dispatcher to evaluate.
pub struct InactivityScanJob {
    store: Arc<dyn AutomationStore>,
    engine: AutomationEngine,
    idle_days: i64,
    terminal_phases: Vec<String>,
}

#[derive(Debug, Default)]
pub struct InactivityScanResult {
    pub entities_scanned: i32,
    pub events_raised: i32,
}

impl InactivityScanJob {
    pub fn new(
        store: Arc<dyn AutomationStore>,
        engine: AutomationEngine,
        idle_days: i64,
        terminal_phases: Vec<String>,
    ) -> Self {
        Self {
            store,
            engine,
            idle_days,
            terminal_phases,
        }
    }

    pub async fn run(&self) -> Result<InactivityScanResult, super::JobError> {
        let mut result = InactivityScanResult::default();

        let cutoff = Utc::now() - Duration::days(self.idle_days);
        let idle = self.store.entities_idle_since(cutoff).await?;
        result.entities_scanned = idle.len() as i32;

        for entity in idle {
            if self.terminal_phases.contains(&entity.phase) {
                continue;
            }
            let idle_days = self.idle_days;
            self.engine
                .submit(TriggerEvent::days_inactive(entity, idle_days));
            result.events_raised += 1;
        }

        if result.events_raised > 0 {
            info!(
                "inactivity scan: raised {} event(s) from {} idle entities",
                result.events_raised, result.entities_scanned
            );
        } else if result.entities_scanned > 0 {
            warn!(
                "inactivity scan: {} idle entities, all in terminal phases",
                result.entities_scanned
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::{caregiver, sequence, MemoryStore, RecordingExecutor};
    use crate::automation::{ActionExecutor, EnrollOutcome};
    use carepath_shared::ActionType;

    #[tokio::test]
    async fn runner_executes_due_steps_in_one_pass() {
        let store = Arc::new(MemoryStore::default());
        let executor = Arc::new(RecordingExecutor::default());
        let manager = Arc::new(SequenceManager::new(
            Arc::clone(&store) as Arc<dyn AutomationStore>,
            Arc::clone(&executor) as Arc<dyn ActionExecutor>,
        ));

        // Delay small enough to be due immediately after rounding.
        let seq = sequence(&[(0.0, ActionType::SendSms, "now"), (0.0001, ActionType::SendEmail, "later")]);
        store.add_sequence(seq.clone());
        let entity = caregiver("new_lead");
        store.add_entity(entity.clone());

        let outcome = manager.enroll(&seq, &entity, "automation", 0).await;
        assert!(matches!(outcome, EnrollOutcome::Enrolled { .. }));

        tokio::time::sleep(std::time::Duration::from_millis(400)).await;

        let runner = SequenceRunnerJob::new(
            Arc::clone(&store) as Arc<dyn AutomationStore>,
            Arc::clone(&manager),
            50,
        );
        let result = runner.run().await.unwrap();

        assert_eq!(result.entries_due, 1);
        assert_eq!(result.steps_executed, 1);
        assert!(result.errors.is_empty());
        assert_eq!(executor.requests().len(), 2);

        // Second pass finds nothing; the pending row is resolved.
        let result = runner.run().await.unwrap();
        assert_eq!(result.entries_due, 0);
    }

    #[tokio::test]
    async fn inactivity_scan_skips_terminal_phases() {
        let store = Arc::new(MemoryStore::default());
        let executor = Arc::new(RecordingExecutor::default());

        let mut idle = caregiver("nurture");
        idle.created_at = Utc::now() - Duration::days(60);
        store.add_entity(idle);

        let mut hired = caregiver("hired");
        hired.created_at = Utc::now() - Duration::days(60);
        store.add_entity(hired);

        let engine = AutomationEngine::start(
            Arc::clone(&store) as Arc<dyn AutomationStore>,
            Arc::clone(&executor) as Arc<dyn ActionExecutor>,
        );

        let scan = InactivityScanJob::new(
            Arc::clone(&store) as Arc<dyn AutomationStore>,
            engine,
            30,
            vec!["hired".to_string()],
        );
        let result = scan.run().await.unwrap();

        assert_eq!(result.entities_scanned, 2);
        assert_eq!(result.events_raised, 1);
    }
}
