// Rule dispatcher - fans a trigger event out to matching automation rules
//
// Contract: never throws outward, never blocks the mutation path. Rules
// that fail their conditions are silently skipped (they never attempted);
// every attempted rule lands in the execution log with its outcome.

use carepath_shared::{ActionType, EntitySnapshot, TriggerType};
use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use super::actions::{ActionOutcome, ActionRequest};
use super::conditions;
use super::executor::ActionExecutor;
use super::log::{self, log_or_warn};
use super::merge_fields;
use super::store::AutomationStore;
use super::triggers::TriggerContext;

pub struct RuleDispatcher {
    store: Arc<dyn AutomationStore>,
    executor: Arc<dyn ActionExecutor>,
}

impl RuleDispatcher {
    pub fn new(store: Arc<dyn AutomationStore>, executor: Arc<dyn ActionExecutor>) -> Self {
        Self { store, executor }
    }

    /// Evaluate and dispatch every enabled rule for (trigger, entity type).
    ///
    /// Rules are fetched fresh per trigger. Each surviving rule gets its own
    /// spawned invocation; one rule's provider failure cannot affect
    /// another's. A storage failure abandons the whole dispatch with a
    /// warning and nothing else.
    pub async fn fire(&self, trigger: TriggerType, entity: &EntitySnapshot, ctx: &TriggerContext) {
        let rules = match self.store.enabled_rules(trigger, entity.entity_type).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!("automation: rule fetch failed for {:?}: {e}", trigger);
                return;
            }
        };

        let mut invocations = Vec::new();

        for rule in rules {
            if !conditions::matches(&rule.conditions, entity, ctx) {
                continue;
            }

            let rendered = merge_fields::resolve(&rule.message_template, entity, ctx.now);
            let request =
                ActionRequest::from_rule(&rule, entity, rendered.clone(), ctx.payload.clone());

            let store = Arc::clone(&self.store);
            let executor = Arc::clone(&self.executor);
            let entity = entity.clone();

            invocations.push(tokio::spawn(async move {
                let outcome = if rule.action_type == ActionType::CreateTask {
                    // Sequence-only action; a rule configured with it is a
                    // config mistake, not a provider failure.
                    ActionOutcome::skipped("create_task is only valid in sequence steps")
                } else {
                    executor.execute(request).await
                };

                let entry = log::rule_entry(
                    &rule,
                    &entity,
                    outcome.log_status(),
                    &rendered,
                    outcome.detail,
                    Utc::now(),
                );
                log_or_warn(store.insert_log_entry(&entry).await, "record rule outcome");
            }));
        }

        if !invocations.is_empty() {
            info!(
                "automation: dispatched {} rule(s) for {:?} on entity {}",
                invocations.len(),
                trigger,
                entity.id
            );
        }

        // Invocations are independent; we only wait so the engine's drain
        // loop can observe backpressure. Panics in one never propagate.
        for joined in join_all(invocations).await {
            log_or_warn(joined, "rule invocation task");
        }
    }
}
