// Action-item scorer - urgency-ranked follow-up items per pipeline entity
//
// Pure given an injected clock; thresholds and phase names are
// configuration, never hard-coded in the rule pass.

use carepath_shared::{ActionItem, EntitySnapshot, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A per-phase stall threshold: entity has sat in `phase` for more than
/// `days` days while `task_id` (when set) remains incomplete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StallRule {
    pub phase: String,
    pub task_id: Option<String>,
    pub days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScorerConfig {
    /// Phase a brand-new record lands in.
    pub entry_phase: String,
    /// Task that records the first outreach attempt.
    pub first_attempt_task: String,
    /// Minutes allowed before the first attempt becomes critical.
    pub first_contact_minutes: i64,
    pub stall_rules: Vec<StallRule>,
    /// Global staleness threshold, days in current phase.
    pub stale_days: i64,
    /// Phases where no further follow-up is expected.
    pub terminal_phases: Vec<String>,
    /// Long-tail holding phases checked for dormancy.
    pub nurture_phases: Vec<String>,
    /// Days without a note before a nurture entity counts as dormant.
    pub nurture_idle_days: i64,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            entry_phase: "new_lead".to_string(),
            first_attempt_task: "first_contact_attempt".to_string(),
            first_contact_minutes: 30,
            stall_rules: vec![
                StallRule {
                    phase: "contacted".to_string(),
                    task_id: Some("schedule_interview".to_string()),
                    days: 3,
                },
                StallRule {
                    phase: "interview".to_string(),
                    task_id: Some("complete_interview".to_string()),
                    days: 5,
                },
                StallRule {
                    phase: "paperwork".to_string(),
                    task_id: Some("documents_returned".to_string()),
                    days: 7,
                },
            ],
            stale_days: 14,
            terminal_phases: vec!["hired".to_string(), "closed_lost".to_string()],
            nurture_phases: vec!["nurture".to_string()],
            nurture_idle_days: 30,
        }
    }
}

/// Sort items critical -> warning -> info, stable within a severity.
pub fn rank(items: &mut [ActionItem]) {
    items.sort_by_key(|item| item.severity);
}

/// Score every entity and return the ranked follow-up list.
///
/// Rule order within one entity is load-bearing: speed-to-contact, then
/// stalled-in-phase, then generic staleness (suppressed when an earlier
/// rule already produced an item for this entity), then dormant.
pub fn score(entities: &[EntitySnapshot], cfg: &ScorerConfig, now: DateTime<Utc>) -> Vec<ActionItem> {
    let mut items = Vec::new();

    for entity in entities {
        let before = items.len();

        if entity.phase == cfg.entry_phase && !entity.task_done(&cfg.first_attempt_task) {
            let minutes = (now - entity.created_at).num_minutes();
            if minutes > cfg.first_contact_minutes {
                items.push(item(
                    entity,
                    "speed_to_contact",
                    Severity::Critical,
                    format!(
                        "{} has waited {} minutes with no first contact attempt",
                        entity.full_name(),
                        minutes
                    ),
                ));
            }
        }

        for rule in cfg.stall_rules.iter().filter(|r| r.phase == entity.phase) {
            let task_open = rule
                .task_id
                .as_ref()
                .map(|t| !entity.task_done(t))
                .unwrap_or(true);
            let days = (now - entity.phase_entered_at()).num_days();
            if task_open && days > rule.days {
                items.push(item(
                    entity,
                    "stalled_in_phase",
                    Severity::Warning,
                    format!(
                        "{} stalled in {} for {} days",
                        entity.full_name(),
                        entity.phase,
                        days
                    ),
                ));
                break;
            }
        }

        // A more specific item suppresses the generic one for this entity.
        if items.len() == before && !cfg.terminal_phases.contains(&entity.phase) {
            let days = (now - entity.phase_entered_at()).num_days();
            if days > cfg.stale_days {
                items.push(item(
                    entity,
                    "stale_in_pipeline",
                    Severity::Warning,
                    format!(
                        "{} has been in {} for {} days with no progress",
                        entity.full_name(),
                        entity.phase,
                        days
                    ),
                ));
            }
        }

        if cfg.nurture_phases.contains(&entity.phase) {
            let last_activity = entity.last_note_at().unwrap_or(entity.created_at);
            let idle_days = (now - last_activity).num_days();
            if idle_days > cfg.nurture_idle_days {
                items.push(item(
                    entity,
                    "dormant_nurture",
                    Severity::Info,
                    format!(
                        "{} has had no activity for {} days, due a nurture check-in",
                        entity.full_name(),
                        idle_days
                    ),
                ));
            }
        }
    }

    rank(&mut items);
    items
}

fn item(entity: &EntitySnapshot, kind: &str, severity: Severity, message: String) -> ActionItem {
    ActionItem {
        entity_id: entity.id,
        entity_name: entity.full_name(),
        entity_type: entity.entity_type,
        kind: kind.to_string(),
        message,
        severity,
        phase: entity.phase.clone(),
    }
}
