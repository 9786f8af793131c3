// Condition evaluator - decides whether a rule's filters match an entity
// snapshot plus event context

use carepath_shared::{EntitySnapshot, RuleConditions};

use super::triggers::TriggerContext;

/// Evaluate a rule's declared conditions against an entity snapshot and the
/// event-specific context.
///
/// Total function: every set filter must agree for a match, an unset filter
/// never excludes, and an empty condition set matches everything (wildcard
/// rules are intentional). Filters that need context the trigger did not
/// carry fail closed rather than firing falsely.
pub fn matches(conditions: &RuleConditions, entity: &EntitySnapshot, ctx: &TriggerContext) -> bool {
    if let Some(phase) = &conditions.phase {
        if entity.phase != *phase {
            return false;
        }
    }

    if let Some(to_phase) = &conditions.to_phase {
        match &ctx.to_phase {
            Some(event_phase) if event_phase == to_phase => {}
            _ => return false,
        }
    }

    if let Some(task_id) = &conditions.task_id {
        match &ctx.task_id {
            Some(event_task) if event_task == task_id => {}
            _ => return false,
        }
    }

    if let Some(keyword) = &conditions.keyword {
        match &ctx.message_text {
            Some(text) if text.to_lowercase().contains(&keyword.to_lowercase()) => {}
            _ => return false,
        }
    }

    if let Some(min_days) = conditions.min_days {
        let elapsed = (ctx.now - entity.phase_entered_at()).num_days();
        if elapsed < min_days {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::testing::caregiver;
    use chrono::{Duration, Utc};

    fn ctx() -> TriggerContext {
        TriggerContext::empty()
    }

    #[test]
    fn wildcard_conditions_match_everything() {
        let entity = caregiver("applied");
        assert!(matches(&RuleConditions::any(), &entity, &ctx()));
    }

    #[test]
    fn phase_filter() {
        let entity = caregiver("applied");

        let hit = RuleConditions {
            phase: Some("applied".into()),
            ..Default::default()
        };
        let miss = RuleConditions {
            phase: Some("interview".into()),
            ..Default::default()
        };

        assert!(matches(&hit, &entity, &ctx()));
        assert!(!matches(&miss, &entity, &ctx()));
    }

    #[test]
    fn to_phase_filter_requires_phase_change_context() {
        let entity = caregiver("interview");
        let conditions = RuleConditions {
            to_phase: Some("interview".into()),
            ..Default::default()
        };

        let mut with_context = ctx();
        with_context.to_phase = Some("interview".into());
        assert!(matches(&conditions, &entity, &with_context));

        let mut wrong_target = ctx();
        wrong_target.to_phase = Some("hired".into());
        assert!(!matches(&conditions, &entity, &wrong_target));

        // No phase-change context at all: fail closed.
        assert!(!matches(&conditions, &entity, &ctx()));
    }

    #[test]
    fn task_filter_requires_task_context() {
        let entity = caregiver("applied");
        let conditions = RuleConditions {
            task_id: Some("first_attempt".into()),
            ..Default::default()
        };

        let mut with_context = ctx();
        with_context.task_id = Some("first_attempt".into());
        assert!(matches(&conditions, &entity, &with_context));

        let mut other_task = ctx();
        other_task.task_id = Some("background_check".into());
        assert!(!matches(&conditions, &entity, &other_task));

        assert!(!matches(&conditions, &entity, &ctx()));
    }

    #[test]
    fn keyword_filter_is_case_insensitive_substring() {
        let entity = caregiver("applied");
        let conditions = RuleConditions {
            keyword: Some("stop".into()),
            ..Default::default()
        };

        let mut hit = ctx();
        hit.message_text = Some("Please STOP texting me".into());
        assert!(matches(&conditions, &entity, &hit));

        let mut miss = ctx();
        miss.message_text = Some("sounds good".into());
        assert!(!matches(&conditions, &entity, &miss));

        assert!(!matches(&conditions, &entity, &ctx()));
    }

    #[test]
    fn min_days_filter_counts_whole_days_in_phase() {
        let mut entity = caregiver("applied");
        let now = Utc::now();
        entity
            .phase_timestamps
            .insert("applied".into(), now - Duration::days(3));

        let conditions = RuleConditions {
            min_days: Some(3),
            ..Default::default()
        };
        let context = TriggerContext::at(now);

        assert!(matches(&conditions, &entity, &context));

        let stricter = RuleConditions {
            min_days: Some(4),
            ..Default::default()
        };
        assert!(!matches(&stricter, &entity, &context));
    }

    #[test]
    fn all_set_filters_are_anded() {
        let mut entity = caregiver("applied");
        let now = Utc::now();
        entity
            .phase_timestamps
            .insert("applied".into(), now - Duration::days(5));

        let conditions = RuleConditions {
            phase: Some("applied".into()),
            task_id: Some("first_attempt".into()),
            min_days: Some(2),
            ..Default::default()
        };

        let mut context = TriggerContext::at(now);
        context.task_id = Some("first_attempt".into());
        assert!(matches(&conditions, &entity, &context));

        // One disagreeing filter fails the whole set.
        entity.phase = "interview".into();
        assert!(!matches(&conditions, &entity, &context));
    }
}
