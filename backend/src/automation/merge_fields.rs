// Merge-field resolver - substitutes {{field}} placeholders with entity data

use carepath_shared::EntitySnapshot;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;

static TOKEN_RE: OnceLock<Regex> = OnceLock::new();

fn token_re() -> &'static Regex {
    TOKEN_RE.get_or_init(|| Regex::new(r"\{\{\s*([a-z_]+)\s*\}\}").unwrap())
}

/// Render a message template against an entity snapshot.
///
/// The placeholder vocabulary is fixed: `first_name`, `last_name`,
/// `full_name`, `phone`, `email`, `phase`, `days_in_phase`,
/// `days_since_created`. Unknown placeholders are left verbatim so template
/// authors notice typos. Always returns a fresh string.
pub fn resolve(template: &str, entity: &EntitySnapshot, now: DateTime<Utc>) -> String {
    token_re()
        .replace_all(template, |caps: &regex::Captures| match &caps[1] {
            "first_name" => entity.first_name.clone(),
            "last_name" => entity.last_name.clone(),
            "full_name" => entity.full_name(),
            "phone" => entity.phone.clone().unwrap_or_default(),
            "email" => entity.email.clone().unwrap_or_default(),
            "phase" => entity.phase.clone(),
            "days_in_phase" => (now - entity.phase_entered_at()).num_days().to_string(),
            "days_since_created" => (now - entity.created_at).num_days().to_string(),
            _ => caps[0].to_string(),
        })
        .into_owned()
}
