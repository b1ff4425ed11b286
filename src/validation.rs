use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DashboardError, DashboardResult};
use crate::rubric::Rubric;

static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("valid email regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentForm {
    pub last_name: String,
    pub first_name: String,
    pub email: Option<String>,
}

/// Trims names, lower-cases the email and drops it when blank.
pub fn agent_form(last_name: &str, first_name: &str, email: Option<&str>) -> DashboardResult<AgentForm> {
    let last_name = last_name.trim();
    let first_name = first_name.trim();
    if last_name.is_empty() || first_name.is_empty() {
        return Err(DashboardError::validation("last name and first name are required"));
    }

    let email = match email.map(str::trim).filter(|e| !e.is_empty()) {
        Some(value) if !EMAIL_REGEX.is_match(value) => {
            return Err(DashboardError::validation(format!(
                "'{value}' is not a valid email address"
            )));
        }
        Some(value) => Some(value.to_lowercase()),
        None => None,
    };

    Ok(AgentForm {
        last_name: last_name.to_string(),
        first_name: first_name.to_string(),
        email,
    })
}

pub fn telepro_name(name: &str) -> DashboardResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DashboardError::validation("name is required"));
    }
    Ok(name.to_string())
}

/// Entry-time check on raw notes. The scoring engine clamps whatever it is
/// given; the form refuses values it would have to clamp.
pub fn notes(rubric: &Rubric, raw: &HashMap<String, String>) -> DashboardResult<()> {
    for (id, value) in raw {
        let criterion = rubric.criterion(id).ok_or_else(|| {
            DashboardError::validation(format!(
                "'{id}' is not a criterion of the {} rubric",
                rubric.variant
            ))
        })?;
        let note: i32 = value.trim().parse().map_err(|_| {
            DashboardError::validation(format!("note for '{id}' must be a whole number, got '{value}'"))
        })?;
        if !(0..=criterion.max_points).contains(&note) {
            return Err(DashboardError::validation(format!(
                "note for '{id}' must be between 0 and {}, got {note}",
                criterion.max_points
            )));
        }
    }
    Ok(())
}

pub fn comments(rubric: &Rubric, comments: &HashMap<String, String>) -> DashboardResult<()> {
    if let Some(id) = comments.keys().find(|id| rubric.criterion(id).is_none()) {
        return Err(DashboardError::validation(format!(
            "'{id}' is not a criterion of the {} rubric",
            rubric.variant
        )));
    }
    Ok(())
}

/// Total call length in seconds, `None` when nothing was entered.
pub fn call_duration(minutes: Option<u32>, seconds: Option<u32>) -> DashboardResult<Option<i32>> {
    let seconds = seconds.unwrap_or(0);
    if seconds >= 60 {
        return Err(DashboardError::validation("seconds must be below 60"));
    }
    let total = i64::from(minutes.unwrap_or(0)) * 60 + i64::from(seconds);
    let total = i32::try_from(total)
        .map_err(|_| DashboardError::validation("call duration is too long"))?;
    Ok((total > 0).then_some(total))
}

pub fn debrief_comment(comment: &str) -> DashboardResult<String> {
    let comment = comment.trim();
    if comment.is_empty() {
        return Err(DashboardError::validation("debriefing comment is required"));
    }
    Ok(comment.to_string())
}

/// Parses repeated `criterion=value` arguments.
pub fn key_values(pairs: &[String]) -> DashboardResult<HashMap<String, String>> {
    let mut map = HashMap::new();
    for pair in pairs {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            DashboardError::validation(format!("expected criterion=value, got '{pair}'"))
        })?;
        let key = key.trim();
        if key.is_empty() {
            return Err(DashboardError::validation(format!("missing criterion in '{pair}'")));
        }
        if map.insert(key.to_string(), value.to_string()).is_some() {
            return Err(DashboardError::validation(format!("'{key}' given twice")));
        }
    }
    Ok(map)
}
