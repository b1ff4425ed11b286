use thiserror::Error;

const UNIQUE_VIOLATION: &str = "23505";
const FOREIGN_KEY_VIOLATION: &str = "23503";

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("email already in use")]
    DuplicateEmail,

    #[error("agent still has evaluations and cannot be deleted")]
    AgentInUse,

    #[error("store error: {0}")]
    Store(#[source] sqlx::Error),

    #[error("audio upload failed: {0}")]
    Upload(String),
}

impl DashboardError {
    pub fn validation(message: impl Into<String>) -> Self {
        DashboardError::Validation(message.into())
    }
}

impl From<sqlx::Error> for DashboardError {
    fn from(error: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &error {
            if let Some(mapped) = from_constraint(db.code().as_deref(), db.constraint()) {
                return mapped;
            }
        }
        DashboardError::Store(error)
    }
}

/// Constraint violations with a domain meaning. A dangling foreign key means
/// the agent or telepro named on the row is gone.
fn from_constraint(code: Option<&str>, constraint: Option<&str>) -> Option<DashboardError> {
    match code {
        Some(UNIQUE_VIOLATION) if constraint == Some("agents_email_key") => {
            Some(DashboardError::DuplicateEmail)
        }
        Some(FOREIGN_KEY_VIOLATION) => Some(DashboardError::NotFound(format!(
            "agent or telepro ({})",
            constraint.unwrap_or("foreign key")
        ))),
        _ => None,
    }
}

pub fn is_foreign_key_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.code().as_deref() == Some(FOREIGN_KEY_VIOLATION))
}

pub type DashboardResult<T> = Result<T, DashboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangling_reference_is_not_found() {
        let error = from_constraint(
            Some(FOREIGN_KEY_VIOLATION),
            Some("evaluations_new_appointment_agent_id_fkey"),
        );
        assert!(matches!(error, Some(DashboardError::NotFound(ref what)) if what.contains("agent_id_fkey")));
        assert!(matches!(
            from_constraint(Some(FOREIGN_KEY_VIOLATION), None),
            Some(DashboardError::NotFound(_))
        ));
    }

    #[test]
    fn only_the_email_key_is_a_duplicate_email() {
        assert!(matches!(
            from_constraint(Some(UNIQUE_VIOLATION), Some("agents_email_key")),
            Some(DashboardError::DuplicateEmail)
        ));
        assert!(from_constraint(Some(UNIQUE_VIOLATION), Some("agents_pkey")).is_none());
        assert!(from_constraint(Some("40001"), None).is_none());
        assert!(from_constraint(None, None).is_none());
    }
}
