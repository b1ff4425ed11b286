use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rubric::RubricVariant;
use crate::scoring::ScoreBand;

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: Uuid,
    pub last_name: String,
    pub first_name: String,
    pub email: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Secondary reviewer attached to an evaluation.
#[derive(Debug, Clone)]
pub struct Telepro {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriterionNote {
    pub criterion_id: String,
    pub note: i32,
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub id: Uuid,
    pub variant: RubricVariant,
    pub agent_id: Option<Uuid>,
    pub telepro_id: Option<Uuid>,
    pub evaluation_date: NaiveDate,
    pub booked_on: Option<NaiveDate>,
    pub appointment_date: Option<NaiveDate>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub call_duration_secs: Option<i32>,
    pub audio_url: Option<String>,
    pub summary: Option<String>,
    pub notes: Vec<CriterionNote>,
    pub final_score: i32,
    pub debrief_comment: Option<String>,
    pub debrief_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Evaluation {
    pub fn band(&self) -> ScoreBand {
        crate::scoring::classify_score(self.final_score)
    }

    pub fn note_for(&self, criterion_id: &str) -> i32 {
        self.notes
            .iter()
            .find(|n| n.criterion_id == criterion_id)
            .map(|n| n.note)
            .unwrap_or(0)
    }

    /// A debriefing counts once its comment holds more than whitespace.
    pub fn is_debriefed(&self) -> bool {
        self.debrief_comment
            .as_deref()
            .is_some_and(|c| !c.trim().is_empty())
    }
}

/// Validated input for a new evaluation. The final score is not part of it:
/// the store derives it from the notes.
#[derive(Debug, Clone)]
pub struct NewEvaluation {
    pub variant: RubricVariant,
    pub agent_id: Option<Uuid>,
    pub telepro_id: Option<Uuid>,
    pub evaluation_date: NaiveDate,
    pub booked_on: Option<NaiveDate>,
    pub appointment_date: Option<NaiveDate>,
    pub client_name: Option<String>,
    pub client_phone: Option<String>,
    pub call_duration_secs: Option<i32>,
    pub audio_url: Option<String>,
    pub summary: Option<String>,
    pub raw_notes: std::collections::HashMap<String, String>,
    pub comments: std::collections::HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandCounts {
    pub total: usize,
    pub excellent: usize,
    pub conforme: usize,
    pub a_ameliorer: usize,
    pub non_conforme: usize,
    pub net: usize,
}

#[derive(Debug, Clone)]
pub struct AgentRanking {
    pub agent_id: Uuid,
    pub agent_name: String,
    pub mean_score: f64,
    pub evaluation_count: usize,
}

#[derive(Debug, Clone)]
pub struct CriterionStat {
    pub criterion_id: String,
    pub label: String,
    pub max_points: i32,
    pub mean: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Default)]
pub struct CriterionBreakdown {
    pub strengths: Vec<CriterionStat>,
    pub weaknesses: Vec<CriterionStat>,
}
