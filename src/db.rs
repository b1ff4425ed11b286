use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool, Row};
use uuid::Uuid;

use crate::error::{is_foreign_key_violation, DashboardError, DashboardResult};
use crate::models::{Agent, CriterionNote, Evaluation, NewEvaluation, Telepro};
use crate::rubric::{RubricRegistry, RubricVariant};
use crate::scoring;
use crate::validation::AgentForm;

const SCHEMA: &str = "call_quality";

const EVALUATION_COLUMNS: &str = "id, agent_id, telepro_id, evaluation_date, booked_on, \
     appointment_date, client_name, client_phone, call_duration_secs, audio_url, summary, \
     criteria, final_score, debrief_comment, debrief_date, created_at";

fn table(variant: RubricVariant) -> String {
    format!("{SCHEMA}.{}", variant.table_name())
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn agent_from_row(row: &PgRow) -> Agent {
    Agent {
        id: row.get("id"),
        last_name: row.get("last_name"),
        first_name: row.get("first_name"),
        email: row.get("email"),
        created_at: row.get("created_at"),
    }
}

pub async fn insert_agent(pool: &PgPool, form: &AgentForm) -> DashboardResult<Agent> {
    let row = sqlx::query(
        r#"
        INSERT INTO call_quality.agents (id, last_name, first_name, email)
        VALUES ($1, $2, $3, $4)
        RETURNING id, last_name, first_name, email, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&form.last_name)
    .bind(&form.first_name)
    .bind(&form.email)
    .fetch_one(pool)
    .await?;

    Ok(agent_from_row(&row))
}

/// Agents by last name, then first name. Rankings inherit this order for ties.
pub async fn list_agents(pool: &PgPool) -> DashboardResult<Vec<Agent>> {
    let rows = sqlx::query(
        "SELECT id, last_name, first_name, email, created_at \
         FROM call_quality.agents ORDER BY last_name, first_name, created_at",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(agent_from_row).collect())
}

pub async fn find_agent_by_email<'e, E>(executor: E, email: &str) -> DashboardResult<Option<Agent>>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query(
        "SELECT id, last_name, first_name, email, created_at \
         FROM call_quality.agents WHERE email = $1",
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(executor)
    .await?;

    Ok(row.as_ref().map(agent_from_row))
}

/// Refuses to delete an agent that evaluations still point at.
pub async fn delete_agent(pool: &PgPool, id: Uuid) -> DashboardResult<()> {
    let result = sqlx::query("DELETE FROM call_quality.agents WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .map_err(|e| {
            if is_foreign_key_violation(&e) {
                DashboardError::AgentInUse
            } else {
                DashboardError::from(e)
            }
        })?;

    if result.rows_affected() == 0 {
        return Err(DashboardError::NotFound(format!("agent {id}")));
    }
    Ok(())
}

fn telepro_from_row(row: &PgRow) -> Telepro {
    Telepro {
        id: row.get("id"),
        name: row.get("name"),
        created_at: row.get("created_at"),
    }
}

pub async fn insert_telepro(pool: &PgPool, name: &str) -> DashboardResult<Telepro> {
    let row = sqlx::query(
        "INSERT INTO call_quality.telepros (id, name) VALUES ($1, $2) \
         RETURNING id, name, created_at",
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await?;

    Ok(telepro_from_row(&row))
}

pub async fn list_telepros(pool: &PgPool) -> DashboardResult<Vec<Telepro>> {
    let rows = sqlx::query("SELECT id, name, created_at FROM call_quality.telepros ORDER BY name")
        .fetch_all(pool)
        .await?;

    Ok(rows.iter().map(telepro_from_row).collect())
}

/// Evaluations that named this telepro keep their row with the reference cleared.
pub async fn delete_telepro(pool: &PgPool, id: Uuid) -> DashboardResult<()> {
    let result = sqlx::query("DELETE FROM call_quality.telepros WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DashboardError::NotFound(format!("telepro {id}")));
    }
    Ok(())
}

fn evaluation_from_row(
    row: &PgRow,
    variant: RubricVariant,
    rubrics: &RubricRegistry,
) -> DashboardResult<Evaluation> {
    let Json(notes): Json<Vec<CriterionNote>> = row.try_get("criteria")?;
    let evaluation = Evaluation {
        id: row.try_get("id")?,
        variant,
        agent_id: row.try_get("agent_id")?,
        telepro_id: row.try_get("telepro_id")?,
        evaluation_date: row.try_get("evaluation_date")?,
        booked_on: row.try_get("booked_on")?,
        appointment_date: row.try_get("appointment_date")?,
        client_name: row.try_get("client_name")?,
        client_phone: row.try_get("client_phone")?,
        call_duration_secs: row.try_get("call_duration_secs")?,
        audio_url: row.try_get("audio_url")?,
        summary: row.try_get("summary")?,
        notes,
        final_score: row.try_get("final_score")?,
        debrief_comment: row.try_get("debrief_comment")?,
        debrief_date: row.try_get("debrief_date")?,
        created_at: row.try_get("created_at")?,
    };

    let expected = scoring::rescore(rubrics.get(variant), &evaluation.notes);
    if expected != evaluation.final_score {
        tracing::warn!(
            evaluation_id = %evaluation.id,
            stored = evaluation.final_score,
            expected,
            "Stored final score disagrees with the current rubric"
        );
    }

    Ok(evaluation)
}

/// Scores the notes against the variant's rubric and stores the evaluation.
/// The stored total is always the sum of the clamped notes.
pub async fn insert_evaluation<'e, E>(
    executor: E,
    rubrics: &RubricRegistry,
    input: &NewEvaluation,
) -> DashboardResult<Evaluation>
where
    E: PgExecutor<'e>,
{
    let rubric = rubrics.get(input.variant);
    let (notes, final_score) = scoring::score_sheet(rubric, &input.raw_notes, &input.comments);

    let query = format!(
        "INSERT INTO {} \
         (id, agent_id, telepro_id, evaluation_date, booked_on, appointment_date, client_name, \
          client_phone, call_duration_secs, audio_url, summary, criteria, final_score) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         RETURNING {EVALUATION_COLUMNS}",
        table(input.variant)
    );

    let row = sqlx::query(&query)
        .bind(Uuid::new_v4())
        .bind(input.agent_id)
        .bind(input.telepro_id)
        .bind(input.evaluation_date)
        .bind(input.booked_on)
        .bind(input.appointment_date)
        .bind(&input.client_name)
        .bind(&input.client_phone)
        .bind(input.call_duration_secs)
        .bind(&input.audio_url)
        .bind(&input.summary)
        .bind(Json(&notes))
        .bind(final_score)
        .fetch_one(executor)
        .await?;

    evaluation_from_row(&row, input.variant, rubrics)
}

/// Fails with `NotFound` when the agent or telepro an evaluation names is gone.
pub async fn ensure_references(
    pool: &PgPool,
    agent_id: Option<Uuid>,
    telepro_id: Option<Uuid>,
) -> DashboardResult<()> {
    if let Some(id) = agent_id {
        let found: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM call_quality.agents WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        if found.is_none() {
            return Err(DashboardError::NotFound(format!("agent {id}")));
        }
    }
    if let Some(id) = telepro_id {
        let found: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM call_quality.telepros WHERE id = $1")
                .bind(id)
                .fetch_optional(pool)
                .await?;
        if found.is_none() {
            return Err(DashboardError::NotFound(format!("telepro {id}")));
        }
    }
    Ok(())
}

/// Restricts which evaluations a fetch returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvaluationScope {
    pub agent_id: Option<Uuid>,
    pub variant: Option<RubricVariant>,
    pub debriefed_only: bool,
}

/// Both evaluation tables merged, newest first.
pub async fn fetch_evaluations(
    pool: &PgPool,
    rubrics: &RubricRegistry,
    scope: EvaluationScope,
) -> DashboardResult<Vec<Evaluation>> {
    let mut evaluations = Vec::new();

    for variant in RubricVariant::ALL {
        if scope.variant.is_some_and(|v| v != variant) {
            continue;
        }

        let mut query = format!("SELECT {EVALUATION_COLUMNS} FROM {} WHERE TRUE", table(variant));
        if scope.agent_id.is_some() {
            query.push_str(" AND agent_id = $1");
        }
        if scope.debriefed_only {
            query.push_str(" AND debrief_comment IS NOT NULL");
        }
        query.push_str(" ORDER BY created_at DESC");

        let mut rows = sqlx::query(&query);
        if let Some(agent_id) = scope.agent_id {
            rows = rows.bind(agent_id);
        }

        for row in rows.fetch_all(pool).await? {
            evaluations.push(evaluation_from_row(&row, variant, rubrics)?);
        }
    }

    evaluations.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    tracing::debug!(count = evaluations.len(), ?scope, "Evaluations fetched");
    Ok(evaluations)
}

/// Looks the id up in both tables.
pub async fn find_evaluation(
    pool: &PgPool,
    rubrics: &RubricRegistry,
    id: Uuid,
) -> DashboardResult<Evaluation> {
    for variant in RubricVariant::ALL {
        let query = format!("SELECT {EVALUATION_COLUMNS} FROM {} WHERE id = $1", table(variant));
        if let Some(row) = sqlx::query(&query).bind(id).fetch_optional(pool).await? {
            return evaluation_from_row(&row, variant, rubrics);
        }
    }
    Err(DashboardError::NotFound(format!("evaluation {id}")))
}

pub async fn update_debriefing(
    pool: &PgPool,
    variant: RubricVariant,
    id: Uuid,
    comment: &str,
    date: NaiveDate,
) -> DashboardResult<()> {
    let query = format!(
        "UPDATE {} SET debrief_comment = $1, debrief_date = $2 WHERE id = $3",
        table(variant)
    );
    let result = sqlx::query(&query)
        .bind(comment)
        .bind(date)
        .bind(id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DashboardError::NotFound(format!("evaluation {id}")));
    }
    Ok(())
}

pub async fn delete_evaluation(
    pool: &PgPool,
    variant: RubricVariant,
    id: Uuid,
) -> DashboardResult<()> {
    let query = format!("DELETE FROM {} WHERE id = $1", table(variant));
    let result = sqlx::query(&query).bind(id).execute(pool).await?;

    if result.rows_affected() == 0 {
        return Err(DashboardError::NotFound(format!("evaluation {id}")));
    }
    Ok(())
}

/// Sample agents: id, last name, first name, email.
const SEED_AGENTS: [(&str, &str, &str, &str); 3] = [
    ("a1c4e2f0-7b3d-4c59-8e21-5f6a9d0b3c47", "Durand", "Camille", "camille.durand@example.com"),
    ("b7e2d913-4a6c-4f08-b5d2-82c1e7f4a960", "Lefèvre", "Yanis", "yanis.lefevre@example.com"),
    ("c93f5a78-1e2b-4d6f-a0c4-6b8d2e9f1a35", "Benali", "Sarah", "sarah.benali@example.com"),
];

pub async fn seed(pool: &PgPool, rubrics: &RubricRegistry) -> anyhow::Result<()> {
    // An agent that already exists under the same email keeps its own id.
    let mut agent_ids = Vec::with_capacity(SEED_AGENTS.len());
    for (id, last_name, first_name, email) in SEED_AGENTS {
        let stored: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO call_quality.agents (id, last_name, first_name, email)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (email) DO UPDATE
            SET last_name = EXCLUDED.last_name, first_name = EXCLUDED.first_name
            RETURNING id
            "#,
        )
        .bind(Uuid::parse_str(id)?)
        .bind(last_name)
        .bind(first_name)
        .bind(email)
        .fetch_one(pool)
        .await?;
        agent_ids.push(stored);
    }

    let telepro_id = Uuid::parse_str("6b1f3c52-91a4-4c55-9b0e-2f1d7a3e8c11")?;
    sqlx::query(
        "INSERT INTO call_quality.telepros (id, name) VALUES ($1, $2) ON CONFLICT (id) DO NOTHING",
    )
    .bind(telepro_id)
    .bind("Morgane")
    .execute(pool)
    .await?;

    let evaluations = vec![
        (
            "6f7a0c1e-4b8d-4e5f-9a21-0d3c5b7e9f10",
            RubricVariant::NewAppointment,
            0usize,
            NaiveDate::from_ymd_opt(2026, 10, 5).context("invalid date")?,
            "Martin",
            7,
        ),
        (
            "1a2b3c4d-5e6f-4a8b-9c0d-1e2f3a4b5c6d",
            RubricVariant::NewAppointment,
            1,
            NaiveDate::from_ymd_opt(2026, 10, 6).context("invalid date")?,
            "Bernard",
            5,
        ),
        (
            "9e8d7c6b-5a49-4382-a716-f5e4d3c2b1a0",
            RubricVariant::AbsentAppointment,
            2,
            NaiveDate::from_ymd_opt(2026, 10, 8).context("invalid date")?,
            "Petit",
            4,
        ),
    ];

    for (id, variant, agent_index, evaluation_date, client_name, level) in evaluations {
        let rubric = rubrics.get(variant);
        let raw: HashMap<String, String> = rubric
            .criteria
            .iter()
            .map(|c| (c.id.clone(), (c.max_points * level / 7).to_string()))
            .collect();
        let (notes, final_score) = scoring::score_sheet(rubric, &raw, &HashMap::new());

        let query = format!(
            "INSERT INTO {} (id, agent_id, telepro_id, evaluation_date, client_name, criteria, final_score) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) ON CONFLICT (id) DO NOTHING",
            table(variant)
        );
        sqlx::query(&query)
            .bind(Uuid::parse_str(id)?)
            .bind(agent_ids[agent_index])
            .bind(telepro_id)
            .bind(evaluation_date)
            .bind(client_name)
            .bind(Json(&notes))
            .bind(final_score)
            .execute(pool)
            .await?;
    }

    Ok(())
}

#[derive(serde::Deserialize)]
struct CsvRow {
    variant: String,
    agent_email: Option<String>,
    evaluation_date: NaiveDate,
    client_name: Option<String>,
    client_phone: Option<String>,
    call_duration_secs: Option<i32>,
    summary: Option<String>,
    /// `criterion=note` pairs separated by `;`.
    notes: String,
}

fn parse_note_list(notes: &str) -> HashMap<String, String> {
    notes
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// A parsed CSV row waiting for its agent lookup.
struct ImportRow {
    line: usize,
    agent_email: Option<String>,
    input: NewEvaluation,
}

/// Parses every row before anything is written, so a malformed row or an
/// unknown variant fails the import up front.
fn read_csv_rows<R: std::io::Read>(mut reader: csv::Reader<R>) -> anyhow::Result<Vec<ImportRow>> {
    let mut rows = Vec::new();

    for (index, result) in reader.deserialize::<CsvRow>().enumerate() {
        let line = index + 1;
        let row = result.with_context(|| format!("row {line} is malformed"))?;
        let variant = RubricVariant::parse(&row.variant)
            .with_context(|| format!("row {line}: unknown variant '{}'", row.variant))?;

        rows.push(ImportRow {
            line,
            agent_email: blank_to_none(row.agent_email),
            input: NewEvaluation {
                variant,
                agent_id: None,
                telepro_id: None,
                evaluation_date: row.evaluation_date,
                booked_on: None,
                appointment_date: None,
                client_name: blank_to_none(row.client_name),
                client_phone: blank_to_none(row.client_phone),
                call_duration_secs: row.call_duration_secs.filter(|s| *s > 0),
                audio_url: None,
                summary: blank_to_none(row.summary),
                raw_notes: parse_note_list(&row.notes),
                comments: HashMap::new(),
            },
        });
    }

    Ok(rows)
}

/// Imports evaluations from a CSV export in a single transaction: either every
/// row is stored or none is. Out-of-range notes are clamped to the criterion's
/// range rather than rejected as `evaluate` does. Rows naming an unknown agent
/// email are stored without an agent.
pub async fn import_csv(
    pool: &PgPool,
    rubrics: &RubricRegistry,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    let reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("cannot open {}", csv_path.display()))?;
    let mut rows = read_csv_rows(reader)?;

    let mut tx = pool.begin().await?;
    for row in rows.iter_mut() {
        if let Some(email) = &row.agent_email {
            row.input.agent_id = match find_agent_by_email(&mut *tx, email).await? {
                Some(agent) => Some(agent.id),
                None => {
                    tracing::warn!(row = row.line, %email, "No agent with this email");
                    None
                }
            };
        }
        insert_evaluation(&mut *tx, rubrics, &row.input)
            .await
            .with_context(|| format!("row {} could not be stored", row.line))?;
    }
    tx.commit().await?;

    Ok(rows.len())
}
