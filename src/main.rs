use std::path::PathBuf;

use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod blob;
mod config;
mod db;
mod error;
mod models;
mod report;
mod rubric;
mod scoring;
mod stats;
mod validation;

use crate::blob::LocalBlobStore;
use crate::config::AppConfig;
use crate::db::EvaluationScope;
use crate::models::{CriterionStat, Evaluation, NewEvaluation};
use crate::rubric::{RubricRegistry, RubricVariant};
use crate::scoring::ScoreBand;
use crate::stats::{DateRange, EvaluationFilter, NameIndex, Period};

#[derive(Parser)]
#[command(name = "call-quality")]
#[command(about = "Call quality evaluations, debriefings and agent statistics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct RangeArgs {
    /// First evaluation date to include (YYYY-MM-DD)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last evaluation date to include (YYYY-MM-DD)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Shortcut for the current day, week or month
    #[arg(long, value_enum, conflicts_with_all = ["from", "to"])]
    period: Option<Period>,
}

impl RangeArgs {
    fn resolve(self) -> DateRange {
        match self.period {
            Some(period) => stats::quick_date_range(period),
            None => DateRange::new(self.from, self.to),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample agents and evaluations
    Seed,
    /// Import evaluations from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },
    /// Manage telepros (secondary reviewers)
    Telepro {
        #[command(subcommand)]
        action: TeleproAction,
    },
    /// Record a new evaluation
    Evaluate(EvaluateArgs),
    /// Browse and manage evaluations
    Evaluations {
        #[command(subcommand)]
        action: EvaluationAction,
    },
    /// Attach a debriefing comment to an evaluation
    Debrief {
        #[arg(long)]
        id: Uuid,
        #[arg(long)]
        comment: String,
        /// Defaults to today
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List debriefed evaluations, latest first
    Debriefings {
        #[arg(long)]
        agent: Option<Uuid>,
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Aggregate statistics
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },
    /// Write a markdown report
    Report {
        #[command(flatten)]
        range: RangeArgs,
        /// Add strengths and weaknesses for this agent
        #[arg(long)]
        agent: Option<Uuid>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    Add {
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        email: Option<String>,
    },
    List,
    /// Refused while evaluations still reference the agent
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum TeleproAction {
    Add {
        #[arg(long)]
        name: String,
    },
    List,
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Args)]
struct EvaluateArgs {
    #[arg(long, value_enum)]
    variant: RubricVariant,
    #[arg(long)]
    agent: Option<Uuid>,
    #[arg(long)]
    telepro: Option<Uuid>,
    /// Defaults to today
    #[arg(long)]
    date: Option<NaiveDate>,
    /// Day the appointment was booked
    #[arg(long)]
    booked_on: Option<NaiveDate>,
    #[arg(long)]
    appointment_date: Option<NaiveDate>,
    #[arg(long)]
    client_name: Option<String>,
    #[arg(long)]
    client_phone: Option<String>,
    #[arg(long)]
    minutes: Option<u32>,
    #[arg(long)]
    seconds: Option<u32>,
    /// Recording to upload alongside the evaluation
    #[arg(long)]
    audio: Option<PathBuf>,
    #[arg(long)]
    summary: Option<String>,
    /// criterion=points, repeatable
    #[arg(long = "note")]
    notes: Vec<String>,
    /// criterion=text, repeatable
    #[arg(long = "comment")]
    comments: Vec<String>,
}

#[derive(Subcommand)]
enum EvaluationAction {
    List {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long)]
        agent: Option<Uuid>,
        #[arg(long, value_enum)]
        variant: Option<RubricVariant>,
        #[arg(long, value_enum)]
        band: Option<ScoreBand>,
        /// Matches client name or phone, agent or telepro name
        #[arg(long)]
        search: Option<String>,
    },
    Show {
        #[arg(long)]
        id: Uuid,
    },
    Delete {
        #[arg(long)]
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum StatsAction {
    /// Evaluation counts per score band
    Overview {
        #[command(flatten)]
        range: RangeArgs,
        #[arg(long)]
        agent: Option<Uuid>,
    },
    /// Agents by mean score
    Ranking {
        #[command(flatten)]
        range: RangeArgs,
    },
    /// Score history and per-criterion strengths for one agent
    Agent {
        #[arg(long)]
        id: Uuid,
    },
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn format_duration(seconds: Option<i32>) -> String {
    match seconds {
        Some(s) if s > 0 => format!("{}m {}s", s / 60, s % 60),
        _ => "-".to_string(),
    }
}

fn print_evaluation_line(evaluation: &Evaluation, names: &NameIndex) {
    let agent = names.agent_name(evaluation.agent_id);
    println!(
        "- {} {} [{}] {} | client {} | score {} ({}){}",
        evaluation.id,
        evaluation.evaluation_date,
        evaluation.variant,
        if agent.is_empty() { "-" } else { agent },
        evaluation.client_name.as_deref().unwrap_or("-"),
        evaluation.final_score,
        evaluation.band(),
        if evaluation.is_debriefed() { " debriefed" } else { "" }
    );
}

fn print_criterion(stat: &CriterionStat) {
    println!(
        "  - {} {:.1}/{} ({:.0}%)",
        stat.label, stat.mean, stat.max_points, stat.percentage
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(error) = run(cli).await {
        error!(error = %format!("{error:#}"), "Command failed");
        return Err(error);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    let rubrics = config.rubrics()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool, &rubrics).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let inserted = db::import_csv(&pool, &rubrics, &csv).await?;
            println!("Inserted {inserted} evaluations from {}.", csv.display());
        }
        Commands::Agent { action } => agent_command(&pool, action).await?,
        Commands::Telepro { action } => telepro_command(&pool, action).await?,
        Commands::Evaluate(args) => evaluate(&pool, &rubrics, &config, args).await?,
        Commands::Evaluations { action } => evaluation_command(&pool, &rubrics, action).await?,
        Commands::Debrief { id, comment, date } => {
            let comment = validation::debrief_comment(&comment)?;
            let evaluation = db::find_evaluation(&pool, &rubrics, id).await?;
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            db::update_debriefing(&pool, evaluation.variant, id, &comment, date).await?;
            info!(evaluation_id = %id, %date, "Debriefing saved");
            println!("Debriefing saved for {id}.");
        }
        Commands::Debriefings { agent, range } => {
            let evaluations = db::fetch_evaluations(
                &pool,
                &rubrics,
                EvaluationScope {
                    agent_id: agent,
                    debriefed_only: true,
                    ..EvaluationScope::default()
                },
            )
            .await?;
            let names = name_index(&pool).await?;
            let list = stats::debriefings(&evaluations, agent, range.resolve());

            if list.is_empty() {
                println!("No debriefings found.");
                return Ok(());
            }
            println!("{} debriefing(s):", list.len());
            for evaluation in list {
                println!(
                    "- {} {} [{}] {} score {}: {}",
                    stats::debrief_effective_date(evaluation),
                    evaluation.id,
                    evaluation.variant,
                    names.agent_name(evaluation.agent_id),
                    evaluation.final_score,
                    evaluation.debrief_comment.as_deref().unwrap_or("").trim()
                );
            }
        }
        Commands::Stats { action } => stats_command(&pool, &rubrics, action).await?,
        Commands::Report { range, agent, out } => {
            let evaluations =
                db::fetch_evaluations(&pool, &rubrics, EvaluationScope::default()).await?;
            let agents = db::list_agents(&pool).await?;
            let telepros = db::list_telepros(&pool).await?;
            let names = NameIndex::new(&agents, &telepros);
            let focus = match agent {
                Some(id) => Some(
                    agents
                        .iter()
                        .find(|a| a.id == id)
                        .with_context(|| format!("agent {id} not found"))?,
                ),
                None => None,
            };
            let report = report::build_report(
                &rubrics,
                &evaluations,
                &agents,
                &names,
                range.resolve(),
                focus,
            );
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn name_index(pool: &PgPool) -> anyhow::Result<NameIndex> {
    let agents = db::list_agents(pool).await?;
    let telepros = db::list_telepros(pool).await?;
    Ok(NameIndex::new(&agents, &telepros))
}

async fn agent_command(pool: &PgPool, action: AgentAction) -> anyhow::Result<()> {
    match action {
        AgentAction::Add {
            last_name,
            first_name,
            email,
        } => {
            let form = validation::agent_form(&last_name, &first_name, email.as_deref())?;
            let agent = db::insert_agent(pool, &form).await?;
            info!(agent_id = %agent.id, "Agent created");
            println!("Agent {} created with id {}.", agent.display_name(), agent.id);
        }
        AgentAction::List => {
            let agents = db::list_agents(pool).await?;
            if agents.is_empty() {
                println!("No agents yet.");
            }
            for agent in agents {
                println!(
                    "- {} {} <{}> added {}",
                    agent.id,
                    agent.display_name(),
                    agent.email.as_deref().unwrap_or("-"),
                    agent.created_at.with_timezone(&Local).format("%Y-%m-%d")
                );
            }
        }
        AgentAction::Delete { id } => {
            db::delete_agent(pool, id).await?;
            info!(agent_id = %id, "Agent deleted");
            println!("Agent {id} deleted.");
        }
    }
    Ok(())
}

async fn telepro_command(pool: &PgPool, action: TeleproAction) -> anyhow::Result<()> {
    match action {
        TeleproAction::Add { name } => {
            let name = validation::telepro_name(&name)?;
            let telepro = db::insert_telepro(pool, &name).await?;
            info!(telepro_id = %telepro.id, "Telepro created");
            println!("Telepro {} created with id {}.", telepro.name, telepro.id);
        }
        TeleproAction::List => {
            let telepros = db::list_telepros(pool).await?;
            if telepros.is_empty() {
                println!("No telepros yet.");
            }
            for telepro in telepros {
                println!(
                    "- {} {} added {}",
                    telepro.id,
                    telepro.name,
                    telepro.created_at.with_timezone(&Local).format("%Y-%m-%d")
                );
            }
        }
        TeleproAction::Delete { id } => {
            db::delete_telepro(pool, id).await?;
            info!(telepro_id = %id, "Telepro deleted");
            println!("Telepro {id} deleted.");
        }
    }
    Ok(())
}

async fn evaluate(
    pool: &PgPool,
    rubrics: &RubricRegistry,
    config: &AppConfig,
    args: EvaluateArgs,
) -> anyhow::Result<()> {
    let rubric = rubrics.get(args.variant);
    let raw_notes = validation::key_values(&args.notes)?;
    let comments = validation::key_values(&args.comments)?;
    validation::notes(rubric, &raw_notes)?;
    validation::comments(rubric, &comments)?;
    let call_duration_secs = validation::call_duration(args.minutes, args.seconds)?;

    db::ensure_references(pool, args.agent, args.telepro).await?;

    let store = LocalBlobStore::new(&config.audio_dir, &config.audio_public_base_url);
    let recording = match &args.audio {
        Some(path) => blob::upload_recording(&store, path).await,
        None => None,
    };

    let input = NewEvaluation {
        variant: args.variant,
        agent_id: args.agent,
        telepro_id: args.telepro,
        evaluation_date: args.date.unwrap_or_else(|| Local::now().date_naive()),
        booked_on: args.booked_on,
        appointment_date: args.appointment_date,
        client_name: blank_to_none(args.client_name),
        client_phone: blank_to_none(args.client_phone),
        call_duration_secs,
        audio_url: recording.as_ref().map(|r| r.url.clone()),
        summary: blank_to_none(args.summary),
        raw_notes,
        comments,
    };

    let evaluation = match db::insert_evaluation(pool, rubrics, &input).await {
        Ok(evaluation) => evaluation,
        Err(error) => {
            if let Some(recording) = &recording {
                blob::discard_recording(&store, recording).await;
            }
            return Err(error.into());
        }
    };
    info!(
        evaluation_id = %evaluation.id,
        variant = %evaluation.variant,
        final_score = evaluation.final_score,
        "Evaluation saved"
    );
    println!(
        "Evaluation {} saved: {}/{} ({:.1}%), {}.",
        evaluation.id,
        evaluation.final_score,
        rubric.max_total(),
        f64::from(evaluation.final_score) / f64::from(rubric.max_total()) * 100.0,
        evaluation.band()
    );
    if args.audio.is_some() && evaluation.audio_url.is_none() {
        println!("Recording was not stored; see the log for details.");
    }
    Ok(())
}

async fn evaluation_command(
    pool: &PgPool,
    rubrics: &RubricRegistry,
    action: EvaluationAction,
) -> anyhow::Result<()> {
    match action {
        EvaluationAction::List {
            range,
            agent,
            variant,
            band,
            search,
        } => {
            let evaluations =
                db::fetch_evaluations(pool, rubrics, EvaluationScope::default()).await?;
            let names = name_index(pool).await?;
            let filter = EvaluationFilter {
                dates: range.resolve(),
                agent_id: agent,
                variant,
                band,
                search,
            };

            let matching = stats::filter_evaluations(&evaluations, &filter, &names);
            let count = matching.clone().count();
            println!("{count} evaluation(s):");
            for evaluation in matching {
                print_evaluation_line(evaluation, &names);
            }
        }
        EvaluationAction::Show { id } => {
            let evaluation = db::find_evaluation(pool, rubrics, id).await?;
            let names = name_index(pool).await?;
            let rubric = rubrics.get(evaluation.variant);

            print_evaluation_line(&evaluation, &names);
            println!("  telepro: {}", names.telepro_name(evaluation.telepro_id));
            println!("  phone: {}", evaluation.client_phone.as_deref().unwrap_or("-"));
            println!("  duration: {}", format_duration(evaluation.call_duration_secs));
            if let Some(date) = evaluation.booked_on {
                println!("  booked on: {date}");
            }
            if let Some(date) = evaluation.appointment_date {
                println!("  appointment: {date}");
            }
            println!("  audio: {}", evaluation.audio_url.as_deref().unwrap_or("-"));
            println!("  summary: {}", evaluation.summary.as_deref().unwrap_or("-"));
            println!("  score: {}/{}", evaluation.final_score, rubric.max_total());
            for criterion in &rubric.criteria {
                let note = evaluation
                    .notes
                    .iter()
                    .find(|n| n.criterion_id == criterion.id);
                println!(
                    "  - {}: {}/{}{}",
                    criterion.label,
                    note.map_or(0, |n| n.note),
                    criterion.max_points,
                    note.and_then(|n| n.comment.as_deref())
                        .map(|c| format!(" ({c})"))
                        .unwrap_or_default()
                );
            }
            if let Some(comment) = &evaluation.debrief_comment {
                println!(
                    "  debriefing ({}): {comment}",
                    stats::debrief_effective_date(&evaluation)
                );
            }
        }
        EvaluationAction::Delete { id } => {
            let evaluation = db::find_evaluation(pool, rubrics, id).await?;
            db::delete_evaluation(pool, evaluation.variant, id).await?;
            info!(evaluation_id = %id, "Evaluation deleted");
            println!("Evaluation {id} deleted.");
        }
    }
    Ok(())
}

async fn stats_command(
    pool: &PgPool,
    rubrics: &RubricRegistry,
    action: StatsAction,
) -> anyhow::Result<()> {
    match action {
        StatsAction::Overview { range, agent } => {
            let evaluations =
                db::fetch_evaluations(pool, rubrics, EvaluationScope::default()).await?;
            let filter = EvaluationFilter {
                dates: range.resolve(),
                agent_id: agent,
                ..EvaluationFilter::default()
            };
            let names = NameIndex::default();
            let counts =
                stats::band_counts(stats::filter_evaluations(&evaluations, &filter, &names));

            println!("Total: {}", counts.total);
            println!("Excellent: {}", counts.excellent);
            println!("Conforme: {}", counts.conforme);
            println!("À améliorer: {}", counts.a_ameliorer);
            println!("Non conforme: {}", counts.non_conforme);
            println!("Net: {}", counts.net);
        }
        StatsAction::Ranking { range } => {
            let evaluations =
                db::fetch_evaluations(pool, rubrics, EvaluationScope::default()).await?;
            let agents = db::list_agents(pool).await?;
            let ranking = stats::rank_agents(&evaluations, &agents, range.resolve());

            if ranking.is_empty() {
                println!("No evaluations found for this window.");
                return Ok(());
            }
            println!("Agents by mean score:");
            for (position, entry) in ranking.iter().enumerate() {
                println!(
                    "{}. {} ({}) mean {:.1} across {} evaluations",
                    position + 1,
                    entry.agent_name,
                    entry.agent_id,
                    entry.mean_score,
                    entry.evaluation_count
                );
            }
        }
        StatsAction::Agent { id } => {
            let evaluations = db::fetch_evaluations(
                pool,
                rubrics,
                EvaluationScope {
                    agent_id: Some(id),
                    ..EvaluationScope::default()
                },
            )
            .await?;

            if evaluations.is_empty() {
                println!("No evaluations for agent {id}.");
                return Ok(());
            }

            println!("Score history:");
            for evaluation in stats::agent_evolution(&evaluations, id) {
                println!(
                    "- {} [{}] {} ({})",
                    evaluation.evaluation_date,
                    evaluation.variant,
                    evaluation.final_score,
                    evaluation.band()
                );
            }

            for variant in RubricVariant::ALL {
                let breakdown = stats::criterion_breakdown(&evaluations, rubrics.get(variant));
                if breakdown.strengths.is_empty() && breakdown.weaknesses.is_empty() {
                    continue;
                }
                println!();
                println!("{variant}");
                println!("  Strengths:");
                for stat in &breakdown.strengths {
                    print_criterion(stat);
                }
                println!("  To improve:");
                for stat in &breakdown.weaknesses {
                    print_criterion(stat);
                }
            }
        }
    }
    Ok(())
}
