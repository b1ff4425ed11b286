use std::fmt::Write;

use crate::models::{Agent, CriterionStat, Evaluation};
use crate::rubric::{RubricRegistry, RubricVariant};
use crate::stats::{self, DateRange, NameIndex};

fn range_label(dates: DateRange) -> String {
    match (dates.start, dates.end) {
        (None, None) => "all dates".to_string(),
        (Some(start), None) => format!("since {start}"),
        (None, Some(end)) => format!("until {end}"),
        (Some(start), Some(end)) => format!("{start} to {end}"),
    }
}

fn write_criteria(output: &mut String, heading: &str, criteria: &[CriterionStat]) {
    let _ = writeln!(output, "{heading}:");
    if criteria.is_empty() {
        let _ = writeln!(output, "- none");
        return;
    }
    for stat in criteria {
        let _ = writeln!(
            output,
            "- {}: {:.1}/{} ({:.0}%)",
            stat.label, stat.mean, stat.max_points, stat.percentage
        );
    }
}

/// Markdown summary of the evaluations in `dates`, optionally focused on one
/// agent.
pub fn build_report(
    rubrics: &RubricRegistry,
    evaluations: &[Evaluation],
    agents: &[Agent],
    names: &NameIndex,
    dates: DateRange,
    focus: Option<&Agent>,
) -> String {
    let in_range: Vec<Evaluation> = evaluations
        .iter()
        .filter(|e| dates.contains(e.evaluation_date))
        .cloned()
        .collect();
    let counts = stats::band_counts(&in_range);
    let ranking = stats::rank_agents(evaluations, agents, dates);

    let mut output = String::new();

    let _ = writeln!(output, "# Call Quality Report");
    let _ = writeln!(output, "Evaluations for {}", range_label(dates));
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");

    if counts.total == 0 {
        let _ = writeln!(output, "No evaluations recorded for this window.");
    } else {
        let _ = writeln!(output, "- Total: {}", counts.total);
        let _ = writeln!(output, "- Excellent: {}", counts.excellent);
        let _ = writeln!(output, "- Conforme: {}", counts.conforme);
        let _ = writeln!(output, "- À améliorer: {}", counts.a_ameliorer);
        let _ = writeln!(output, "- Non conforme: {}", counts.non_conforme);
        let _ = writeln!(output, "- Net: {}", counts.net);
        if let Some(mean) = stats::mean_score(&in_range) {
            let _ = writeln!(output, "- Mean score: {:.1} ({})", mean, stats::band_of(mean));
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Agent Ranking");

    if ranking.is_empty() {
        let _ = writeln!(output, "No agents evaluated in this window.");
    } else {
        for (position, entry) in ranking.iter().enumerate() {
            let _ = writeln!(
                output,
                "{}. {} mean {:.1} across {} evaluations",
                position + 1,
                entry.agent_name,
                entry.mean_score,
                entry.evaluation_count
            );
        }
    }

    if let Some(agent) = focus {
        let own: Vec<Evaluation> = in_range
            .iter()
            .filter(|e| e.agent_id == Some(agent.id))
            .cloned()
            .collect();

        let _ = writeln!(output);
        let _ = writeln!(output, "## Focus: {}", agent.display_name());

        for variant in RubricVariant::ALL {
            let breakdown = stats::criterion_breakdown(&own, rubrics.get(variant));
            let _ = writeln!(output);
            let _ = writeln!(output, "### {variant}");
            write_criteria(&mut output, "Strengths", &breakdown.strengths);
            write_criteria(&mut output, "To improve", &breakdown.weaknesses);
        }
    }

    let recent = stats::debriefings(evaluations, focus.map(|a| a.id), dates);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Recent Debriefings");

    if recent.is_empty() {
        let _ = writeln!(output, "No debriefings recorded for this window.");
    } else {
        for evaluation in recent.iter().take(5) {
            let _ = writeln!(
                output,
                "- {} ({}, {} pts) on {}: {}",
                names.agent_name(evaluation.agent_id),
                evaluation.variant,
                evaluation.final_score,
                stats::debrief_effective_date(evaluation),
                evaluation.debrief_comment.as_deref().unwrap_or("").trim()
            );
        }
    }

    output
}
