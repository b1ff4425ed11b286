use std::collections::HashMap;

use chrono::{Datelike, Duration, Local, NaiveDate};
use uuid::Uuid;

use crate::models::{
    Agent, AgentRanking, BandCounts, CriterionBreakdown, CriterionStat, Evaluation, Telepro,
};
use crate::rubric::{Rubric, RubricVariant};
use crate::scoring::{classify_score, ScoreBand};

const STRENGTH_THRESHOLD: f64 = 75.0;
const BREAKDOWN_LIMIT: usize = 5;
const EVOLUTION_LIMIT: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Period {
    Today,
    Week,
    Month,
}

/// Inclusive date bounds; an open bound does not filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn new(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.map_or(true, |start| date >= start) && self.end.map_or(true, |end| date <= end)
    }
}

pub fn quick_date_range(period: Period) -> DateRange {
    quick_date_range_on(period, Local::now().date_naive())
}

/// Bounds of `period` around `today`. Weeks run Monday to Sunday.
pub fn quick_date_range_on(period: Period, today: NaiveDate) -> DateRange {
    let (start, end) = match period {
        Period::Today => (today, today),
        Period::Week => {
            let monday =
                today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
            (monday, monday + Duration::days(6))
        }
        Period::Month => {
            let first = today.with_day(1).unwrap_or(today);
            let next_month = if first.month() == 12 {
                NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
            } else {
                NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
            };
            let last = next_month.map_or(today, |d| d - Duration::days(1));
            (first, last)
        }
    };
    DateRange::new(Some(start), Some(end))
}

/// Display names used by the free-text search.
#[derive(Debug, Clone, Default)]
pub struct NameIndex {
    agents: HashMap<Uuid, String>,
    telepros: HashMap<Uuid, String>,
}

impl NameIndex {
    pub fn new(agents: &[Agent], telepros: &[Telepro]) -> Self {
        Self {
            agents: agents.iter().map(|a| (a.id, a.display_name())).collect(),
            telepros: telepros.iter().map(|t| (t.id, t.name.clone())).collect(),
        }
    }

    pub fn agent_name(&self, id: Option<Uuid>) -> &str {
        id.and_then(|id| self.agents.get(&id))
            .map_or("", String::as_str)
    }

    pub fn telepro_name(&self, id: Option<Uuid>) -> &str {
        id.and_then(|id| self.telepros.get(&id))
            .map_or("", String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationFilter {
    pub dates: DateRange,
    pub agent_id: Option<Uuid>,
    pub variant: Option<RubricVariant>,
    pub band: Option<ScoreBand>,
    pub search: Option<String>,
}

impl EvaluationFilter {
    pub fn matches(&self, evaluation: &Evaluation, names: &NameIndex) -> bool {
        if !self.dates.contains(evaluation.evaluation_date) {
            return false;
        }
        if self.agent_id.is_some() && evaluation.agent_id != self.agent_id {
            return false;
        }
        if self.variant.is_some_and(|v| v != evaluation.variant) {
            return false;
        }
        if self.band.is_some_and(|b| b != evaluation.band()) {
            return false;
        }
        match self.search.as_deref().map(str::trim) {
            Some(term) if !term.is_empty() => {
                let term = term.to_lowercase();
                [
                    evaluation.client_name.as_deref().unwrap_or(""),
                    evaluation.client_phone.as_deref().unwrap_or(""),
                    names.agent_name(evaluation.agent_id),
                    names.telepro_name(evaluation.telepro_id),
                ]
                .iter()
                .any(|field| field.to_lowercase().contains(&term))
            }
            _ => true,
        }
    }
}

/// Lazily yields the evaluations matching every set predicate, in input
/// order. The iterator is `Clone`, so a consumer can walk it more than once.
pub fn filter_evaluations<'a>(
    evaluations: &'a [Evaluation],
    filter: &'a EvaluationFilter,
    names: &'a NameIndex,
) -> impl Iterator<Item = &'a Evaluation> + Clone + 'a {
    evaluations
        .iter()
        .filter(move |evaluation| filter.matches(evaluation, names))
}

pub fn band_counts<'a>(evaluations: impl IntoIterator<Item = &'a Evaluation>) -> BandCounts {
    let mut counts = BandCounts::default();

    for evaluation in evaluations {
        counts.total += 1;
        match evaluation.band() {
            ScoreBand::Excellent => counts.excellent += 1,
            ScoreBand::Conforme => counts.conforme += 1,
            ScoreBand::AAmeliorer => counts.a_ameliorer += 1,
            ScoreBand::NonConforme => counts.non_conforme += 1,
        }
    }

    counts.net = counts.total - counts.non_conforme;
    counts
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Mean final score per agent over `dates`, best first. Agents without an
/// evaluation in range are left out; equal means keep the order of `agents`.
pub fn rank_agents(
    evaluations: &[Evaluation],
    agents: &[Agent],
    dates: DateRange,
) -> Vec<AgentRanking> {
    let mut totals: HashMap<Uuid, (i64, usize)> = HashMap::new();

    for evaluation in evaluations {
        if !dates.contains(evaluation.evaluation_date) {
            continue;
        }
        let Some(agent_id) = evaluation.agent_id else {
            continue;
        };
        let entry = totals.entry(agent_id).or_insert((0, 0));
        entry.0 += i64::from(evaluation.final_score);
        entry.1 += 1;
    }

    let mut ranking: Vec<AgentRanking> = agents
        .iter()
        .filter_map(|agent| {
            let (total, count) = totals.get(&agent.id).copied()?;
            Some(AgentRanking {
                agent_id: agent.id,
                agent_name: agent.display_name(),
                mean_score: round_one_decimal(total as f64 / count as f64),
                evaluation_count: count,
            })
        })
        .collect();

    ranking.sort_by(|a, b| {
        b.mean_score
            .partial_cmp(&a.mean_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ranking
}

/// Per-criterion averages of one agent's evaluations of a single variant.
/// Evaluations of another variant are skipped.
pub fn criterion_breakdown(evaluations: &[Evaluation], rubric: &Rubric) -> CriterionBreakdown {
    let relevant: Vec<&Evaluation> = evaluations
        .iter()
        .filter(|e| e.variant == rubric.variant)
        .collect();

    if relevant.is_empty() {
        return CriterionBreakdown::default();
    }

    let mut stats: Vec<CriterionStat> = rubric
        .criteria
        .iter()
        .map(|criterion| {
            let sum: i64 = relevant
                .iter()
                .map(|e| i64::from(e.note_for(&criterion.id)))
                .sum();
            let mean = sum as f64 / relevant.len() as f64;
            CriterionStat {
                criterion_id: criterion.id.clone(),
                label: criterion.label.clone(),
                max_points: criterion.max_points,
                mean,
                percentage: mean / f64::from(criterion.max_points) * 100.0,
            }
        })
        .collect();

    stats.sort_by(|a, b| {
        b.percentage
            .partial_cmp(&a.percentage)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let strength_count = stats
        .iter()
        .take_while(|s| s.percentage >= STRENGTH_THRESHOLD)
        .take(BREAKDOWN_LIMIT)
        .count();
    let remainder = stats.split_off(strength_count);

    CriterionBreakdown {
        strengths: stats,
        weaknesses: remainder.into_iter().rev().take(BREAKDOWN_LIMIT).collect(),
    }
}

/// The most recent evaluations of one agent, oldest first.
pub fn agent_evolution(evaluations: &[Evaluation], agent_id: Uuid) -> Vec<&Evaluation> {
    let mut history: Vec<&Evaluation> = evaluations
        .iter()
        .filter(|e| e.agent_id == Some(agent_id))
        .collect();
    history.sort_by_key(|e| e.evaluation_date);
    let skip = history.len().saturating_sub(EVOLUTION_LIMIT);
    history.split_off(skip)
}

/// Date a debriefing is filed under: its own date, or the evaluation date
/// when none was recorded.
pub fn debrief_effective_date(evaluation: &Evaluation) -> NaiveDate {
    evaluation.debrief_date.unwrap_or(evaluation.evaluation_date)
}

/// Debriefed evaluations, latest debriefing first.
pub fn debriefings<'a>(
    evaluations: &'a [Evaluation],
    agent_id: Option<Uuid>,
    dates: DateRange,
) -> Vec<&'a Evaluation> {
    let mut list: Vec<&Evaluation> = evaluations
        .iter()
        .filter(|e| e.is_debriefed())
        .filter(|e| agent_id.is_none() || e.agent_id == agent_id)
        .filter(|e| dates.contains(debrief_effective_date(e)))
        .collect();
    list.sort_by(|a, b| debrief_effective_date(b).cmp(&debrief_effective_date(a)));
    list
}

/// Mean final score rounded to one decimal, `None` for an empty set.
pub fn mean_score<'a>(evaluations: impl IntoIterator<Item = &'a Evaluation>) -> Option<f64> {
    let (total, count) = evaluations
        .into_iter()
        .fold((0i64, 0usize), |(total, count), e| {
            (total + i64::from(e.final_score), count + 1)
        });
    (count > 0).then(|| round_one_decimal(total as f64 / count as f64))
}

/// Band of a fractional mean; the mean is truncated first so 89.9 stays below 90.
pub fn band_of(score: f64) -> ScoreBand {
    classify_score(score.floor() as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CriterionNote;
    use crate::rubric::RubricRegistry;
    use chrono::{TimeZone, Utc, Weekday};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn agent(first: &str, last: &str) -> Agent {
        Agent {
            id: Uuid::new_v4(),
            last_name: last.to_string(),
            first_name: first.to_string(),
            email: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap(),
        }
    }

    fn evaluation(agent_id: Option<Uuid>, on: NaiveDate, score: i32) -> Evaluation {
        Evaluation {
            id: Uuid::new_v4(),
            variant: RubricVariant::NewAppointment,
            agent_id,
            telepro_id: None,
            evaluation_date: on,
            booked_on: None,
            appointment_date: None,
            client_name: None,
            client_phone: None,
            call_duration_secs: None,
            audio_url: None,
            summary: None,
            notes: Vec::new(),
            final_score: score,
            debrief_comment: None,
            debrief_date: None,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap(),
        }
    }

    fn with_notes(variant: RubricVariant, notes: &[(&str, i32)]) -> Evaluation {
        let mut e = evaluation(None, date(2026, 3, 2), 0);
        e.variant = variant;
        e.notes = notes
            .iter()
            .map(|(id, note)| CriterionNote {
                criterion_id: id.to_string(),
                note: *note,
                comment: None,
            })
            .collect();
        e.final_score = e.notes.iter().map(|n| n.note).sum();
        e
    }

    #[test]
    fn week_runs_monday_to_sunday() {
        let wednesday = date(2026, 10, 14);
        assert_eq!(wednesday.weekday(), Weekday::Wed);
        let range = quick_date_range_on(Period::Week, wednesday);
        assert_eq!(range.start, Some(date(2026, 10, 12)));
        assert_eq!(range.end, Some(date(2026, 10, 18)));

        let sunday = date(2026, 10, 18);
        let range = quick_date_range_on(Period::Week, sunday);
        assert_eq!(range.start, Some(date(2026, 10, 12)));
        assert_eq!(range.end, Some(sunday));
    }

    #[test]
    fn month_and_today_ranges() {
        let range = quick_date_range_on(Period::Month, date(2028, 2, 10));
        assert_eq!(range, DateRange::new(Some(date(2028, 2, 1)), Some(date(2028, 2, 29))));

        let range = quick_date_range_on(Period::Month, date(2026, 12, 31));
        assert_eq!(range, DateRange::new(Some(date(2026, 12, 1)), Some(date(2026, 12, 31))));

        let today = date(2026, 10, 17);
        let range = quick_date_range_on(Period::Today, today);
        assert_eq!(range, DateRange::new(Some(today), Some(today)));
    }

    #[test]
    fn ranking_of_single_agent_matches_band_counts() {
        let camille = agent("Camille", "Durand");
        let on = date(2026, 10, 1);
        let evaluations: Vec<Evaluation> = [95, 80, 65, 40]
            .into_iter()
            .map(|s| evaluation(Some(camille.id), on, s))
            .collect();

        let ranking = rank_agents(&evaluations, &[camille.clone()], DateRange::default());
        assert_eq!(ranking.len(), 1);
        assert_eq!(ranking[0].mean_score, 70.0);
        assert_eq!(ranking[0].evaluation_count, 4);
        assert_eq!(ranking[0].agent_name, "Camille Durand");

        let counts = band_counts(&evaluations);
        assert_eq!(
            counts,
            BandCounts {
                total: 4,
                excellent: 1,
                conforme: 1,
                a_ameliorer: 1,
                non_conforme: 1,
                net: 3,
            }
        );
    }

    #[test]
    fn ranking_skips_idle_agents_and_sorts_descending() {
        let a = agent("Camille", "Durand");
        let b = agent("Yanis", "Lefevre");
        let idle = agent("Sarah", "Benali");
        let tied = agent("Noa", "Roux");
        let on = date(2026, 10, 5);
        let evaluations = vec![
            evaluation(Some(a.id), on, 70),
            evaluation(Some(b.id), on, 91),
            evaluation(Some(b.id), on, 88),
            evaluation(Some(tied.id), on, 70),
            evaluation(Some(idle.id), date(2026, 8, 1), 100),
            evaluation(None, on, 100),
        ];
        let range = DateRange::new(Some(date(2026, 10, 1)), Some(date(2026, 10, 31)));

        let agents = [a.clone(), b.clone(), idle.clone(), tied.clone()];
        let ranking = rank_agents(&evaluations, &agents, range);

        let ids: Vec<Uuid> = ranking.iter().map(|r| r.agent_id).collect();
        assert_eq!(ids, vec![b.id, a.id, tied.id]);
        assert_eq!(ranking[0].mean_score, 89.5);
        assert!(ranking.windows(2).all(|w| w[0].mean_score >= w[1].mean_score));
    }

    #[test]
    fn ranking_mean_rounds_to_one_decimal() {
        let a = agent("Camille", "Durand");
        let on = date(2026, 10, 5);
        let evaluations = vec![
            evaluation(Some(a.id), on, 70),
            evaluation(Some(a.id), on, 71),
            evaluation(Some(a.id), on, 71),
        ];
        let ranking = rank_agents(&evaluations, &[a], DateRange::default());
        assert_eq!(ranking[0].mean_score, 70.7);
    }

    #[test]
    fn breakdown_lists_are_disjoint_and_capped() {
        let registry = RubricRegistry::builtin();
        let rubric = registry.get(RubricVariant::NewAppointment);
        let full: Vec<(&str, i32)> = rubric
            .criteria
            .iter()
            .map(|c| (c.id.as_str(), c.max_points))
            .collect();
        let evaluations = vec![
            with_notes(RubricVariant::NewAppointment, &full),
            with_notes(RubricVariant::NewAppointment, &full),
        ];

        let breakdown = criterion_breakdown(&evaluations, rubric);
        assert_eq!(breakdown.strengths.len(), 5);
        assert_eq!(breakdown.weaknesses.len(), 5);
        for strength in &breakdown.strengths {
            assert!(breakdown
                .weaknesses
                .iter()
                .all(|w| w.criterion_id != strength.criterion_id));
        }
        assert!(breakdown.strengths.len() + breakdown.weaknesses.len() <= rubric.criteria.len());
    }

    #[test]
    fn breakdown_weaknesses_come_from_the_bottom() {
        let registry = RubricRegistry::builtin();
        let rubric = registry.get(RubricVariant::AbsentAppointment);
        let evaluations = vec![
            with_notes(
                RubricVariant::AbsentAppointment,
                &[("presentation", 5), ("identite_client", 4), ("sms_appel", 2)],
            ),
            with_notes(
                RubricVariant::AbsentAppointment,
                &[("presentation", 5), ("identite_client", 4), ("sms_appel", 6)],
            ),
            // Other variant: ignored.
            with_notes(RubricVariant::NewAppointment, &[("presentation", 0)]),
        ];

        let breakdown = criterion_breakdown(&evaluations, rubric);
        let strengths: Vec<&str> = breakdown
            .strengths
            .iter()
            .map(|s| s.criterion_id.as_str())
            .collect();
        assert_eq!(strengths, vec!["presentation", "identite_client"]);
        assert_eq!(breakdown.strengths[1].percentage, 80.0);

        // Ten criteria sit at 0 %; the weakest five are taken before sms_appel (40 %).
        assert_eq!(breakdown.weaknesses.len(), 5);
        assert!(breakdown.weaknesses.iter().all(|w| w.percentage == 0.0));
        assert!(breakdown
            .weaknesses
            .iter()
            .all(|w| w.criterion_id != "sms_appel"));
    }

    #[test]
    fn breakdown_without_evaluations_is_empty() {
        let registry = RubricRegistry::builtin();
        let breakdown = criterion_breakdown(&[], registry.get(RubricVariant::NewAppointment));
        assert!(breakdown.strengths.is_empty());
        assert!(breakdown.weaknesses.is_empty());
    }

    #[test]
    fn empty_filter_is_identity() {
        let evaluations = vec![
            evaluation(None, date(2026, 1, 1), 10),
            evaluation(None, date(2026, 2, 1), 95),
        ];
        let filter = EvaluationFilter::default();
        let names = NameIndex::default();
        let ids: Vec<Uuid> = filter_evaluations(&evaluations, &filter, &names)
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, evaluations.iter().map(|e| e.id).collect::<Vec<_>>());
    }

    #[test]
    fn filters_compose_and_are_repeatable() {
        let camille = agent("Camille", "Durand");
        let telepro = Telepro {
            id: Uuid::new_v4(),
            name: "Morgane".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap(),
        };
        let names = NameIndex::new(&[camille.clone()], &[telepro.clone()]);

        let mut by_client = evaluation(Some(camille.id), date(2026, 10, 2), 92);
        by_client.client_name = Some("Dupont".to_string());
        let mut by_telepro = evaluation(None, date(2026, 10, 3), 91);
        by_telepro.telepro_id = Some(telepro.id);
        let mut by_phone = evaluation(None, date(2026, 10, 4), 50);
        by_phone.client_phone = Some("0612345678".to_string());
        let mut absent = evaluation(Some(camille.id), date(2026, 10, 5), 95);
        absent.variant = RubricVariant::AbsentAppointment;
        let evaluations = vec![by_client, by_telepro, by_phone, absent];

        let search = |term: &str| EvaluationFilter {
            search: Some(term.to_string()),
            ..EvaluationFilter::default()
        };
        let count = |filter: &EvaluationFilter| {
            filter_evaluations(&evaluations, filter, &names).count()
        };

        assert_eq!(count(&search("DUPONT")), 1);
        assert_eq!(count(&search("  dupont ")), 1);
        assert_eq!(count(&search("morg")), 1);
        assert_eq!(count(&search("camille")), 2);
        assert_eq!(count(&search("1234")), 1);
        assert_eq!(count(&search("   ")), 4);

        let filter = EvaluationFilter {
            dates: DateRange::new(Some(date(2026, 10, 2)), Some(date(2026, 10, 4))),
            band: Some(ScoreBand::Excellent),
            variant: Some(RubricVariant::NewAppointment),
            ..EvaluationFilter::default()
        };
        let once = filter_evaluations(&evaluations, &filter, &names);
        assert_eq!(once.clone().count(), 2);
        assert_eq!(once.count(), 2);

        let first_pass: Vec<Evaluation> = filter_evaluations(&evaluations, &filter, &names)
            .cloned()
            .collect();
        let second_pass: Vec<Uuid> = filter_evaluations(&first_pass, &filter, &names)
            .map(|e| e.id)
            .collect();
        assert_eq!(second_pass, first_pass.iter().map(|e| e.id).collect::<Vec<_>>());

        let by_agent = EvaluationFilter {
            agent_id: Some(camille.id),
            ..EvaluationFilter::default()
        };
        assert_eq!(count(&by_agent), 2);
    }

    #[test]
    fn evolution_keeps_last_fifty_oldest_first() {
        let a = agent("Camille", "Durand");
        let start = date(2026, 1, 1);
        let evaluations: Vec<Evaluation> = (0..60)
            .rev()
            .map(|i| evaluation(Some(a.id), start + Duration::days(i), 70))
            .collect();

        let evolution = agent_evolution(&evaluations, a.id);
        assert_eq!(evolution.len(), 50);
        assert_eq!(evolution[0].evaluation_date, start + Duration::days(10));
        assert_eq!(evolution[49].evaluation_date, start + Duration::days(59));
    }

    #[test]
    fn debriefings_use_effective_date_and_skip_blank_comments() {
        let a = agent("Camille", "Durand");
        let mut late = evaluation(Some(a.id), date(2026, 9, 1), 80);
        late.debrief_comment = Some("Bon appel".to_string());
        late.debrief_date = Some(date(2026, 10, 10));
        let mut fallback = evaluation(Some(a.id), date(2026, 10, 3), 60);
        fallback.debrief_comment = Some("Reformuler".to_string());
        let mut blank = evaluation(Some(a.id), date(2026, 10, 4), 60);
        blank.debrief_comment = Some("  ".to_string());
        let evaluations = vec![fallback, late, blank];

        let list = debriefings(&evaluations, Some(a.id), DateRange::default());
        let dates: Vec<NaiveDate> = list.iter().map(|e| debrief_effective_date(e)).collect();
        assert_eq!(dates, vec![date(2026, 10, 10), date(2026, 10, 3)]);

        let october = DateRange::new(Some(date(2026, 10, 5)), None);
        assert_eq!(debriefings(&evaluations, None, october).len(), 1);
    }

    #[test]
    fn mean_score_is_none_without_evaluations() {
        assert_eq!(mean_score(Vec::<Evaluation>::new().iter()), None);
        let on = date(2026, 1, 1);
        let evaluations = vec![evaluation(None, on, 90), evaluation(None, on, 85)];
        assert_eq!(mean_score(&evaluations), Some(87.5));
        assert_eq!(band_of(89.9), ScoreBand::Conforme);
    }
}
