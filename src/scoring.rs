use std::collections::HashMap;
use std::fmt;

use crate::models::CriterionNote;
use crate::rubric::Rubric;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, clap::ValueEnum)]
pub enum ScoreBand {
    #[value(name = "non-conforme")]
    NonConforme,
    #[value(name = "ameliorer")]
    AAmeliorer,
    #[value(name = "conforme")]
    Conforme,
    #[value(name = "excellent")]
    Excellent,
}

impl ScoreBand {
    pub fn label(self) -> &'static str {
        match self {
            ScoreBand::Excellent => "Excellent",
            ScoreBand::Conforme => "Conforme",
            ScoreBand::AAmeliorer => "À améliorer",
            ScoreBand::NonConforme => "Non conforme",
        }
    }
}

impl fmt::Display for ScoreBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Maps a final score to its band.
///
/// | Score   | Band        |
/// |---------|-------------|
/// | >= 90   | Excellent   |
/// | 75..=89 | Conforme    |
/// | 60..=74 | AAmeliorer  |
/// | < 60    | NonConforme |
///
/// The thresholds apply to the raw point total for both rubrics, not to a
/// percentage of the rubric maximum.
pub fn classify_score(score: i32) -> ScoreBand {
    match score {
        s if s >= 90 => ScoreBand::Excellent,
        s if s >= 75 => ScoreBand::Conforme,
        s if s >= 60 => ScoreBand::AAmeliorer,
        _ => ScoreBand::NonConforme,
    }
}

/// Reads the leading integer of a form value: optional whitespace, optional
/// sign, then digits. Anything that does not start that way reads as 0, and
/// trailing junk after the digits is ignored ("7 pts" reads as 7).
pub fn coerce_note(raw: &str) -> i64 {
    let trimmed = raw.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        value = value
            .saturating_mul(10)
            .saturating_add(i64::from(byte - b'0'));
    }

    if negative {
        -value
    } else {
        value
    }
}

fn clamp_note(raw: Option<&str>, max_points: i32) -> i32 {
    let value = raw.map(coerce_note).unwrap_or(0);
    value.clamp(0, i64::from(max_points.max(0))) as i32
}

/// Sum of the clamped notes of every criterion in `rubric`. Keys that do not
/// name a criterion are ignored; missing criteria count as 0.
pub fn compute_final_score<S: AsRef<str>>(rubric: &Rubric, notes: &HashMap<String, S>) -> i32 {
    rubric
        .criteria
        .iter()
        .map(|c| clamp_note(notes.get(&c.id).map(|v| v.as_ref()), c.max_points))
        .sum()
}

/// Clamped notes in rubric order, ready to persist, plus their total.
pub fn score_sheet<S: AsRef<str>>(
    rubric: &Rubric,
    notes: &HashMap<String, S>,
    comments: &HashMap<String, String>,
) -> (Vec<CriterionNote>, i32) {
    let sheet: Vec<CriterionNote> = rubric
        .criteria
        .iter()
        .map(|c| CriterionNote {
            criterion_id: c.id.clone(),
            note: clamp_note(notes.get(&c.id).map(|v| v.as_ref()), c.max_points),
            comment: comments
                .get(&c.id)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
        })
        .collect();
    (sheet, compute_final_score(rubric, notes))
}

/// Re-clamps stored notes against the rubric and returns their sum, to check a
/// row read back from the store against its recorded total.
pub fn rescore(rubric: &Rubric, notes: &[CriterionNote]) -> i32 {
    rubric
        .criteria
        .iter()
        .map(|c| {
            notes
                .iter()
                .find(|n| n.criterion_id == c.id)
                .map(|n| n.note.clamp(0, c.max_points.max(0)))
                .unwrap_or(0)
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rubric::{RubricRegistry, RubricVariant};

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn band_boundaries_are_inclusive_below() {
        assert_eq!(classify_score(120), ScoreBand::Excellent);
        assert_eq!(classify_score(90), ScoreBand::Excellent);
        assert_eq!(classify_score(89), ScoreBand::Conforme);
        assert_eq!(classify_score(75), ScoreBand::Conforme);
        assert_eq!(classify_score(74), ScoreBand::AAmeliorer);
        assert_eq!(classify_score(60), ScoreBand::AAmeliorer);
        assert_eq!(classify_score(59), ScoreBand::NonConforme);
        assert_eq!(classify_score(0), ScoreBand::NonConforme);
    }

    #[test]
    fn coerce_reads_leading_integer() {
        assert_eq!(coerce_note("7"), 7);
        assert_eq!(coerce_note("  12abc"), 12);
        assert_eq!(coerce_note("3.9"), 3);
        assert_eq!(coerce_note("-4"), -4);
        assert_eq!(coerce_note("+6"), 6);
        assert_eq!(coerce_note("abc"), 0);
        assert_eq!(coerce_note(""), 0);
        assert_eq!(coerce_note("-"), 0);
        assert_eq!(coerce_note("99999999999999999999999"), i64::MAX);
    }

    #[test]
    fn final_score_clamps_each_criterion() {
        let registry = RubricRegistry::builtin();
        let rubric = registry.get(RubricVariant::NewAppointment);
        let notes = raw(&[
            ("presentation", "9"),
            ("etapes", "-3"),
            ("ton_voix", "seven"),
            ("ecoute_active", "6"),
            ("not_a_criterion", "50"),
        ]);
        // presentation capped at 5, etapes floored at 0, ton_voix unreadable.
        assert_eq!(compute_final_score(rubric, &notes), 11);
    }

    #[test]
    fn final_score_stays_within_rubric_range() {
        let registry = RubricRegistry::builtin();
        for variant in RubricVariant::ALL {
            let rubric = registry.get(variant);
            let maxed: HashMap<String, String> = rubric
                .criteria
                .iter()
                .map(|c| (c.id.clone(), "1000".to_string()))
                .collect();
            let floored: HashMap<String, String> = rubric
                .criteria
                .iter()
                .map(|c| (c.id.clone(), "-1000".to_string()))
                .collect();
            assert_eq!(compute_final_score(rubric, &maxed), rubric.max_total());
            assert_eq!(compute_final_score(rubric, &floored), 0);
            assert_eq!(compute_final_score(rubric, &HashMap::<String, String>::new()), 0);
        }
    }

    #[test]
    fn final_score_is_idempotent_and_ignores_insertion_order() {
        let registry = RubricRegistry::builtin();
        let rubric = registry.get(RubricVariant::AbsentAppointment);
        let forward = raw(&[("presentation", "4"), ("sms_appel", "8"), ("ton_voix", "6")]);
        let mut backward = HashMap::new();
        backward.insert("ton_voix".to_string(), "6".to_string());
        backward.insert("sms_appel".to_string(), "8".to_string());
        backward.insert("presentation".to_string(), "4".to_string());

        let first = compute_final_score(rubric, &forward);
        assert_eq!(first, 18);
        assert_eq!(compute_final_score(rubric, &forward), first);
        assert_eq!(compute_final_score(rubric, &backward), first);
    }

    #[test]
    fn final_score_ignores_criteria_order() {
        let registry = RubricRegistry::builtin();
        let rubric = registry.get(RubricVariant::NewAppointment);
        let notes = raw(&[
            ("presentation", "5"),
            ("etapes", "14"),
            ("fixer_rdv", "3"),
            ("ton_voix", "-2"),
            ("ecoute_active", "6"),
        ]);

        let mut reversed = rubric.clone();
        reversed.criteria.reverse();
        let mut rotated = rubric.clone();
        rotated.criteria.rotate_left(4);

        let expected = compute_final_score(rubric, &notes);
        assert_eq!(expected, 24);
        assert_eq!(compute_final_score(&reversed, &notes), expected);
        assert_eq!(compute_final_score(&rotated, &notes), expected);
        assert_eq!(score_sheet(&reversed, &notes, &HashMap::new()).1, expected);
    }

    #[test]
    fn score_sheet_follows_rubric_order() {
        let registry = RubricRegistry::builtin();
        let rubric = registry.get(RubricVariant::AbsentAppointment);
        let mut comments = HashMap::new();
        comments.insert("sms_appel".to_string(), "  oublié  ".to_string());
        comments.insert("presentation".to_string(), "   ".to_string());

        let (sheet, total) = score_sheet(rubric, &raw(&[("sms_appel", "12")]), &comments);

        assert_eq!(sheet.len(), rubric.criteria.len());
        assert_eq!(sheet[0].criterion_id, "presentation");
        assert_eq!(sheet[0].comment, None);
        let sms = sheet.iter().find(|n| n.criterion_id == "sms_appel").unwrap();
        assert_eq!(sms.note, 10);
        assert_eq!(sms.comment.as_deref(), Some("oublié"));
        assert_eq!(total, 10);
        assert_eq!(rescore(rubric, &sheet), total);
    }

    #[test]
    fn rescore_clamps_stored_notes() {
        let registry = RubricRegistry::builtin();
        let rubric = registry.get(RubricVariant::NewAppointment);
        let notes = vec![
            CriterionNote {
                criterion_id: "presentation".to_string(),
                note: 40,
                comment: None,
            },
            CriterionNote {
                criterion_id: "ghost".to_string(),
                note: 40,
                comment: None,
            },
        ];
        assert_eq!(rescore(rubric, &notes), 5);
    }
}
