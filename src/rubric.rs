use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// The two evaluation forms. Each one is scored against its own rubric and
/// persisted in its own table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum RubricVariant {
    #[value(name = "new")]
    NewAppointment,
    #[value(name = "absent")]
    AbsentAppointment,
}

impl RubricVariant {
    pub const ALL: [RubricVariant; 2] = [
        RubricVariant::NewAppointment,
        RubricVariant::AbsentAppointment,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            RubricVariant::NewAppointment => "evaluations_new_appointment",
            RubricVariant::AbsentAppointment => "evaluations_absent_appointment",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RubricVariant::NewAppointment => "Nouveau RDV",
            RubricVariant::AbsentAppointment => "Absent RDV",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" | "new_appointment" | "nouveau_rdv" => Some(RubricVariant::NewAppointment),
            "absent" | "absent_appointment" | "absent_rdv" => {
                Some(RubricVariant::AbsentAppointment)
            }
            _ => None,
        }
    }
}

impl fmt::Display for RubricVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criterion {
    pub id: String,
    pub label: String,
    pub max_points: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rubric {
    pub variant: RubricVariant,
    pub criteria: Vec<Criterion>,
}

impl Rubric {
    pub fn max_total(&self) -> i32 {
        self.criteria.iter().map(|c| c.max_points).sum()
    }

    pub fn criterion(&self, id: &str) -> Option<&Criterion> {
        self.criteria.iter().find(|c| c.id == id)
    }
}

/// Rubrics keyed by variant. Every screen, the store and the statistics
/// read criteria from here.
#[derive(Debug, Clone)]
pub struct RubricRegistry {
    rubrics: HashMap<RubricVariant, Rubric>,
}

impl RubricRegistry {
    pub fn builtin() -> Self {
        let mut rubrics = HashMap::new();
        rubrics.insert(
            RubricVariant::NewAppointment,
            Rubric {
                variant: RubricVariant::NewAppointment,
                criteria: table(NEW_APPOINTMENT),
            },
        );
        rubrics.insert(
            RubricVariant::AbsentAppointment,
            Rubric {
                variant: RubricVariant::AbsentAppointment,
                criteria: table(ABSENT_APPOINTMENT),
            },
        );
        Self { rubrics }
    }

    /// Loads a registry from a JSON object mapping variant to criteria:
    /// ```json
    /// {
    ///   "new_appointment": [{ "id": "presentation", "label": "Se présenter", "max_points": 5 }],
    ///   "absent_appointment": [...]
    /// }
    /// ```
    /// A variant missing from the file keeps its built-in rubric.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read rubric file {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("failed to parse rubric file {}", path.display()))
    }

    pub fn from_json(content: &str) -> anyhow::Result<Self> {
        let entries: HashMap<RubricVariant, Vec<Criterion>> = serde_json::from_str(content)?;
        let mut registry = Self::builtin();

        for (variant, criteria) in entries {
            if criteria.is_empty() {
                anyhow::bail!("rubric {variant} has no criteria");
            }
            if let Some(bad) = criteria.iter().find(|c| c.max_points <= 0) {
                anyhow::bail!(
                    "criterion {} of rubric {variant} must have positive max points",
                    bad.id
                );
            }
            let mut seen = std::collections::HashSet::new();
            if let Some(dup) = criteria.iter().find(|c| !seen.insert(c.id.as_str())) {
                anyhow::bail!("criterion {} appears twice in rubric {variant}", dup.id);
            }
            registry.rubrics.insert(variant, Rubric { variant, criteria });
        }

        Ok(registry)
    }

    pub fn get(&self, variant: RubricVariant) -> &Rubric {
        // Both variants are always present: builtin() seeds them and from_json only replaces.
        &self.rubrics[&variant]
    }
}

fn table(rows: &[(&str, &str, i32)]) -> Vec<Criterion> {
    rows.iter()
        .map(|(id, label, max_points)| Criterion {
            id: (*id).to_string(),
            label: (*label).to_string(),
            max_points: *max_points,
        })
        .collect()
}

const NEW_APPOINTMENT: &[(&str, &str, i32)] = &[
    ("presentation", "Se présenter", 5),
    ("identite_client", "Confirmer l'identité du client", 5),
    ("besoin_client", "Comprendre le besoin client", 5),
    ("etapes", "Décrire les étapes sans détails", 10),
    ("localisation", "Vérifier la localisation", 5),
    ("fixer_rdv", "Fixer un RDV", 5),
    ("sms_appel", "Envoyer un SMS pendant l'appel", 10),
    ("documents_recap", "Rappeler les documents et le récapitulatif", 5),
    ("appel_confirmation", "Informer sur l'appel de confirmation", 5),
    ("reception_sms", "Vérifier la réception du SMS", 10),
    ("ton_voix", "Le ton de la voix", 7),
    ("ecoute_active", "Écoute active", 7),
    ("reponse_questions", "Répondre aux questions", 7),
    ("intelligence_emotionnelle", "Intelligence émotionnelle", 7),
    ("adaptation_client", "S'adapter au niveau du client", 7),
];

const ABSENT_APPOINTMENT: &[(&str, &str, i32)] = &[
    ("presentation", "Se présenter", 5),
    ("identite_client", "Confirmer l'identité du client", 5),
    ("mention_rdv_avant", "Mentionner qu'il avait un RDV avant", 10),
    ("proposer_autre_rdv", "Proposer un autre RDV", 10),
    (
        "importance_presence",
        "Lui faire comprendre l'importance de sa présence",
        10,
    ),
    ("sms_appel", "Envoyer un SMS pendant l'appel", 10),
    ("recapitulatif_documents", "Récapitulatif + document", 5),
    ("reception_sms", "Vérifier la réception du SMS", 10),
    ("ton_voix", "Le ton de la voix", 7),
    ("ecoute_active", "Écoute active", 7),
    ("reponse_questions", "Répondre aux questions", 7),
    ("intelligence_emotionnelle", "Intelligence émotionnelle", 7),
    ("adaptation_client", "S'adapter au niveau du client", 7),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_totals_match_forms() {
        let registry = RubricRegistry::builtin();
        assert_eq!(registry.get(RubricVariant::NewAppointment).max_total(), 100);
        assert_eq!(registry.get(RubricVariant::AbsentAppointment).max_total(), 100);
        assert_eq!(registry.get(RubricVariant::NewAppointment).criteria.len(), 15);
        assert_eq!(registry.get(RubricVariant::AbsentAppointment).criteria.len(), 13);
    }

    #[test]
    fn json_overrides_one_variant_only() {
        let registry = RubricRegistry::from_json(
            r#"{"absent_appointment": [{"id": "presentation", "label": "Intro", "max_points": 4}]}"#,
        )
        .unwrap();
        let absent = registry.get(RubricVariant::AbsentAppointment);
        assert_eq!(absent.max_total(), 4);
        assert_eq!(absent.criterion("presentation").unwrap().label, "Intro");
        assert_eq!(registry.get(RubricVariant::NewAppointment).max_total(), 100);
    }

    #[test]
    fn json_rejects_duplicate_and_empty_criteria() {
        assert!(RubricRegistry::from_json(r#"{"new_appointment": []}"#).is_err());
        assert!(RubricRegistry::from_json(
            r#"{"new_appointment": [
                {"id": "a", "label": "A", "max_points": 5},
                {"id": "a", "label": "B", "max_points": 5}
            ]}"#
        )
        .is_err());
        assert!(RubricRegistry::from_json(
            r#"{"new_appointment": [{"id": "a", "label": "A", "max_points": 0}]}"#
        )
        .is_err());
    }

    #[test]
    fn variant_parses_legacy_names() {
        assert_eq!(RubricVariant::parse("nouveau_rdv"), Some(RubricVariant::NewAppointment));
        assert_eq!(RubricVariant::parse(" Absent "), Some(RubricVariant::AbsentAppointment));
        assert_eq!(RubricVariant::parse("other"), None);
    }
}
