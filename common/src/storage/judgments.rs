use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::Serialize;

use crate::{
    error::AppError,
    storage::types::{gold_record::GoldRecord, nli_label::NliLabel, passage::Passage},
};

/// A claim with the set of passages judged relevant to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub id: String,
    pub claim: String,
    pub relevant: BTreeSet<String>,
}

/// A claim for which the knowledge base is expected to return nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlClaim {
    pub id: String,
    pub claim: String,
}

/// A gold (claim, evidence, label) triple for the NLI evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NliTriple {
    pub id: String,
    pub claim: String,
    pub evidence_id: String,
    pub premise: String,
    pub gold: NliLabel,
}

/// Counts describing the loaded gold set.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GoldSetAnalysis {
    pub total_entries: usize,
    pub entries_with_entailment: usize,
    pub entailment_percentage: f64,
    pub control_entries: usize,
    pub distribution: BTreeMap<NliLabel, usize>,
}

/// Gold relevance judgments, grouped by claim and validated against the
/// passages collection.
#[derive(Debug, Clone, Default)]
pub struct RelevanceJudgments {
    pub queries: Vec<Query>,
    pub controls: Vec<ControlClaim>,
    pub nli_triples: Vec<NliTriple>,
    pub analysis: GoldSetAnalysis,
}

impl RelevanceJudgments {
    /// Groups records by claim text (trimmed) in first-seen order. Every
    /// evidence id must exist in `passages`.
    pub fn build(records: &[GoldRecord], passages: &[Passage]) -> Result<Self, AppError> {
        let passage_text: HashMap<&str, &str> = passages
            .iter()
            .map(|passage| (passage.id.as_str(), passage.text.as_str()))
            .collect();

        let mut queries: Vec<Query> = Vec::new();
        let mut query_by_claim: HashMap<String, usize> = HashMap::new();
        let mut control_claims: Vec<ControlClaim> = Vec::new();
        let mut nli_triples = Vec::new();
        let mut distribution: BTreeMap<NliLabel, usize> =
            NliLabel::ALL.iter().map(|label| (*label, 0)).collect();

        for record in records {
            let claim = record.claim.trim();

            let Some(evidence) = record.evidence.as_deref() else {
                control_claims.push(ControlClaim {
                    id: record.id.clone(),
                    claim: claim.to_string(),
                });
                continue;
            };

            let premise = passage_text.get(evidence).ok_or_else(|| {
                AppError::NotFound(format!(
                    "evidence passage '{evidence}' referenced by gold record '{}' (line {}) is not in the passages collection",
                    record.id, record.line
                ))
            })?;

            if let Some(&idx) = query_by_claim.get(claim) {
                if let Some(query) = queries.get_mut(idx) {
                    query.relevant.insert(evidence.to_string());
                }
            } else {
                query_by_claim.insert(claim.to_string(), queries.len());
                queries.push(Query {
                    id: record.id.clone(),
                    claim: claim.to_string(),
                    relevant: BTreeSet::from([evidence.to_string()]),
                });
            }

            if let Some(label) = record.entailment {
                *distribution.entry(label).or_default() += 1;
                nli_triples.push(NliTriple {
                    id: record.id.clone(),
                    claim: claim.to_string(),
                    evidence_id: evidence.to_string(),
                    premise: (*premise).to_string(),
                    gold: label,
                });
            }
        }

        // A claim that also appears with evidence is a regular query, not a control.
        let controls: Vec<ControlClaim> = control_claims
            .into_iter()
            .filter(|control| !query_by_claim.contains_key(control.claim.as_str()))
            .collect();

        let total_entries = records.len();
        let entries_with_entailment = nli_triples.len();
        #[allow(clippy::cast_precision_loss)]
        let entailment_percentage = if total_entries == 0 {
            0.0
        } else {
            entries_with_entailment as f64 / total_entries as f64 * 100.0
        };

        Ok(Self {
            analysis: GoldSetAnalysis {
                total_entries,
                entries_with_entailment,
                entailment_percentage,
                control_entries: controls.len(),
                distribution,
            },
            queries,
            controls,
            nli_triples,
        })
    }

    /// Keeps the first `limit` queries, controls and triples.
    pub fn truncate(&mut self, limit: usize) {
        self.queries.truncate(limit);
        self.controls.truncate(limit);
        self.nli_triples.truncate(limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, claim: &str, evidence: Option<&str>, label: Option<NliLabel>) -> GoldRecord {
        GoldRecord {
            id: id.into(),
            claim: claim.into(),
            evidence: evidence.map(Into::into),
            entailment: label,
            line: 0,
        }
    }

    fn passages() -> Vec<Passage> {
        vec![
            Passage::new("s1", "Global CO2 emissions increased."),
            Passage::new("s2", "Methane concentrations rose."),
            Passage::new("s3", "Sea level rise accelerated."),
        ]
    }

    #[test]
    fn records_sharing_a_claim_are_grouped() {
        let records = vec![
            record("g1", "Emissions are rising", Some("s1"), Some(NliLabel::Entailment)),
            record("g2", "Sea levels are falling", Some("s3"), Some(NliLabel::Contradiction)),
            record("g3", " Emissions are rising ", Some("s2"), Some(NliLabel::Neutral)),
        ];

        let judgments = RelevanceJudgments::build(&records, &passages()).unwrap();

        assert_eq!(judgments.queries.len(), 2);
        let first = &judgments.queries[0];
        assert_eq!(first.id, "g1");
        assert_eq!(
            first.relevant,
            BTreeSet::from(["s1".to_string(), "s2".to_string()])
        );
        assert_eq!(judgments.nli_triples.len(), 3);
        assert_eq!(judgments.nli_triples[1].premise, "Sea level rise accelerated.");
        assert_eq!(judgments.analysis.distribution[&NliLabel::Neutral], 1);
    }

    #[test]
    fn control_records_are_kept_apart() {
        let records = vec![
            record("g1", "Emissions are rising", Some("s1"), Some(NliLabel::Entailment)),
            record("g2", "The moon is cheese", None, None),
        ];

        let judgments = RelevanceJudgments::build(&records, &passages()).unwrap();

        assert_eq!(judgments.queries.len(), 1);
        assert_eq!(judgments.controls.len(), 1);
        assert_eq!(judgments.analysis.control_entries, 1);
        assert!((judgments.analysis.entailment_percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn evidence_without_label_counts_for_retrieval_only() {
        let records = vec![record("g1", "Methane", Some("s2"), None)];
        let judgments = RelevanceJudgments::build(&records, &passages()).unwrap();
        assert_eq!(judgments.queries.len(), 1);
        assert!(judgments.nli_triples.is_empty());
    }

    #[test]
    fn unknown_evidence_id_is_fatal_and_names_the_line() {
        let mut missing = record("g2", "x", Some("missing"), Some(NliLabel::Neutral));
        missing.line = 4;
        let records = vec![
            record("g1", "Emissions are rising", Some("s1"), Some(NliLabel::Entailment)),
            missing,
        ];

        match RelevanceJudgments::build(&records, &passages()) {
            Err(AppError::NotFound(message)) => {
                assert!(message.contains("'missing'"));
                assert!(message.contains("line 4"));
            }
            other => panic!("expected not found error, got {other:?}"),
        }
    }
}
