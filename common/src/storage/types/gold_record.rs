use serde::{Deserialize, Serialize};

use super::{deserialize_flexible_id, nli_label::NliLabel};

/// One line of the gold set: a claim, the passage judged relevant to it and
/// the entailment relation between the two.
///
/// Records carrying neither `evidence` nor `entailment` are control claims:
/// the knowledge base is expected to hold nothing relevant for them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoldRecord {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub claim: String,
    #[serde(default)]
    pub evidence: Option<String>,
    #[serde(default)]
    pub entailment: Option<NliLabel>,
    /// 1-based line in the source file; zero when not read from disk.
    #[serde(skip)]
    pub line: usize,
}

impl GoldRecord {
    pub fn is_control(&self) -> bool {
        self.evidence.is_none() && self.entailment.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_fields_mark_control_records() {
        let record: GoldRecord = serde_json::from_str(
            r#"{"id":"g9","claim":"The moon is made of cheese.","evidence":null,"entailment":null}"#,
        )
        .unwrap();
        assert!(record.is_control());

        let record: GoldRecord = serde_json::from_str(
            r#"{"id":"g1","claim":"CO2 is rising.","evidence":"s4","entailment":"supports"}"#,
        )
        .unwrap();
        assert!(!record.is_control());
        assert_eq!(record.entailment, Some(NliLabel::Entailment));
    }

    #[test]
    fn unknown_label_fails_deserialization() {
        let parsed = serde_json::from_str::<GoldRecord>(
            r#"{"id":"g1","claim":"x","evidence":"s1","entailment":"MAYBE"}"#,
        );
        assert!(parsed.is_err());
    }
}
