use std::{fmt, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::AppError;

/// Three-way entailment label relating a claim to an evidence passage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NliLabel {
    Entailment,
    Contradiction,
    Neutral,
}

impl NliLabel {
    pub const ALL: [NliLabel; 3] = [
        NliLabel::Entailment,
        NliLabel::Contradiction,
        NliLabel::Neutral,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            NliLabel::Entailment => "ENTAILMENT",
            NliLabel::Contradiction => "CONTRADICTION",
            NliLabel::Neutral => "NEUTRAL",
        }
    }

    /// Position of the label in [`NliLabel::ALL`].
    pub const fn index(self) -> usize {
        match self {
            NliLabel::Entailment => 0,
            NliLabel::Contradiction => 1,
            NliLabel::Neutral => 2,
        }
    }
}

impl fmt::Display for NliLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NliLabel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "entailment" | "entail" | "entails" | "supports" | "true" => Ok(Self::Entailment),
            "contradiction" | "contradict" | "contradicts" | "refutes" | "false" => {
                Ok(Self::Contradiction)
            }
            "neutral" | "neither" | "unknown" | "unrelated" => Ok(Self::Neutral),
            _ => Err(AppError::Validation(format!(
                "unrecognized NLI label '{s}'; expected ENTAILMENT, CONTRADICTION or NEUTRAL"
            ))),
        }
    }
}

impl Serialize for NliLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NliLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_synonyms_case_insensitively() {
        assert_eq!("ENTAILMENT".parse::<NliLabel>().unwrap(), NliLabel::Entailment);
        assert_eq!("Supports".parse::<NliLabel>().unwrap(), NliLabel::Entailment);
        assert_eq!(" refutes ".parse::<NliLabel>().unwrap(), NliLabel::Contradiction);
        assert_eq!("neither".parse::<NliLabel>().unwrap(), NliLabel::Neutral);
    }

    #[test]
    fn rejects_unknown_labels() {
        let err = "maybe".parse::<NliLabel>().unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn serde_uses_upper_case_names() {
        let json = serde_json::to_string(&NliLabel::Contradiction).unwrap();
        assert_eq!(json, "\"CONTRADICTION\"");
        let parsed: NliLabel = serde_json::from_str("\"neutral\"").unwrap();
        assert_eq!(parsed, NliLabel::Neutral);
        assert!(serde_json::from_str::<NliLabel>("\"perhaps\"").is_err());
    }
}
