//! Regex concept extraction over climate-science vocabulary.
//!
//! Each concept has a stable key and a case-insensitive pattern that covers
//! its common spellings ("CO2", "CO₂", "carbon dioxide"). Queries and
//! passages are both reduced to the set of concept keys they mention, and the
//! [`ConceptIndex`] maps keys back to passage positions.

use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use common::storage::types::passage::Passage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConceptCategory {
    Emission,
    Mitigation,
    Socioeconomic,
    Impact,
    Threshold,
    Observation,
    Unit,
    Assessment,
    Technology,
    Organisation,
}

pub struct ConceptPattern {
    pub key: &'static str,
    pub category: ConceptCategory,
    pub regex: Regex,
}

const PATTERN_TABLE: &[(&str, ConceptCategory, &str)] = &[
    // Gases and emissions
    ("co2", ConceptCategory::Emission, r"(?i)\b(?:CO₂|CO2\b|carbon\s+dioxide\b)"),
    ("ch4", ConceptCategory::Emission, r"(?i)\b(?:CH4|methane)\b"),
    ("n2o", ConceptCategory::Emission, r"(?i)\b(?:N2O|nitrous\s+oxide)\b"),
    ("ghg", ConceptCategory::Emission, r"(?i)\b(?:GHGs?|greenhouse\s+gas(?:es)?)\b"),
    ("f_gases", ConceptCategory::Emission, r"(?i)\b(?:F-?gases|fluorinated\s+gases)\b"),
    ("hfcs", ConceptCategory::Emission, r"(?i)\b(?:HFCs?|hydrofluorocarbons?)\b"),
    ("sf6", ConceptCategory::Emission, r"(?i)\b(?:SF₆|SF6\b|sul(?:ph|f)ur\s+hexafluoride\b)"),
    ("o3", ConceptCategory::Emission, r"(?i)\b(?:O₃|O3\b|ozone\b)"),
    ("emissions", ConceptCategory::Emission, r"(?i)\bemissions?\b"),
    ("fossil_fuels", ConceptCategory::Emission, r"(?i)\bfossil\s+fuels?\b"),
    ("black_carbon", ConceptCategory::Emission, r"(?i)\b(?:black\s+carbon|soot)\b"),
    ("slcf", ConceptCategory::Emission, r"(?i)\b(?:SLCFs?|short[-\s]?lived\s+climate\s+forcers?)\b"),
    ("aerosols", ConceptCategory::Emission, r"(?i)\baerosols?\b"),
    ("lulucf", ConceptCategory::Emission, r"(?i)\b(?:LULUCF|land[-\s]use,\s+land[-\s]use\s+change\s+and\s+forestry)\b"),
    // Removal and mitigation
    ("cdr", ConceptCategory::Mitigation, r"(?i)\b(?:CDR|carbon\s+dioxide\s+removal)\b"),
    ("beccs", ConceptCategory::Mitigation, r"(?i)\b(?:BECCS|bioenergy\s+with\s+carbon\s+capture\s+and\s+storage)\b"),
    ("daccs", ConceptCategory::Mitigation, r"(?i)\b(?:DACCS|direct\s+air\s+carbon\s+capture\s+and\s+storage)\b"),
    ("ccs", ConceptCategory::Mitigation, r"(?i)\b(?:CCS|carbon\s+capture\s+and\s+storage)\b"),
    ("ccu", ConceptCategory::Mitigation, r"(?i)\b(?:CCU|carbon\s+capture\s+and\s+utili[sz]ation)\b"),
    ("net_zero", ConceptCategory::Mitigation, r"(?i)\bnet[-\s]?zero\b"),
    ("carbon_budget", ConceptCategory::Mitigation, r"(?i)\b(?:remaining\s+)?carbon\s+budgets?\b"),
    ("mitigation", ConceptCategory::Mitigation, r"(?i)\bmitigation(?:\s+pathways?)?\b"),
    ("afforestation", ConceptCategory::Mitigation, r"(?i)\bafforestat(?:ion|e|ed)\b"),
    ("deforestation", ConceptCategory::Mitigation, r"(?i)\bdeforestat(?:ion|e|ed)\b"),
    ("bioenergy", ConceptCategory::Mitigation, r"(?i)\bbioenergy\b"),
    // Scenarios and societal terms
    ("rcp", ConceptCategory::Socioeconomic, r"(?i)\b(?:RCPs?(?:\d\.\d)?|representative\s+concentration\s+pathways?)\b"),
    ("ssp", ConceptCategory::Socioeconomic, r"(?i)\b(?:SSP\d(?:-\d(?:\.\d)?)?|shared\s+socio[-\s]?economic\s+pathways?)\b"),
    ("ndc", ConceptCategory::Socioeconomic, r"(?i)\b(?:NDCs?|nationally\s+determined\s+contributions?)\b"),
    ("sdg", ConceptCategory::Socioeconomic, r"(?i)\b(?:SDGs?|sustainable\s+development\s+goals?)\b"),
    ("ldc", ConceptCategory::Socioeconomic, r"(?i)\b(?:LDCs?|least\s+developed\s+countries)\b"),
    ("sids", ConceptCategory::Socioeconomic, r"(?i)\b(?:SIDS|small\s+island\s+developing\s+states?)\b"),
    ("gdp", ConceptCategory::Socioeconomic, r"(?i)\b(?:GDP|gross\s+domestic\s+product)\b"),
    ("equity", ConceptCategory::Socioeconomic, r"(?i)\b(?:equity|inequality|equality)\b"),
    ("overshoot", ConceptCategory::Socioeconomic, r"(?i)\bovershoot\b"),
    // Impacts and adaptation
    ("adaptation", ConceptCategory::Impact, r"(?i)\badaptation(?:\s+(?:gap|limits?))?\b"),
    ("maladaptation", ConceptCategory::Impact, r"(?i)\bmaladapt(?:ation|ive)\b"),
    ("resilience", ConceptCategory::Impact, r"(?i)\bresilien(?:ce|t)\b"),
    ("vulnerability", ConceptCategory::Impact, r"(?i)\bvulnerab(?:le|ility|ilities)\b"),
    ("residual_risk", ConceptCategory::Impact, r"(?i)\bresidual\s+risks?\b"),
    ("food_security", ConceptCategory::Impact, r"(?i)\bfood\s+(?:in)?security\b"),
    // Temperatures and thresholds
    ("temp_1_5c", ConceptCategory::Threshold, r"(?i)\b1\.5\s*°?C\b"),
    ("temp_2c", ConceptCategory::Threshold, r"(?i)\b2(?:\.0)?\s*°?C\b"),
    ("ecs", ConceptCategory::Threshold, r"(?i)\b(?:ECS|equilibrium\s+climate\s+sensitivity)\b"),
    ("gwl", ConceptCategory::Threshold, r"(?i)\b(?:GWLs?|global\s+warming\s+levels?)\b"),
    // Observed and projected changes
    ("sea_level_rise", ConceptCategory::Observation, r"(?i)\bsea[-\s]level(?:\s+rise)?\b"),
    ("global_warming", ConceptCategory::Observation, r"(?i)\bglobal\s+(?:warming|surface\s+temperature|temperature)\b"),
    ("ice_sheet", ConceptCategory::Observation, r"(?i)\bice\s+sheets?\b"),
    ("glaciers", ConceptCategory::Observation, r"(?i)\bglaciers?\b"),
    ("permafrost", ConceptCategory::Observation, r"(?i)\bpermafrost\b"),
    ("precipitation", ConceptCategory::Observation, r"(?i)\bprecipitation\b"),
    ("heatwaves", ConceptCategory::Observation, r"(?i)\bheat\s*waves?\b"),
    ("drought", ConceptCategory::Observation, r"(?i)\bdroughts?\b"),
    ("extreme_events", ConceptCategory::Observation, r"(?i)\bextreme\s+(?:weather|events?|temperatures?|heat)\b"),
    ("ocean_acidification", ConceptCategory::Observation, r"(?i)\bocean\s+acidification\b"),
    ("radiative_forcing", ConceptCategory::Observation, r"(?i)\bradiative\s+forcing\b"),
    // Units
    ("ppm", ConceptCategory::Unit, r"(?i)\bppm\b"),
    ("gigatonnes", ConceptCategory::Unit, r"(?i)\b(?:Gt|gigatonnes?)\b"),
    ("gwp100", ConceptCategory::Unit, r"(?i)\b(?:GWP100|100[-\s]?year\s+global\s+warming\s+potential)\b"),
    // Reports and models
    ("ar6", ConceptCategory::Assessment, r"(?i)\b(?:AR6|sixth\s+assessment\s+report)\b"),
    ("ar5", ConceptCategory::Assessment, r"(?i)\b(?:AR5|fifth\s+assessment\s+report)\b"),
    ("sr1_5", ConceptCategory::Assessment, r"(?i)\b(?:SR1\.5|SR15|special\s+report\s+on\s+global\s+warming\s+of\s+1\.5\s*°?C)\b"),
    ("cmip6", ConceptCategory::Assessment, r"(?i)\b(?:CMIP6|coupled\s+model\s+intercomparison\s+project\s+phase\s*6)\b"),
    // Technology
    ("ev", ConceptCategory::Technology, r"(?i)\b(?:EVs?|electric\s+vehicles?)\b"),
    ("pv", ConceptCategory::Technology, r"(?i)\b(?:PV|photovoltaics?|solar\s+power)\b"),
    ("wind_power", ConceptCategory::Technology, r"(?i)\bwind\s+(?:power|energy|turbines?)\b"),
    ("renewables", ConceptCategory::Technology, r"(?i)\brenewables?(?:\s+energy)?\b"),
    // Organisations
    ("ipcc", ConceptCategory::Organisation, r"(?i)\b(?:IPCC|intergovernmental\s+panel\s+on\s+climate\s+change)\b"),
    ("unfccc", ConceptCategory::Organisation, r"(?i)\b(?:UNFCCC|united\s+nations\s+framework\s+convention\s+on\s+climate\s+change)\b"),
    ("iea", ConceptCategory::Organisation, r"(?i)\b(?:IEA|international\s+energy\s+agency)\b"),
    ("paris_agreement", ConceptCategory::Organisation, r"(?i)\bparis\s+agreement\b"),
];

static PATTERNS: Lazy<Vec<ConceptPattern>> = Lazy::new(|| {
    PATTERN_TABLE
        .iter()
        .filter_map(|&(key, category, pattern)| match Regex::new(pattern) {
            Ok(regex) => Some(ConceptPattern {
                key,
                category,
                regex,
            }),
            Err(err) => {
                tracing::error!(concept = key, error = %err, "Invalid concept pattern skipped");
                None
            }
        })
        .collect()
});

pub fn patterns() -> &'static [ConceptPattern] {
    &PATTERNS
}

/// Concept keys mentioned in `text`, in key order.
pub fn extract_concepts(text: &str) -> BTreeSet<&'static str> {
    PATTERNS
        .iter()
        .filter(|pattern| pattern.regex.is_match(text))
        .map(|pattern| pattern.key)
        .collect()
}

/// Inverted index from concept key to the positions of passages mentioning it.
#[derive(Debug, Clone, Default)]
pub struct ConceptIndex {
    postings: BTreeMap<&'static str, Vec<usize>>,
}

impl ConceptIndex {
    pub fn build(passages: &[Passage]) -> Self {
        let mut postings: BTreeMap<&'static str, Vec<usize>> = BTreeMap::new();
        for (position, passage) in passages.iter().enumerate() {
            for key in extract_concepts(&passage.text) {
                postings.entry(key).or_default().push(position);
            }
        }
        Self { postings }
    }

    pub fn postings(&self, key: &str) -> &[usize] {
        self.postings.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn concept_count(&self) -> usize {
        self.postings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_compiles() {
        assert_eq!(patterns().len(), PATTERN_TABLE.len());
    }

    #[test]
    fn extracts_spelling_variants() {
        let concepts = extract_concepts("Atmospheric CO₂ and methane drive greenhouse gas forcing.");
        assert!(concepts.contains("co2"));
        assert!(concepts.contains("ch4"));
        assert!(concepts.contains("ghg"));

        let concepts = extract_concepts("Limiting warming to 1.5°C requires net zero carbon dioxide.");
        assert!(concepts.contains("temp_1_5c"));
        assert!(concepts.contains("net_zero"));
        assert!(concepts.contains("co2"));
    }

    #[test]
    fn unrelated_text_has_no_concepts() {
        assert!(extract_concepts("The cat sat on the mat.").is_empty());
    }

    #[test]
    fn index_keeps_collection_order() {
        let passages = vec![
            Passage::new("s1", "Methane leaks from pipelines."),
            Passage::new("s2", "Sea level rise threatens coasts."),
            Passage::new("s3", "CH4 has a short lifetime."),
        ];
        let index = ConceptIndex::build(&passages);
        assert_eq!(index.postings("ch4"), &[0, 2]);
        assert_eq!(index.postings("sea_level_rise"), &[1]);
        assert!(index.postings("ccs").is_empty());
    }
}
