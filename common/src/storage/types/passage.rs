use serde::{Deserialize, Deserializer, Serialize};

use super::deserialize_flexible_id;

/// Where a passage was extracted from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassageSource {
    pub document: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawSource {
    Name(String),
    Detailed {
        #[serde(alias = "document_name", alias = "doc")]
        document: String,
        #[serde(default)]
        page: Option<u32>,
    },
}

impl<'de> Deserialize<'de> for PassageSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match RawSource::deserialize(deserializer)? {
            RawSource::Name(document) => PassageSource {
                document,
                page: None,
            },
            RawSource::Detailed { document, page } => PassageSource { document, page },
        })
    }
}

/// A knowledge-base passage as stored in the passages collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PassageSource>,
}

impl Passage {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            embedding: None,
            source: None,
        }
    }

    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn source_label(&self) -> String {
        match &self.source {
            Some(PassageSource {
                document,
                page: Some(page),
            }) => format!("{document} (p. {page})"),
            Some(PassageSource { document, .. }) => document.clone(),
            None => "Unknown source".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_accepts_object_or_plain_name() {
        let detailed: Passage = serde_json::from_str(
            r#"{"id":"s1","text":"CO2 rose.","source":{"document":"AR6 SYR","page":12}}"#,
        )
        .unwrap();
        assert_eq!(detailed.source_label(), "AR6 SYR (p. 12)");

        let plain: Passage =
            serde_json::from_str(r#"{"id":7,"text":"Methane.","source":"AR6 WGIII"}"#).unwrap();
        assert_eq!(plain.id, "7");
        assert_eq!(plain.source_label(), "AR6 WGIII");
        assert!(plain.embedding.is_none());
    }
}
