use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, warn};

use crate::{error::AppError, storage::types::nli_label::NliLabel};

/// Predicted label with the classifier's confidence in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NliPrediction {
    pub label: NliLabel,
    pub confidence: f32,
}

/// Natural-language-inference collaborator: premise is the evidence text,
/// hypothesis is the claim.
#[async_trait]
pub trait NliClassifier: Send + Sync {
    async fn classify(&self, premise: &str, hypothesis: &str) -> Result<NliPrediction, AppError>;
}

/// Classifier backed by a hosted sequence-classification endpoint.
#[derive(Debug, Clone)]
pub struct HttpNliClassifier {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_retries: usize,
}

struct AttemptError {
    error: AppError,
    transient: bool,
}

impl AttemptError {
    fn fatal(error: AppError) -> Self {
        Self {
            error,
            transient: false,
        }
    }
}

impl HttpNliClassifier {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
        max_retries: usize,
    ) -> Result<Self, AppError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            max_retries,
        })
    }

    async fn classify_once(&self, payload: &Value) -> Result<NliPrediction, AttemptError> {
        let mut request = self.client.post(&self.endpoint).json(payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| AttemptError {
            transient: err.is_timeout() || err.is_connect(),
            error: AppError::Reqwest(err),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AttemptError {
                transient: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
                error: AppError::Nli(format!("endpoint returned {status}: {body}")),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|err| AttemptError::fatal(AppError::Reqwest(err)))?;
        parse_response(&body).map_err(AttemptError::fatal)
    }
}

#[async_trait]
impl NliClassifier for HttpNliClassifier {
    async fn classify(&self, premise: &str, hypothesis: &str) -> Result<NliPrediction, AppError> {
        if premise.trim().is_empty() || hypothesis.trim().is_empty() {
            return Err(AppError::Nli(
                "premise and hypothesis must both be non-empty".into(),
            ));
        }

        let payload = request_payload(premise, hypothesis);
        let strategy = ExponentialBackoff::from_millis(100)
            .map(jitter)
            .take(self.max_retries);

        let prediction = RetryIf::spawn(
            strategy,
            || self.classify_once(&payload),
            |err: &AttemptError| {
                if err.transient {
                    warn!(error = %err.error, "Transient NLI endpoint failure; retrying");
                }
                err.transient
            },
        )
        .await
        .map_err(|err| err.error)?;

        debug!(
            label = %prediction.label,
            confidence = prediction.confidence,
            "NLI prediction received"
        );
        Ok(prediction)
    }
}

fn request_payload(premise: &str, hypothesis: &str) -> Value {
    json!({
        "inputs": format!("[CLS] {premise} [SEP] {hypothesis} [SEP]"),
        "parameters": {},
        "options": { "use_cache": false, "wait_for_model": true }
    })
}

/// Accepts `[{label, score}, ..]`, `[[{label, score}, ..]]` or `{label, score}`
/// and returns the highest-scoring entry.
pub fn parse_response(body: &Value) -> Result<NliPrediction, AppError> {
    let candidates: Vec<&Value> = match body {
        Value::Array(items) => match items.first() {
            Some(Value::Array(inner)) => inner.iter().collect(),
            _ => items.iter().collect(),
        },
        Value::Object(_) => vec![body],
        other => {
            return Err(AppError::Nli(format!(
                "unexpected NLI response shape: {other}"
            )))
        }
    };

    let mut best: Option<NliPrediction> = None;
    for candidate in candidates {
        let label = candidate
            .get("label")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Nli(format!("NLI response entry without label: {candidate}")))?
            .parse::<NliLabel>()?;
        #[allow(clippy::cast_possible_truncation)]
        let confidence = candidate
            .get("score")
            .and_then(Value::as_f64)
            .map_or(0.0, |score| score.clamp(0.0, 1.0) as f32);

        if best.map_or(true, |current| confidence > current.confidence) {
            best = Some(NliPrediction { label, confidence });
        }
    }

    best.ok_or_else(|| AppError::Nli("NLI response contained no predictions".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flat_list_and_picks_highest_score() {
        let body = json!([
            {"label": "NEUTRAL", "score": 0.2},
            {"label": "CONTRADICTION", "score": 0.7},
            {"label": "ENTAILMENT", "score": 0.1}
        ]);
        let prediction = parse_response(&body).unwrap();
        assert_eq!(prediction.label, NliLabel::Contradiction);
        assert!((prediction.confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn parses_nested_list_and_single_object() {
        let nested = json!([[{"label": "entailment", "score": 0.9}]]);
        assert_eq!(parse_response(&nested).unwrap().label, NliLabel::Entailment);

        let single = json!({"label": "Neutral", "score": 1.4});
        let prediction = parse_response(&single).unwrap();
        assert_eq!(prediction.label, NliLabel::Neutral);
        assert!((prediction.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn rejects_unknown_labels_and_empty_bodies() {
        assert!(parse_response(&json!([{"label": "LABEL_3", "score": 0.9}])).is_err());
        assert!(parse_response(&json!([])).is_err());
        assert!(parse_response(&json!("ENTAILMENT")).is_err());
    }

    #[test]
    fn payload_wraps_premise_and_hypothesis() {
        let payload = request_payload("Evidence text.", "A claim.");
        assert_eq!(
            payload["inputs"],
            "[CLS] Evidence text. [SEP] A claim. [SEP]"
        );
        assert_eq!(payload["options"]["wait_for_model"], true);
    }

    #[tokio::test]
    async fn empty_premise_is_an_error_not_neutral() {
        let classifier =
            HttpNliClassifier::new("http://127.0.0.1:9", None, Duration::from_secs(1), 0)
                .unwrap();
        assert!(matches!(
            classifier.classify("   ", "claim").await,
            Err(AppError::Nli(_))
        ));
    }
}
