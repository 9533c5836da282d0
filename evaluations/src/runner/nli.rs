use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    storage::{judgments::NliTriple, types::nli_label::NliLabel},
    utils::nli::{NliClassifier, NliPrediction},
};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::{compute_latency_stats, LatencyStats};

#[derive(Debug, Clone, Copy)]
pub struct NliRunSettings {
    pub concurrency: usize,
    pub timeout: Duration,
}

/// One triple the classifier could not label.
#[derive(Debug, Clone, Serialize)]
pub struct UnavailablePrediction {
    pub triple_id: String,
    pub reason: String,
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabeledPair {
    pub triple_id: String,
    pub gold: NliLabel,
    pub predicted: NliLabel,
    pub confidence: f32,
}

/// Gold/predicted pairs for the triples that produced a prediction, plus the
/// ones that did not. Unavailable predictions never enter the pairs.
#[derive(Debug, Clone, Default)]
pub struct NliOutcome {
    pub attempted: usize,
    pub pairs: Vec<LabeledPair>,
    pub unavailable: Vec<UnavailablePrediction>,
    pub latency_ms: LatencyStats,
}

impl NliOutcome {
    pub fn label_pairs(&self) -> Vec<(NliLabel, NliLabel)> {
        self.pairs
            .iter()
            .map(|pair| (pair.gold, pair.predicted))
            .collect()
    }

    pub fn timeouts(&self) -> usize {
        self.unavailable.iter().filter(|u| u.timed_out).count()
    }
}

enum Attempt {
    Predicted(NliPrediction),
    Failed(String),
    TimedOut,
}

pub async fn run_nli(
    classifier: Arc<dyn NliClassifier>,
    triples: &[NliTriple],
    settings: NliRunSettings,
) -> NliOutcome {
    let concurrency = settings.concurrency.max(1);
    let timeout = settings.timeout;
    info!(
        triples = triples.len(),
        concurrency,
        timeout_ms = timeout.as_millis(),
        "Classifying gold triples"
    );

    let mut attempts: Vec<(usize, Attempt, u128)> = stream::iter(triples.iter().enumerate())
        .map(|(idx, triple)| {
            let classifier = Arc::clone(&classifier);
            async move {
                let started = Instant::now();
                let attempt = match tokio::time::timeout(
                    timeout,
                    classifier.classify(&triple.premise, &triple.claim),
                )
                .await
                {
                    Ok(Ok(prediction)) => Attempt::Predicted(prediction),
                    Ok(Err(err)) => Attempt::Failed(err.to_string()),
                    Err(_) => Attempt::TimedOut,
                };
                (idx, attempt, started.elapsed().as_millis())
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;
    attempts.sort_by_key(|(idx, ..)| *idx);

    let mut outcome = NliOutcome {
        attempted: triples.len(),
        ..NliOutcome::default()
    };
    let mut latencies = Vec::with_capacity(attempts.len());

    for ((_, attempt, latency), triple) in attempts.into_iter().zip(triples) {
        latencies.push(latency);
        match attempt {
            Attempt::Predicted(prediction) => {
                debug!(
                    triple_id = %triple.id,
                    gold = %triple.gold,
                    predicted = %prediction.label,
                    confidence = prediction.confidence,
                    "NLI prediction"
                );
                outcome.pairs.push(LabeledPair {
                    triple_id: triple.id.clone(),
                    gold: triple.gold,
                    predicted: prediction.label,
                    confidence: prediction.confidence,
                });
            }
            Attempt::Failed(reason) => {
                warn!(triple_id = %triple.id, error = %reason, "NLI prediction unavailable");
                outcome.unavailable.push(UnavailablePrediction {
                    triple_id: triple.id.clone(),
                    reason,
                    timed_out: false,
                });
            }
            Attempt::TimedOut => {
                warn!(
                    triple_id = %triple.id,
                    timeout_ms = timeout.as_millis(),
                    "NLI call timed out; prediction unavailable"
                );
                outcome.unavailable.push(UnavailablePrediction {
                    triple_id: triple.id.clone(),
                    reason: format!("timed out after {}ms", timeout.as_millis()),
                    timed_out: true,
                });
            }
        }
    }

    outcome.latency_ms = compute_latency_stats(&latencies);
    info!(
        predicted = outcome.pairs.len(),
        unavailable = outcome.unavailable.len(),
        timeouts = outcome.timeouts(),
        "NLI classification finished"
    );
    outcome
}
