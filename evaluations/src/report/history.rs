use std::{collections::BTreeMap, fs, path::Path};

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::EvaluationSummary;

use super::format_timestamp;

pub(super) const HISTORY_FILE: &str = "evaluations.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct HistoryEntry {
    pub generated_at: String,
    pub run_id: String,
    pub run_label: Option<String>,
    pub mode: String,
    pub gold_set_checksum: String,
    pub queries: usize,
    pub reference_k: usize,
    #[serde(default)]
    pub methods: BTreeMap<String, HistoryMethod>,
    #[serde(default)]
    pub nli_accuracy: Option<f64>,
    #[serde(default)]
    pub nli_macro_f1: Option<f64>,
    #[serde(default)]
    pub nli_unavailable: usize,
    pub duration_ms: u128,
    pub delta: Option<HistoryDelta>,
}

/// Scores of one method at the reference k.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(super) struct HistoryMethod {
    pub recall: f64,
    pub precision: f64,
    pub f1: f64,
    pub mrr: f64,
    pub ndcg: f64,
    pub failures: usize,
    pub latency_avg_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct HistoryDelta {
    pub methods: BTreeMap<String, MethodDelta>,
    pub nli_macro_f1: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub(super) struct MethodDelta {
    pub recall: f64,
    pub precision: f64,
    pub ndcg: f64,
    pub latency_avg_ms: f64,
}

impl HistoryEntry {
    fn from_summary(summary: &EvaluationSummary, run_id: &str) -> Self {
        let methods = summary
            .retrieval
            .as_ref()
            .map(|retrieval| {
                retrieval
                    .methods
                    .values()
                    .filter_map(|run| {
                        retrieval
                            .metrics_at(run.method, summary.reference_k)
                            .map(|cell| {
                                (
                                    run.method.to_string(),
                                    HistoryMethod {
                                        recall: cell.metrics.recall,
                                        precision: cell.metrics.precision,
                                        f1: cell.metrics.f1,
                                        mrr: cell.metrics.mrr,
                                        ndcg: cell.metrics.ndcg,
                                        failures: run.failures,
                                        latency_avg_ms: run.latency_ms.avg,
                                    },
                                )
                            })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let report = summary.nli.as_ref().and_then(|nli| nli.report.as_ref());
        Self {
            generated_at: format_timestamp(&summary.generated_at),
            run_id: run_id.to_string(),
            run_label: summary.run_label.clone(),
            mode: summary.mode.clone(),
            gold_set_checksum: summary.gold_set_checksum.clone(),
            queries: summary.queries,
            reference_k: summary.reference_k,
            methods,
            nli_accuracy: report.map(|report| report.accuracy),
            nli_macro_f1: report.map(|report| report.macro_avg.f1),
            nli_unavailable: summary.nli.as_ref().map_or(0, |nli| nli.unavailable),
            duration_ms: summary.duration_ms,
            delta: None,
        }
    }

    fn delta_from(&self, previous: &HistoryEntry) -> HistoryDelta {
        let methods = self
            .methods
            .iter()
            .filter_map(|(name, current)| {
                previous.methods.get(name).map(|prev| {
                    (
                        name.clone(),
                        MethodDelta {
                            recall: current.recall - prev.recall,
                            precision: current.precision - prev.precision,
                            ndcg: current.ndcg - prev.ndcg,
                            latency_avg_ms: current.latency_avg_ms - prev.latency_avg_ms,
                        },
                    )
                })
            })
            .collect();
        let nli_macro_f1 = self
            .nli_macro_f1
            .zip(previous.nli_macro_f1)
            .map(|(current, prev)| current - prev);
        HistoryDelta {
            methods,
            nli_macro_f1,
        }
    }
}

/// Appends this run to the dataset's history log, with deltas against the
/// previous entry.
pub(super) fn record_history(
    summary: &EvaluationSummary,
    run_id: &str,
    report_dir: &Path,
) -> Result<()> {
    let path = report_dir.join(HISTORY_FILE);
    let mut entries = load_history(&path, report_dir)?;

    let mut entry = HistoryEntry::from_summary(summary, run_id);
    entry.delta = entries.last().map(|previous| entry.delta_from(previous));
    entries.push(entry);

    let blob = serde_json::to_vec_pretty(&entries).context("serialising evaluation log")?;
    fs::write(&path, blob).with_context(|| format!("writing evaluation log {}", path.display()))?;
    Ok(())
}

fn load_history(path: &Path, report_dir: &Path) -> Result<Vec<HistoryEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents =
        fs::read(path).with_context(|| format!("reading evaluation log {}", path.display()))?;
    match serde_json::from_slice(&contents) {
        Ok(entries) => Ok(entries),
        Err(err) => {
            let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
            let backup_path = report_dir.join(format!("{HISTORY_FILE}.corrupted.{timestamp}"));
            warn!(
                path = %path.display(),
                backup = %backup_path.display(),
                error = %err,
                "Evaluation history file is corrupted; backing up and starting fresh"
            );
            if let Err(e) = fs::rename(path, &backup_path) {
                warn!(
                    path = %path.display(),
                    error = %e,
                    "Failed to back up corrupted evaluation history"
                );
            }
            Ok(Vec::new())
        }
    }
}
