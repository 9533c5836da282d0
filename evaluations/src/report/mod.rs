mod comparison;
mod history;
mod markdown;
mod recommendations;

use std::{
    collections::BTreeMap,
    fs::{self, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use common::storage::judgments::GoldSetAnalysis;
use retrieval_pipeline::RetrievalMethod;
use serde::Serialize;

use crate::{
    metrics::{ClassificationReport, LatencyStats, RankingMetric},
    runner::{
        nli::UnavailablePrediction,
        retrieval::{AggregateMetrics, ControlOutcome, MissSample},
    },
    types::{EmbeddingInfo, EvaluationStageTimings, EvaluationSummary},
};

pub use comparison::MethodComparison;

use self::{
    history::{record_history, HISTORY_FILE},
    markdown::render_markdown,
    recommendations::{recommend, RuleInput},
};

const SNAPSHOT_PREFIX: &str = "climate_eval";
/// Suffix attempts when a snapshot for the same second already exists.
const MAX_SNAPSHOT_ATTEMPTS: usize = 100;

#[derive(Debug, Clone)]
pub struct ReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

#[derive(Debug)]
pub struct ReportOutcome {
    pub run_id: String,
    pub paths: ReportPaths,
    pub history_path: PathBuf,
    pub report: EvaluationReport,
}

#[derive(Debug, Serialize)]
pub struct EvaluationReport {
    pub overview: OverviewSection,
    pub dataset: DatasetSection,
    pub settings: SettingsSection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retrieval: Option<RetrievalSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<MethodComparison>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nli: Option<NliSection>,
    pub recommendations: Vec<String>,
    pub stage_timings: EvaluationStageTimings,
}

#[derive(Debug, Serialize)]
pub struct OverviewSection {
    pub run_id: String,
    pub generated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
    pub mode: String,
    pub duration_ms: u128,
}

#[derive(Debug, Serialize)]
pub struct DatasetSection {
    pub gold_set_path: String,
    pub gold_set_checksum: String,
    pub passages_path: String,
    pub passages_total: usize,
    pub queries: usize,
    pub control_claims: usize,
    pub nli_triples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
    pub analysis: GoldSetAnalysis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingInfo>,
}

#[derive(Debug, Serialize)]
pub struct SettingsSection {
    pub k_list: Vec<usize>,
    pub reference_k: usize,
    pub methods: Vec<RetrievalMethod>,
    pub top_n: usize,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub hybrid_candidates: usize,
}

#[derive(Debug, Serialize)]
pub struct RetrievalSection {
    pub total_failures: usize,
    pub methods: Vec<MethodSection>,
}

#[derive(Debug, Serialize)]
pub struct MethodSection {
    pub method: RetrievalMethod,
    pub queries: usize,
    pub failures: usize,
    pub latency_ms: LatencyStats,
    pub controls: ControlOutcome,
    pub control_pass_rate: Option<f64>,
    /// Aggregate metrics keyed by k.
    pub metrics: BTreeMap<usize, AggregateMetrics>,
    pub miss_count: usize,
    pub misses: Vec<MissSample>,
}

#[derive(Debug, Serialize)]
pub struct NliSection {
    pub attempted: usize,
    pub evaluated: usize,
    pub unavailable: usize,
    pub timeouts: usize,
    pub latency_ms: LatencyStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ClassificationReport>,
    pub unavailable_sample: Vec<UnavailablePrediction>,
}

impl EvaluationReport {
    pub fn from_summary(summary: &EvaluationSummary, run_id: &str, sample: usize) -> Self {
        let overview = OverviewSection {
            run_id: run_id.to_string(),
            generated_at: format_timestamp(&summary.generated_at),
            run_label: summary.run_label.clone(),
            mode: summary.mode.clone(),
            duration_ms: summary.duration_ms,
        };

        let dataset = DatasetSection {
            gold_set_path: summary.gold_set_path.clone(),
            gold_set_checksum: summary.gold_set_checksum.clone(),
            passages_path: summary.passages_path.clone(),
            passages_total: summary.passages_total,
            queries: summary.queries,
            control_claims: summary.control_claims,
            nli_triples: summary.nli_triples,
            limit: summary.limit,
            analysis: summary.dataset.clone(),
            embedding: summary.embedding.clone(),
        };

        let settings = SettingsSection {
            k_list: summary.k_list.clone(),
            reference_k: summary.reference_k,
            methods: summary.methods.clone(),
            top_n: summary.top_n,
            concurrency: summary.concurrency,
            timeout_secs: summary.timeout_secs,
            hybrid_candidates: summary.hybrid_candidates,
        };

        let retrieval = summary.retrieval.as_ref().map(|retrieval| RetrievalSection {
            total_failures: retrieval.total_failures,
            methods: retrieval
                .methods
                .values()
                .map(|run| MethodSection {
                    method: run.method,
                    queries: run.queries,
                    failures: run.failures,
                    latency_ms: run.latency_ms,
                    controls: run.controls.clone(),
                    control_pass_rate: run.controls.pass_rate(),
                    metrics: retrieval
                        .aggregates
                        .get(&run.method)
                        .cloned()
                        .unwrap_or_default(),
                    miss_count: run.miss_count,
                    misses: run.misses.iter().take(sample).cloned().collect(),
                })
                .collect(),
        });

        let comparison = summary
            .retrieval
            .as_ref()
            .filter(|retrieval| !retrieval.aggregates.is_empty())
            .map(|retrieval| {
                MethodComparison::build(
                    &retrieval.aggregates,
                    &summary.k_list,
                    summary.reference_k,
                )
            });

        let recommendations = recommend(&RuleInput {
            reference_k: summary.reference_k,
            comparison: comparison.as_ref(),
            retrieval: summary.retrieval.as_ref(),
            nli: summary.nli.as_ref(),
        });

        let nli = summary.nli.as_ref().map(|nli| NliSection {
            attempted: nli.attempted,
            evaluated: nli.evaluated,
            unavailable: nli.unavailable,
            timeouts: nli.timeouts,
            latency_ms: nli.latency_ms,
            report: nli.report.clone(),
            unavailable_sample: nli.unavailable_details.iter().take(sample).cloned().collect(),
        });

        Self {
            overview,
            dataset,
            settings,
            retrieval,
            comparison,
            nli,
            recommendations,
            stage_timings: summary.stage_timings.clone(),
        }
    }
}

/// Writes the immutable snapshot pair, refreshes the `latest` mirrors and
/// appends the run to the dataset history.
pub fn write_reports(
    summary: &EvaluationSummary,
    report_dir: &Path,
    sample: usize,
) -> Result<ReportOutcome> {
    fs::create_dir_all(report_dir)
        .with_context(|| format!("creating report directory {}", report_dir.display()))?;
    let dataset_dir = dataset_report_dir(report_dir, &summary.gold_set_path);
    fs::create_dir_all(&dataset_dir).with_context(|| {
        format!(
            "creating dataset report directory {}",
            dataset_dir.display()
        )
    })?;

    let (run_id, json_file, json_path) = create_snapshot(&dataset_dir, &build_report_stem(summary))?;
    let report = EvaluationReport::from_summary(summary, &run_id, sample);

    let json_blob = serde_json::to_string_pretty(&report).context("serialising JSON report")?;
    write_all(json_file, &json_path, json_blob.as_bytes())?;

    let md_path = dataset_dir.join(format!("{run_id}.md"));
    let markdown = render_markdown(&report);
    let md_file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&md_path)
        .with_context(|| format!("creating Markdown report {}", md_path.display()))?;
    write_all(md_file, &md_path, markdown.as_bytes())?;

    let latest_json = dataset_dir.join("latest.json");
    fs::write(&latest_json, json_blob)
        .with_context(|| format!("writing latest JSON report to {}", latest_json.display()))?;
    let latest_md = dataset_dir.join("latest.md");
    fs::write(&latest_md, markdown)
        .with_context(|| format!("writing latest Markdown report to {}", latest_md.display()))?;

    record_history(summary, &run_id, &dataset_dir)?;

    Ok(ReportOutcome {
        run_id,
        paths: ReportPaths {
            json: json_path,
            markdown: md_path,
        },
        history_path: dataset_dir.join(HISTORY_FILE),
        report,
    })
}

/// Reserves a snapshot file that did not exist before. A collision within
/// the same second gets a numeric suffix instead of overwriting.
fn create_snapshot(dir: &Path, base: &str) -> Result<(String, fs::File, PathBuf)> {
    for attempt in 0..MAX_SNAPSHOT_ATTEMPTS {
        let stem = if attempt == 0 {
            base.to_string()
        } else {
            format!("{base}_{attempt}")
        };
        let path = dir.join(format!("{stem}.json"));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((stem, file, path)),
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("creating JSON report {}", path.display())))
            }
        }
    }
    anyhow::bail!(
        "could not reserve a report snapshot for {base} in {}",
        dir.display()
    )
}

fn write_all(mut file: fs::File, path: &Path, contents: &[u8]) -> Result<()> {
    file.write_all(contents)
        .and_then(|()| file.flush())
        .with_context(|| format!("writing report to {}", path.display()))
}

fn build_report_stem(summary: &EvaluationSummary) -> String {
    let timestamp = summary.generated_at.format("%Y%m%dT%H%M%S");
    format!(
        "{SNAPSHOT_PREFIX}_{timestamp}_{}",
        sanitize_component(&summary.mode)
    )
}

fn sanitize_component(input: &str) -> String {
    input
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() { ch } else { '_' })
        .collect()
}

/// Reports for one gold set live under a directory named after its file stem.
pub fn dataset_report_dir(report_dir: &Path, gold_set_path: &str) -> PathBuf {
    let stem = Path::new(gold_set_path)
        .file_stem()
        .and_then(|stem| stem.to_str())
        .filter(|stem| !stem.is_empty())
        .unwrap_or("gold_set");
    report_dir.join(sanitize_component(stem))
}

pub(crate) fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Console view of the report, grouped by method and then by k.
pub fn render_console_summary(report: &EvaluationReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Evaluation {} ({} mode, {} ms)\n",
        report.overview.run_id, report.overview.mode, report.overview.duration_ms
    ));

    if let Some(retrieval) = report.retrieval.as_ref() {
        out.push_str(&format!(
            "\nRetrieval ({} queries, reference k={})\n",
            report.dataset.queries, report.settings.reference_k
        ));
        for method in &retrieval.methods {
            out.push_str(&format!(
                "  {}: {} failures, latency avg {:.1} ms (p50 {} / p95 {})",
                method.method,
                method.failures,
                method.latency_ms.avg,
                method.latency_ms.p50,
                method.latency_ms.p95
            ));
            if let Some(rate) = method.control_pass_rate {
                out.push_str(&format!(", control pass rate {:.1}%", rate * 100.0));
            }
            out.push('\n');
            for (k, cell) in &method.metrics {
                out.push_str(&format!("    k={k:<3}"));
                for metric in RankingMetric::ALL {
                    out.push_str(&format!(
                        " {} {:.3}",
                        metric.label(),
                        metric.value(&cell.metrics)
                    ));
                }
                out.push('\n');
            }
        }
    }

    if let Some(comparison) = report.comparison.as_ref() {
        out.push_str(&format!(
            "\nMethod ranking at k={}\n",
            comparison.reference_k
        ));
        for ranking in &comparison.rankings {
            let order = ranking
                .ranked
                .iter()
                .map(|entry| format!("{} ({:.3})", entry.method, entry.score))
                .collect::<Vec<_>>()
                .join(" > ");
            out.push_str(&format!("  {}: {order}\n", ranking.metric.label()));
        }
    }

    if let Some(nli) = report.nli.as_ref() {
        out.push_str(&format!(
            "\nNLI ({} evaluated, {} unavailable)\n",
            nli.evaluated, nli.unavailable
        ));
        if let Some(classification) = nli.report.as_ref() {
            out.push_str(&format!(
                "  accuracy {:.3}, macro F1 {:.3}, micro F1 {:.3}\n",
                classification.accuracy, classification.macro_avg.f1, classification.micro_avg.f1
            ));
            for (label, class) in &classification.per_class {
                out.push_str(&format!(
                    "  {label:<13} P {:.3} R {:.3} F1 {:.3} (support {})\n",
                    class.precision, class.recall, class.f1, class.support
                ));
            }
        }
    }

    if !report.recommendations.is_empty() {
        out.push_str("\nRecommendations\n");
        for recommendation in &report.recommendations {
            out.push_str(&format!("  - {recommendation}\n"));
        }
    }

    out
}
