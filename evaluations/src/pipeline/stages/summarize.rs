use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use common::error::AppError;
use tracing::{info, warn};

use crate::{
    metrics::ClassificationReport,
    runner::nli::NliOutcome,
    types::{EmbeddingInfo, EvaluationSummary, NliSummary, RetrievalSummary},
};

use super::super::{
    context::{EvalStage, EvaluationContext},
    state::{EvaluationMachine, NliEvaluated, Summarized},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn summarize(
    machine: EvaluationMachine<(), NliEvaluated>,
    ctx: &mut EvaluationContext<'_>,
) -> StageResult<Summarized> {
    let stage = EvalStage::Summarize;
    info!(
        evaluation_stage = stage.label(),
        "starting evaluation stage"
    );
    let started = Instant::now();
    let config = ctx.config();

    let retrieval = match ctx.retrieval.take() {
        Some(outcome) => {
            let aggregates = outcome
                .accumulator
                .finalize()
                .context("validating retrieval aggregates")?;
            let total_failures = outcome.methods.values().map(|run| run.failures).sum::<usize>();
            Some(RetrievalSummary {
                aggregates,
                methods: outcome.methods,
                total_failures,
            })
        }
        None => None,
    };

    let nli = ctx.nli.take().map(summarize_nli).transpose()?;

    let duration_ms = ctx
        .evaluation_start
        .take()
        .map(|start| start.elapsed().as_millis())
        .unwrap_or_default();

    let embedding = ctx.embedding_provider.as_ref().map(|provider| EmbeddingInfo {
        backend: provider.backend_label().to_string(),
        model: provider.model_code(),
        dimension: provider.dimension(),
        passages_embedded: ctx.passages_embedded,
    });

    let judgments = &ctx.judgments;
    let summary = EvaluationSummary {
        generated_at: Utc::now(),
        run_label: config.label.clone(),
        mode: config.mode.to_string(),
        gold_set_path: config.gold_set.display().to_string(),
        gold_set_checksum: ctx.gold_checksum.clone(),
        passages_path: config.passages.display().to_string(),
        passages_total: ctx.passages_total,
        dataset: judgments.analysis.clone(),
        queries: judgments.queries.len(),
        control_claims: judgments.controls.len(),
        nli_triples: judgments.nli_triples.len(),
        limit: config.limit,
        k_list: config.k.clone(),
        reference_k: config.resolved_reference_k,
        methods: if config.mode.runs_retrieval() {
            config.methods.clone()
        } else {
            Vec::new()
        },
        top_n: config.top_n,
        concurrency: config.concurrency,
        timeout_secs: config.timeout_secs,
        hybrid_candidates: config.hybrid_candidates,
        embedding,
        duration_ms,
        stage_timings: ctx.stage_timings.clone(),
        retrieval,
        nli,
    };
    ctx.summary = Some(summary);

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .summarize()
        .map_err(|(_, guard)| map_guard_error("summarize", guard))
}

/// Scores the available predictions. Zero available predictions leaves the
/// classification report empty and is reported through the counts.
fn summarize_nli(outcome: NliOutcome) -> anyhow::Result<NliSummary> {
    let report = match ClassificationReport::from_pairs(&outcome.label_pairs()) {
        Ok(report) => Some(report),
        Err(AppError::EmptyInput(reason)) => {
            warn!(
                attempted = outcome.attempted,
                unavailable = outcome.unavailable.len(),
                %reason,
                "No NLI predictions available to score"
            );
            None
        }
        Err(err) => {
            return Err(anyhow::Error::from(err).context("computing classification metrics"))
        }
    };

    Ok(NliSummary {
        attempted: outcome.attempted,
        evaluated: outcome.pairs.len(),
        unavailable: outcome.unavailable.len(),
        timeouts: outcome.timeouts(),
        latency_ms: outcome.latency_ms,
        report,
        unavailable_details: outcome.unavailable,
        predictions: outcome.pairs,
    })
}
