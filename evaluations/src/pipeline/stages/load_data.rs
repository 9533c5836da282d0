use std::time::Instant;

use anyhow::Context;
use common::storage::{
    judgments::RelevanceJudgments,
    jsonl::{file_checksum, load_gold_set, load_passages},
};
use tracing::info;

use super::super::{
    context::{EvalStage, EvaluationContext},
    state::{DataLoaded, EvaluationMachine, Ready},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn load_data(
    machine: EvaluationMachine<(), Ready>,
    ctx: &mut EvaluationContext<'_>,
) -> StageResult<DataLoaded> {
    let stage = EvalStage::LoadData;
    info!(
        evaluation_stage = stage.label(),
        "starting evaluation stage"
    );
    let started = Instant::now();
    ctx.evaluation_start = Some(started);

    let config = ctx.config();
    let records = load_gold_set(&config.gold_set)
        .with_context(|| format!("loading gold set {}", config.gold_set.display()))?;
    let passages = load_passages(&config.passages)
        .with_context(|| format!("loading passages {}", config.passages.display()))?;
    let checksum = file_checksum(&config.gold_set)
        .with_context(|| format!("hashing gold set {}", config.gold_set.display()))?;

    let mut judgments = RelevanceJudgments::build(&records, &passages)
        .context("building relevance judgments from the gold set")?;
    if let Some(limit) = config.limit {
        judgments.truncate(limit);
    }

    info!(
        gold_records = records.len(),
        passages = passages.len(),
        queries = judgments.queries.len(),
        control_claims = judgments.controls.len(),
        nli_triples = judgments.nli_triples.len(),
        entailment_percentage = judgments.analysis.entailment_percentage,
        limit = config.limit.unwrap_or(0),
        "Gold set loaded"
    );

    ctx.passages_total = passages.len();
    ctx.passages = passages;
    ctx.judgments = judgments;
    ctx.gold_checksum = checksum;

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .load_data()
        .map_err(|(_, guard)| map_guard_error("load_data", guard))
}
