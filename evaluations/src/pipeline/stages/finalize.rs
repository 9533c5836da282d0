use std::time::Instant;

use tracing::info;

use super::super::{
    context::{EvalStage, EvaluationContext},
    state::{Completed, EvaluationMachine, Summarized},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn finalize(
    machine: EvaluationMachine<(), Summarized>,
    ctx: &mut EvaluationContext<'_>,
) -> StageResult<Completed> {
    let stage = EvalStage::Finalize;
    info!(
        evaluation_stage = stage.label(),
        "starting evaluation stage"
    );
    let started = Instant::now();

    let summary = ctx.summary.as_ref();
    info!(
        queries = summary.map_or(0, |s| s.queries),
        retrieval_failures = summary
            .and_then(|s| s.retrieval.as_ref())
            .map_or(0, |r| r.total_failures),
        nli_evaluated = summary
            .and_then(|s| s.nli.as_ref())
            .map_or(0, |n| n.evaluated),
        nli_unavailable = summary
            .and_then(|s| s.nli.as_ref())
            .map_or(0, |n| n.unavailable),
        duration_ms = summary.map_or(0, |s| s.duration_ms),
        "Evaluation complete"
    );

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    if let Some(summary) = ctx.summary.as_mut() {
        summary.stage_timings = ctx.stage_timings.clone();
    }
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .finalize()
        .map_err(|(_, guard)| map_guard_error("finalize", guard))
}
