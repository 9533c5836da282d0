use std::time::Instant;

use tracing::info;

use crate::runner::retrieval::{self, RetrievalRunSettings};

use super::super::{
    context::{EvalStage, EvaluationContext},
    state::{EvaluationMachine, RetrievalEvaluated, RetrieversReady},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn run_retrieval(
    machine: EvaluationMachine<(), RetrieversReady>,
    ctx: &mut EvaluationContext<'_>,
) -> StageResult<RetrievalEvaluated> {
    let stage = EvalStage::RunRetrieval;
    info!(
        evaluation_stage = stage.label(),
        "starting evaluation stage"
    );
    let started = Instant::now();
    let config = ctx.config();

    if config.mode.runs_retrieval() {
        let settings = RetrievalRunSettings {
            k_list: config.k.clone(),
            top_n: config.top_n,
            concurrency: config.concurrency,
            timeout: config.timeout(),
            sample: config.sample,
        };
        info!(
            queries = ctx.judgments.queries.len(),
            methods = ctx.retrievers.len(),
            k_list = ?settings.k_list,
            max_concurrent_queries = settings.concurrency,
            "Starting retrieval evaluation"
        );
        let outcome = retrieval::run_retrieval(
            &ctx.retrievers,
            &ctx.judgments.queries,
            &ctx.judgments.controls,
            &settings,
        )
        .await;
        ctx.retrieval = Some(outcome);
    }

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .run_retrieval()
        .map_err(|(_, guard)| map_guard_error("run_retrieval", guard))
}
