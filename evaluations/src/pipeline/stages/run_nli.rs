use std::{sync::Arc, time::Instant};

use anyhow::{anyhow, Context};
use common::utils::nli::{HttpNliClassifier, NliClassifier};
use tracing::{info, warn};

use crate::runner::nli::{self, NliOutcome, NliRunSettings};

use super::super::{
    context::{EvalStage, EvaluationContext},
    state::{EvaluationMachine, NliEvaluated, RetrievalEvaluated},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn run_nli(
    machine: EvaluationMachine<(), RetrievalEvaluated>,
    ctx: &mut EvaluationContext<'_>,
) -> StageResult<NliEvaluated> {
    let stage = EvalStage::RunNli;
    info!(
        evaluation_stage = stage.label(),
        "starting evaluation stage"
    );
    let started = Instant::now();
    let config = ctx.config();

    if config.mode.runs_nli() {
        let triples = &ctx.judgments.nli_triples;
        if triples.is_empty() {
            warn!("Gold set has no labeled evidence; skipping NLI classification");
            ctx.nli = Some(NliOutcome::default());
        } else {
            let endpoint = ctx
                .services()
                .nli
                .as_ref()
                .ok_or_else(|| anyhow!("NLI endpoint was not validated before the run"))?;
            let classifier: Arc<dyn NliClassifier> = Arc::new(
                HttpNliClassifier::new(
                    &endpoint.url,
                    endpoint.api_key.clone(),
                    config.timeout(),
                    endpoint.max_retries,
                )
                .context("building the NLI HTTP client")?,
            );
            let settings = NliRunSettings {
                concurrency: config.concurrency,
                timeout: config.timeout(),
            };
            let outcome = nli::run_nli(classifier, triples, settings).await;
            ctx.nli = Some(outcome);
        }
    }

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .run_nli()
        .map_err(|(_, guard)| map_guard_error("run_nli", guard))
}
