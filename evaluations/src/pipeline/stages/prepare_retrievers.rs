use std::{sync::Arc, time::Instant};

use anyhow::Context;
use common::{storage::index::PassageIndex, utils::embedding::build_provider};
use retrieval_pipeline::{build_retriever, RetrievalResources};
use tracing::info;

use super::super::{
    context::{EvalStage, EvaluationContext},
    state::{DataLoaded, EvaluationMachine, RetrieversReady},
};
use super::{map_guard_error, StageResult};

pub(crate) async fn prepare_retrievers(
    machine: EvaluationMachine<(), DataLoaded>,
    ctx: &mut EvaluationContext<'_>,
) -> StageResult<RetrieversReady> {
    let stage = EvalStage::PrepareRetrievers;
    info!(
        evaluation_stage = stage.label(),
        "starting evaluation stage"
    );
    let started = Instant::now();
    let config = ctx.config();

    let passages = std::mem::take(&mut ctx.passages);
    if config.mode.runs_retrieval() {
        let embedder = if config.needs_embeddings() {
            Some(
                build_provider(&config.embedding_settings(), ctx.app_config())
                    .await
                    .context("initialising embedding provider")?,
            )
        } else {
            None
        };

        let mut index = PassageIndex::new(passages);
        if let Some(provider) = embedder.as_ref() {
            ctx.passages_embedded = index
                .ensure_embeddings(provider)
                .await
                .context("embedding passages for the in-memory index")?;
        }

        let resources = RetrievalResources::new(Arc::new(index), embedder.clone());
        let settings = config.retriever_settings();
        for method in &config.methods {
            let retriever = build_retriever(*method, &resources, settings)
                .with_context(|| format!("building {method} retriever"))?;
            ctx.retrievers.push(retriever);
        }

        info!(
            methods = ?config.methods,
            passages = resources.index.len(),
            concepts = resources.concepts.concept_count(),
            passages_embedded = ctx.passages_embedded,
            "Retrievers ready"
        );
        ctx.embedding_provider = embedder;
    } else {
        info!(mode = %config.mode, "Retrieval disabled; skipping retriever setup");
    }

    let elapsed = started.elapsed();
    ctx.record_stage_duration(stage, elapsed);
    info!(
        evaluation_stage = stage.label(),
        duration_ms = elapsed.as_millis(),
        "completed evaluation stage"
    );

    machine
        .prepare_retrievers()
        .map_err(|(_, guard)| map_guard_error("prepare_retrievers", guard))
}
