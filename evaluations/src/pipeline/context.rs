use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Result};
use common::{
    storage::{judgments::RelevanceJudgments, types::passage::Passage},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use retrieval_pipeline::Retriever;

use crate::{
    args::{Config, ServiceSettings},
    runner::{nli::NliOutcome, retrieval::RetrievalOutcome},
    types::{EvaluationStageTimings, EvaluationSummary},
};

pub(super) struct EvaluationContext<'a> {
    config: &'a Config,
    app_config: &'a AppConfig,
    services: &'a ServiceSettings,
    pub stage_timings: EvaluationStageTimings,
    pub judgments: RelevanceJudgments,
    pub gold_checksum: String,
    pub passages: Vec<Passage>,
    pub passages_total: usize,
    pub embedding_provider: Option<EmbeddingProvider>,
    pub passages_embedded: usize,
    pub retrievers: Vec<Arc<dyn Retriever>>,
    pub retrieval: Option<RetrievalOutcome>,
    pub nli: Option<NliOutcome>,
    pub evaluation_start: Option<Instant>,
    pub summary: Option<EvaluationSummary>,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(
        config: &'a Config,
        app_config: &'a AppConfig,
        services: &'a ServiceSettings,
    ) -> Self {
        Self {
            config,
            app_config,
            services,
            stage_timings: EvaluationStageTimings::default(),
            judgments: RelevanceJudgments::default(),
            gold_checksum: String::new(),
            passages: Vec::new(),
            passages_total: 0,
            embedding_provider: None,
            passages_embedded: 0,
            retrievers: Vec::new(),
            retrieval: None,
            nli: None,
            evaluation_start: None,
            summary: None,
        }
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    pub fn app_config(&self) -> &'a AppConfig {
        self.app_config
    }

    pub fn services(&self) -> &'a ServiceSettings {
        self.services
    }

    pub fn record_stage_duration(&mut self, stage: EvalStage, duration: Duration) {
        let elapsed = duration.as_millis();
        match stage {
            EvalStage::LoadData => self.stage_timings.load_data_ms += elapsed,
            EvalStage::PrepareRetrievers => self.stage_timings.prepare_retrievers_ms += elapsed,
            EvalStage::RunRetrieval => self.stage_timings.run_retrieval_ms += elapsed,
            EvalStage::RunNli => self.stage_timings.run_nli_ms += elapsed,
            EvalStage::Summarize => self.stage_timings.summarize_ms += elapsed,
            EvalStage::Finalize => self.stage_timings.finalize_ms += elapsed,
        }
    }

    pub fn into_summary(self) -> Result<EvaluationSummary> {
        self.summary
            .ok_or_else(|| anyhow!("evaluation summary missing after pipeline completion"))
    }
}

#[derive(Copy, Clone)]
pub(super) enum EvalStage {
    LoadData,
    PrepareRetrievers,
    RunRetrieval,
    RunNli,
    Summarize,
    Finalize,
}

impl EvalStage {
    pub fn label(self) -> &'static str {
        match self {
            EvalStage::LoadData => "load-data",
            EvalStage::PrepareRetrievers => "prepare-retrievers",
            EvalStage::RunRetrieval => "run-retrieval",
            EvalStage::RunNli => "run-nli",
            EvalStage::Summarize => "summarize",
            EvalStage::Finalize => "finalize",
        }
    }
}
