use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use common::storage::judgments::GoldSetAnalysis;
use retrieval_pipeline::RetrievalMethod;
use serde::Serialize;

use crate::{
    metrics::{ClassificationReport, LatencyStats},
    runner::{
        nli::{LabeledPair, UnavailablePrediction},
        retrieval::{MethodAggregates, MethodRun},
    },
};

#[derive(Debug, Serialize)]
pub struct EvaluationSummary {
    pub generated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
    pub mode: String,
    pub gold_set_path: String,
    pub gold_set_checksum: String,
    pub passages_path: String,
    pub passages_total: usize,
    pub dataset: GoldSetAnalysis,
    pub queries: usize,
    pub control_claims: usize,
    pub nli_triples: usize,
    pub limit: Option<usize>,
    pub k_list: Vec<usize>,
    pub reference_k: usize,
    pub methods: Vec<RetrievalMethod>,
    pub top_n: usize,
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub hybrid_candidates: usize,
    pub embedding: Option<EmbeddingInfo>,
    pub duration_ms: u128,
    pub stage_timings: EvaluationStageTimings,
    pub retrieval: Option<RetrievalSummary>,
    pub nli: Option<NliSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingInfo {
    pub backend: String,
    pub model: Option<String>,
    pub dimension: usize,
    pub passages_embedded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalSummary {
    pub aggregates: MethodAggregates,
    pub methods: BTreeMap<RetrievalMethod, MethodRun>,
    pub total_failures: usize,
}

impl RetrievalSummary {
    pub fn metrics_at(
        &self,
        method: RetrievalMethod,
        k: usize,
    ) -> Option<&crate::runner::retrieval::AggregateMetrics> {
        self.aggregates.get(&method).and_then(|per_k| per_k.get(&k))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NliSummary {
    pub attempted: usize,
    pub evaluated: usize,
    pub unavailable: usize,
    pub timeouts: usize,
    pub latency_ms: LatencyStats,
    /// `None` when no prediction was available to score.
    pub report: Option<ClassificationReport>,
    pub unavailable_details: Vec<UnavailablePrediction>,
    #[serde(skip)]
    pub predictions: Vec<LabeledPair>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EvaluationStageTimings {
    pub load_data_ms: u128,
    pub prepare_retrievers_ms: u128,
    pub run_retrieval_ms: u128,
    pub run_nli_ms: u128,
    pub summarize_ms: u128,
    pub finalize_ms: u128,
}
