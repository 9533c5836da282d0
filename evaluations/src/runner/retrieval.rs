use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    error::AppError,
    storage::judgments::{ControlClaim, Query},
};
use futures::stream::{self, StreamExt};
use retrieval_pipeline::{RetrievalMethod, Retriever};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::metrics::{compute_latency_stats, evaluate_ranking, LatencyStats, RankingMetrics};

#[derive(Debug, Clone)]
pub struct RetrievalRunSettings {
    pub k_list: Vec<usize>,
    pub top_n: usize,
    pub concurrency: usize,
    pub timeout: Duration,
    pub sample: usize,
}

/// Running sums for one (method, k) cell.
#[derive(Debug, Clone, Copy, Default)]
struct MetricSums {
    precision: f64,
    recall: f64,
    f1: f64,
    mrr: f64,
    ndcg: f64,
    count: usize,
}

impl MetricSums {
    fn add(&mut self, metrics: &RankingMetrics) {
        self.precision += metrics.precision;
        self.recall += metrics.recall;
        self.f1 += metrics.f1;
        self.mrr += metrics.mrr;
        self.ndcg += metrics.ndcg;
        self.count += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    fn mean(&self) -> RankingMetrics {
        if self.count == 0 {
            return RankingMetrics::default();
        }
        let n = self.count as f64;
        RankingMetrics {
            precision: self.precision / n,
            recall: self.recall / n,
            f1: self.f1 / n,
            mrr: self.mrr / n,
            ndcg: self.ndcg / n,
        }
    }
}

/// Mean ranking metrics for one (method, k) over the queries that fed it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateMetrics {
    #[serde(flatten)]
    pub metrics: RankingMetrics,
    pub queries: usize,
}

pub type MethodAggregates = BTreeMap<RetrievalMethod, BTreeMap<usize, AggregateMetrics>>;

/// Sum/count accumulator keyed by (method, k). Reduction is commutative, so
/// the order in which queries are recorded does not affect the means.
#[derive(Debug, Clone)]
pub struct RetrievalAccumulator {
    k_list: Vec<usize>,
    cells: BTreeMap<(RetrievalMethod, usize), MetricSums>,
}

impl RetrievalAccumulator {
    pub fn new(k_list: &[usize]) -> Self {
        let mut k_list = k_list.to_vec();
        k_list.sort_unstable();
        k_list.dedup();
        Self {
            k_list,
            cells: BTreeMap::new(),
        }
    }

    pub fn k_list(&self) -> &[usize] {
        &self.k_list
    }

    pub fn methods(&self) -> BTreeSet<RetrievalMethod> {
        self.cells.keys().map(|(method, _)| *method).collect()
    }

    pub fn record(&mut self, method: RetrievalMethod, per_k: &BTreeMap<usize, RankingMetrics>) {
        for k in &self.k_list {
            let metrics = per_k.get(k).copied().unwrap_or_default();
            self.cells.entry((method, *k)).or_default().add(&metrics);
        }
    }

    /// Records an all-zero score at every k for a query the method failed on.
    pub fn record_failure(&mut self, method: RetrievalMethod) {
        self.record(method, &BTreeMap::new());
    }

    pub fn count(&self, method: RetrievalMethod, k: usize) -> usize {
        self.cells
            .get(&(method, k))
            .map_or(0, |sums| sums.count)
    }

    /// Every method must have every k, and every cell the same query count.
    pub fn validate(&self) -> Result<(), AppError> {
        let mut expected: Option<(RetrievalMethod, usize, usize)> = None;
        for method in self.methods() {
            for k in &self.k_list {
                let Some(sums) = self.cells.get(&(method, *k)) else {
                    return Err(AppError::Validation(format!(
                        "method '{method}' has no aggregate for k={k}"
                    )));
                };
                match expected {
                    None => expected = Some((method, *k, sums.count)),
                    Some((first_method, first_k, count)) if count != sums.count => {
                        return Err(AppError::Validation(format!(
                            "inconsistent query counts: {method}@{k} has {}, {first_method}@{first_k} has {count}",
                            sums.count
                        )));
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    pub fn finalize(&self) -> Result<MethodAggregates, AppError> {
        self.validate()?;
        let mut aggregates: MethodAggregates = BTreeMap::new();
        for ((method, k), sums) in &self.cells {
            aggregates.entry(*method).or_default().insert(
                *k,
                AggregateMetrics {
                    metrics: sums.mean(),
                    queries: sums.count,
                },
            );
        }
        Ok(aggregates)
    }
}

/// A query with zero recall at the largest k.
#[derive(Debug, Clone, Serialize)]
pub struct MissSample {
    pub query_id: String,
    pub claim: String,
    pub relevant: Vec<String>,
    pub retrieved: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlOutcome {
    pub total: usize,
    pub passed: usize,
    pub failures: usize,
}

impl ControlOutcome {
    /// Share of control claims answered with an empty ranking; `None` when
    /// there were no control claims.
    #[allow(clippy::cast_precision_loss)]
    pub fn pass_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.passed as f64 / self.total as f64)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodRun {
    pub method: RetrievalMethod,
    pub queries: usize,
    pub failures: usize,
    pub latency_ms: LatencyStats,
    pub controls: ControlOutcome,
    pub misses: Vec<MissSample>,
    pub miss_count: usize,
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub accumulator: RetrievalAccumulator,
    pub methods: BTreeMap<RetrievalMethod, MethodRun>,
}

struct Fetched {
    latency_ms: u128,
    result: Result<Vec<String>, String>,
}

/// Runs every retriever over the identical query list and k-list.
pub async fn run_retrieval(
    retrievers: &[Arc<dyn Retriever>],
    queries: &[Query],
    controls: &[ControlClaim],
    settings: &RetrievalRunSettings,
) -> RetrievalOutcome {
    let mut accumulator = RetrievalAccumulator::new(&settings.k_list);
    let max_k = accumulator.k_list().last().copied().unwrap_or_default();
    let mut methods = BTreeMap::new();

    for retriever in retrievers {
        let method = retriever.method();
        info!(
            method = %method,
            queries = queries.len(),
            controls = controls.len(),
            top_n = settings.top_n,
            "Evaluating retrieval method"
        );

        let claims: Vec<&str> = queries.iter().map(|query| query.claim.as_str()).collect();
        let fetched = fetch_rankings(retriever, &claims, settings).await;

        let mut failures = 0usize;
        let mut latencies = Vec::with_capacity(fetched.len());
        let mut misses = Vec::new();
        let mut miss_count = 0usize;

        for (query, fetched) in queries.iter().zip(fetched) {
            latencies.push(fetched.latency_ms);
            let (ranking, error) = match fetched.result {
                Ok(ranking) => {
                    let per_k = evaluate_ranking(&ranking, &query.relevant, accumulator.k_list());
                    let missed = per_k.get(&max_k).is_some_and(|m| m.recall <= 0.0);
                    accumulator.record(method, &per_k);
                    if !missed {
                        continue;
                    }
                    (ranking, None)
                }
                Err(error) => {
                    warn!(
                        method = %method,
                        query_id = %query.id,
                        error = %error,
                        "Retrieval failed; scoring query as zero"
                    );
                    failures += 1;
                    accumulator.record_failure(method);
                    (Vec::new(), Some(error))
                }
            };

            miss_count += 1;
            if misses.len() < settings.sample {
                misses.push(MissSample {
                    query_id: query.id.clone(),
                    claim: query.claim.clone(),
                    relevant: query.relevant.iter().cloned().collect(),
                    retrieved: ranking.into_iter().take(max_k).collect(),
                    error,
                });
            }
        }

        let control_claims: Vec<&str> = controls.iter().map(|c| c.claim.as_str()).collect();
        let mut control_outcome = ControlOutcome {
            total: control_claims.len(),
            ..ControlOutcome::default()
        };
        for fetched in fetch_rankings(retriever, &control_claims, settings).await {
            match fetched.result {
                Ok(ranking) if ranking.is_empty() => control_outcome.passed += 1,
                Ok(_) => {}
                Err(_) => control_outcome.failures += 1,
            }
        }

        let run = MethodRun {
            method,
            queries: queries.len(),
            failures,
            latency_ms: compute_latency_stats(&latencies),
            controls: control_outcome,
            misses,
            miss_count,
        };
        info!(
            method = %method,
            failures = run.failures,
            misses = run.miss_count,
            avg_latency_ms = run.latency_ms.avg,
            "Retrieval method evaluated"
        );
        methods.insert(method, run);
    }

    RetrievalOutcome {
        accumulator,
        methods,
    }
}

/// Calls the retriever for each claim with bounded concurrency and returns
/// the results in input order.
async fn fetch_rankings(
    retriever: &Arc<dyn Retriever>,
    claims: &[&str],
    settings: &RetrievalRunSettings,
) -> Vec<Fetched> {
    let concurrency = settings.concurrency.max(1);
    let timeout = settings.timeout;
    let top_n = settings.top_n;

    let mut results: Vec<(usize, Fetched)> = stream::iter(claims.iter().copied().enumerate())
        .map(|(idx, claim)| {
            let retriever = Arc::clone(retriever);
            async move {
                let started = Instant::now();
                let result = match tokio::time::timeout(timeout, retriever.retrieve(claim, top_n))
                    .await
                {
                    Ok(Ok(ranking)) => Ok(ranking),
                    Ok(Err(err)) => Err(err.to_string()),
                    Err(_) => Err(format!("timed out after {}ms", timeout.as_millis())),
                };
                let latency_ms = started.elapsed().as_millis();
                debug!(idx, latency_ms, ok = result.is_ok(), "Retrieval call finished");
                (idx, Fetched { latency_ms, result })
            }
        })
        .buffer_unordered(concurrency)
        .collect()
        .await;

    results.sort_by_key(|(idx, _)| *idx);
    results.into_iter().map(|(_, fetched)| fetched).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;

    struct ScriptedRetriever {
        method: RetrievalMethod,
        answers: HashMap<String, Vec<String>>,
        failing: Option<String>,
        stall: Option<String>,
    }

    impl ScriptedRetriever {
        fn new(method: RetrievalMethod, answers: &[(&str, &[&str])]) -> Self {
            Self {
                method,
                answers: answers
                    .iter()
                    .map(|(claim, ids)| {
                        (
                            (*claim).to_string(),
                            ids.iter().map(|id| (*id).to_string()).collect(),
                        )
                    })
                    .collect(),
                failing: None,
                stall: None,
            }
        }
    }

    #[async_trait]
    impl Retriever for ScriptedRetriever {
        fn method(&self) -> RetrievalMethod {
            self.method
        }

        async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, AppError> {
            if self.failing.as_deref() == Some(query) {
                return Err(AppError::Embedding("endpoint unavailable".into()));
            }
            if self.stall.as_deref() == Some(query) {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            let mut ids = self.answers.get(query).cloned().unwrap_or_default();
            ids.truncate(limit);
            Ok(ids)
        }
    }

    fn query(id: &str, claim: &str, relevant: &[&str]) -> Query {
        Query {
            id: id.into(),
            claim: claim.into(),
            relevant: relevant.iter().map(|id| (*id).to_string()).collect(),
        }
    }

    fn four_queries() -> Vec<Query> {
        vec![
            query("q1", "claim one", &["p1"]),
            query("q2", "claim two", &["p2", "p3"]),
            query("q3", "claim three", &["p4"]),
            query("q4", "claim four", &["p5"]),
        ]
    }

    fn settings(concurrency: usize) -> RetrievalRunSettings {
        RetrievalRunSettings {
            k_list: vec![1, 5],
            top_n: 10,
            concurrency,
            timeout: Duration::from_millis(100),
            sample: 10,
        }
    }

    fn regex_retriever() -> ScriptedRetriever {
        ScriptedRetriever::new(
            RetrievalMethod::Regex,
            &[
                ("claim one", &["p1", "p9"]),
                ("claim two", &["p9", "p3"]),
                ("claim three", &[]),
                ("claim four", &["p5"]),
            ],
        )
    }

    fn dense_retriever() -> ScriptedRetriever {
        ScriptedRetriever::new(
            RetrievalMethod::Dense,
            &[
                ("claim one", &["p8", "p1"]),
                ("claim two", &["p2", "p3"]),
                ("claim three", &["p4"]),
                ("claim four", &["p7"]),
                ("is the moon made of cheese", &["p6"]),
            ],
        )
    }

    #[tokio::test]
    async fn two_methods_share_query_denominators() {
        let retrievers: Vec<Arc<dyn Retriever>> =
            vec![Arc::new(regex_retriever()), Arc::new(dense_retriever())];

        let outcome = run_retrieval(&retrievers, &four_queries(), &[], &settings(2)).await;

        outcome.accumulator.validate().unwrap();
        for method in [RetrievalMethod::Regex, RetrievalMethod::Dense] {
            for k in [1, 5] {
                assert_eq!(outcome.accumulator.count(method, k), 4);
            }
        }

        let aggregates = outcome.accumulator.finalize().unwrap();
        let regex_at1 = aggregates[&RetrievalMethod::Regex][&1].metrics;
        // q1 and q4 hit at rank 1.
        assert!((regex_at1.recall - 0.5).abs() < 1e-9);
        let regex_at5 = aggregates[&RetrievalMethod::Regex][&5].metrics;
        // q1 = 1, q2 = 0.5, q3 = 0, q4 = 1.
        assert!((regex_at5.recall - 0.625).abs() < 1e-9);
        assert_eq!(outcome.methods[&RetrievalMethod::Regex].miss_count, 1);
    }

    #[test]
    fn mismatched_denominators_fail_validation() {
        let mut accumulator = RetrievalAccumulator::new(&[1, 5]);
        let per_k: BTreeMap<usize, RankingMetrics> =
            [(1, RankingMetrics::default()), (5, RankingMetrics::default())].into();
        for _ in 0..4 {
            accumulator.record(RetrievalMethod::Regex, &per_k);
        }
        for _ in 0..3 {
            accumulator.record(RetrievalMethod::Dense, &per_k);
        }
        assert!(matches!(
            accumulator.validate(),
            Err(AppError::Validation(_))
        ));
        assert!(accumulator.finalize().is_err());
    }

    #[tokio::test]
    async fn failures_score_zero_without_aborting() {
        let mut failing = regex_retriever();
        failing.failing = Some("claim one".into());
        failing.stall = Some("claim four".into());
        let retrievers: Vec<Arc<dyn Retriever>> = vec![Arc::new(failing)];

        let outcome = run_retrieval(&retrievers, &four_queries(), &[], &settings(4)).await;

        let run = &outcome.methods[&RetrievalMethod::Regex];
        assert_eq!(run.failures, 2);
        assert_eq!(outcome.accumulator.count(RetrievalMethod::Regex, 5), 4);
        let at5 = outcome.accumulator.finalize().unwrap()[&RetrievalMethod::Regex][&5].metrics;
        // Only q2 scores: recall 0.5 over four queries.
        assert!((at5.recall - 0.125).abs() < 1e-9);
        assert!(run.misses.iter().any(|miss| miss.error.is_some()));
    }

    #[tokio::test]
    async fn aggregation_ignores_completion_order() {
        let queries = four_queries();
        let serial = run_retrieval(
            &[Arc::new(dense_retriever()) as Arc<dyn Retriever>],
            &queries,
            &[],
            &settings(1),
        )
        .await;
        let parallel = run_retrieval(
            &[Arc::new(dense_retriever()) as Arc<dyn Retriever>],
            &queries,
            &[],
            &settings(4),
        )
        .await;
        assert_eq!(
            serial.accumulator.finalize().unwrap(),
            parallel.accumulator.finalize().unwrap()
        );
    }

    #[tokio::test]
    async fn control_claims_pass_on_empty_rankings() {
        let controls = vec![
            ControlClaim {
                id: "c1".into(),
                claim: "is the moon made of cheese".into(),
            },
            ControlClaim {
                id: "c2".into(),
                claim: "who won the 1998 world cup".into(),
            },
        ];
        let retrievers: Vec<Arc<dyn Retriever>> = vec![Arc::new(dense_retriever())];

        let outcome = run_retrieval(&retrievers, &four_queries(), &controls, &settings(2)).await;

        let controls = &outcome.methods[&RetrievalMethod::Dense].controls;
        assert_eq!(controls.total, 2);
        assert_eq!(controls.passed, 1);
        assert_eq!(controls.pass_rate(), Some(0.5));
        // Control claims never reach the ranking aggregates.
        assert_eq!(outcome.accumulator.count(RetrievalMethod::Dense, 1), 4);
    }
}
