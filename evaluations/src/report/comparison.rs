use std::{cmp::Ordering, collections::BTreeMap};

use retrieval_pipeline::RetrievalMethod;
use serde::Serialize;

use crate::{metrics::RankingMetric, runner::retrieval::MethodAggregates};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MethodScore {
    pub method: RetrievalMethod,
    pub score: f64,
}

/// Methods ordered best-first for one metric at one cutoff.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRanking {
    pub metric: RankingMetric,
    pub k: usize,
    pub ranked: Vec<MethodScore>,
}

impl MetricRanking {
    pub fn best(&self) -> Option<&MethodScore> {
        self.ranked.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WinRecord {
    pub method: RetrievalMethod,
    pub wins: usize,
    pub cells: usize,
    pub win_percentage: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MethodComparison {
    pub reference_k: usize,
    /// One entry per metric, at the reference cutoff.
    pub rankings: Vec<MetricRanking>,
    /// Wins across every (k, metric) cell, most wins first.
    pub wins: Vec<WinRecord>,
    pub overall_best: Option<RetrievalMethod>,
}

impl MethodComparison {
    pub fn build(aggregates: &MethodAggregates, k_list: &[usize], reference_k: usize) -> Self {
        let rankings = RankingMetric::ALL
            .iter()
            .map(|metric| rank_methods(aggregates, *metric, reference_k))
            .collect();

        let mut tally: BTreeMap<RetrievalMethod, usize> =
            aggregates.keys().map(|method| (*method, 0)).collect();
        let mut cells = 0usize;
        for k in k_list {
            for metric in RankingMetric::ALL {
                let cell = rank_methods(aggregates, metric, *k);
                if let Some(winner) = cell.best() {
                    cells = cells.saturating_add(1);
                    if let Some(count) = tally.get_mut(&winner.method) {
                        *count = count.saturating_add(1);
                    }
                }
            }
        }

        let mut wins: Vec<WinRecord> = tally
            .into_iter()
            .map(|(method, wins)| WinRecord {
                method,
                wins,
                cells,
                win_percentage: percentage(wins, cells),
            })
            .collect();
        wins.sort_by(|a, b| {
            b.wins
                .cmp(&a.wins)
                .then_with(|| a.method.as_str().cmp(b.method.as_str()))
        });
        let overall_best = wins
            .first()
            .filter(|record| record.wins > 0)
            .map(|record| record.method);

        Self {
            reference_k,
            rankings,
            wins,
            overall_best,
        }
    }

    pub fn ranking(&self, metric: RankingMetric) -> Option<&MetricRanking> {
        self.rankings.iter().find(|ranking| ranking.metric == metric)
    }

    pub fn best_for(&self, metric: RankingMetric) -> Option<&MethodScore> {
        self.ranking(metric).and_then(MetricRanking::best)
    }

    pub fn win_record(&self, method: RetrievalMethod) -> Option<&WinRecord> {
        self.wins.iter().find(|record| record.method == method)
    }
}

/// Ranks every method that has a cell at `k`; score descending, ties by name.
fn rank_methods(aggregates: &MethodAggregates, metric: RankingMetric, k: usize) -> MetricRanking {
    let mut ranked: Vec<MethodScore> = aggregates
        .iter()
        .filter_map(|(method, per_k)| {
            per_k.get(&k).map(|cell| MethodScore {
                method: *method,
                score: metric.value(&cell.metrics),
            })
        })
        .collect();
    ranked.sort_by(|a, b| match b.score.total_cmp(&a.score) {
        Ordering::Equal => a.method.as_str().cmp(b.method.as_str()),
        other => other,
    });
    MetricRanking { metric, k, ranked }
}

#[allow(clippy::cast_precision_loss)]
fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metrics::RankingMetrics, runner::retrieval::AggregateMetrics};

    fn cell(recall: f64, precision: f64, ndcg: f64) -> AggregateMetrics {
        AggregateMetrics {
            metrics: RankingMetrics {
                precision,
                recall,
                f1: 0.0,
                mrr: 0.5,
                ndcg,
            },
            queries: 4,
        }
    }

    fn aggregates() -> MethodAggregates {
        let mut aggregates = MethodAggregates::new();
        aggregates.insert(
            RetrievalMethod::Regex,
            BTreeMap::from([(1, cell(0.25, 0.5, 0.4)), (5, cell(0.5, 0.2, 0.5))]),
        );
        aggregates.insert(
            RetrievalMethod::Dense,
            BTreeMap::from([(1, cell(0.5, 0.75, 0.6)), (5, cell(0.75, 0.2, 0.7))]),
        );
        aggregates
    }

    #[test]
    fn ranks_methods_at_reference_k() {
        let comparison = MethodComparison::build(&aggregates(), &[1, 5], 5);

        let recall = comparison.ranking(RankingMetric::Recall).expect("recall ranking");
        assert_eq!(recall.k, 5);
        let order: Vec<_> = recall.ranked.iter().map(|entry| entry.method).collect();
        assert_eq!(order, vec![RetrievalMethod::Dense, RetrievalMethod::Regex]);
        assert_eq!(
            comparison.best_for(RankingMetric::Ndcg).map(|best| best.method),
            Some(RetrievalMethod::Dense)
        );
    }

    #[test]
    fn score_ties_break_by_method_name() {
        let comparison = MethodComparison::build(&aggregates(), &[1, 5], 5);

        // Precision@5 is 0.2 for both; "dense" sorts before "regex".
        let precision = comparison
            .ranking(RankingMetric::Precision)
            .expect("precision ranking");
        assert_eq!(precision.ranked[0].method, RetrievalMethod::Dense);

        // MRR ties everywhere, so every MRR cell also goes to "dense".
        let mrr = comparison.ranking(RankingMetric::Mrr).expect("mrr ranking");
        assert_eq!(mrr.ranked[0].method, RetrievalMethod::Dense);
    }

    #[test]
    fn win_table_counts_every_cell() {
        let comparison = MethodComparison::build(&aggregates(), &[1, 5], 5);

        let dense = comparison
            .win_record(RetrievalMethod::Dense)
            .expect("dense wins");
        let regex = comparison
            .win_record(RetrievalMethod::Regex)
            .expect("regex wins");
        assert_eq!(dense.cells, 10);
        assert_eq!(dense.wins + regex.wins, 10);
        assert_eq!(dense.wins, 10);
        assert!((dense.win_percentage - 100.0).abs() < 1e-9);
        assert_eq!(comparison.overall_best, Some(RetrievalMethod::Dense));
    }

    #[test]
    fn empty_aggregates_have_no_best_method() {
        let comparison = MethodComparison::build(&MethodAggregates::new(), &[1, 5], 5);
        assert!(comparison.wins.is_empty());
        assert!(comparison.overall_best.is_none());
        assert!(comparison.best_for(RankingMetric::Recall).is_none());
    }
}
