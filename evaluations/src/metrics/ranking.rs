use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::Serialize;

/// Ranking quality of one result list at one cutoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RankingMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub mrr: f64,
    pub ndcg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankingMetric {
    Recall,
    Precision,
    F1,
    Mrr,
    Ndcg,
}

impl RankingMetric {
    pub const ALL: [RankingMetric; 5] = [
        RankingMetric::Recall,
        RankingMetric::Precision,
        RankingMetric::F1,
        RankingMetric::Mrr,
        RankingMetric::Ndcg,
    ];

    pub const fn label(self) -> &'static str {
        match self {
            RankingMetric::Recall => "Recall",
            RankingMetric::Precision => "Precision",
            RankingMetric::F1 => "F1",
            RankingMetric::Mrr => "MRR",
            RankingMetric::Ndcg => "nDCG",
        }
    }

    pub fn value(self, metrics: &RankingMetrics) -> f64 {
        match self {
            RankingMetric::Recall => metrics.recall,
            RankingMetric::Precision => metrics.precision,
            RankingMetric::F1 => metrics.f1,
            RankingMetric::Mrr => metrics.mrr,
            RankingMetric::Ndcg => metrics.ndcg,
        }
    }
}

/// Running state of a single pass over the ranking.
#[derive(Default)]
struct Cursor {
    hits: usize,
    first_hit: Option<usize>,
    dcg: f64,
}

impl Cursor {
    fn snapshot(&self, k: usize, ranking_len: usize, relevant_len: usize) -> RankingMetrics {
        if relevant_len == 0 {
            return RankingMetrics::default();
        }

        let window = k.min(ranking_len);
        let precision = ratio(self.hits, window);
        let recall = ratio(self.hits, relevant_len);
        let f1 = harmonic_mean(precision, recall);
        #[allow(clippy::cast_precision_loss)]
        let mrr = self.first_hit.map_or(0.0, |rank| 1.0 / rank as f64);
        let idcg = ideal_dcg(k.min(relevant_len));
        let ndcg = if idcg > 0.0 { self.dcg / idcg } else { 0.0 };

        RankingMetrics {
            precision,
            recall,
            f1,
            mrr,
            ndcg,
        }
    }
}

/// Scores `ranking` against `relevant` at every cutoff in `k_list`, walking
/// the ranking once. Repeated ids count only at their first position.
pub fn evaluate_ranking<S: AsRef<str>>(
    ranking: &[S],
    relevant: &BTreeSet<String>,
    k_list: &[usize],
) -> BTreeMap<usize, RankingMetrics> {
    let cutoffs: BTreeSet<usize> = k_list.iter().copied().collect();
    let mut pending = cutoffs.iter().copied().peekable();
    let mut results = BTreeMap::new();
    let Some(&max_k) = cutoffs.last() else {
        return results;
    };

    let ranking_len = ranking.len();
    let relevant_len = relevant.len();
    let mut cursor = Cursor::default();
    let mut seen: HashSet<&str> = HashSet::new();

    while let Some(k) = pending.next_if_eq(&0) {
        results.insert(k, cursor.snapshot(k, ranking_len, relevant_len));
    }

    for (offset, id) in ranking.iter().take(max_k).enumerate() {
        let rank = offset + 1;
        let id = id.as_ref();
        if seen.insert(id) && relevant.contains(id) {
            cursor.hits += 1;
            cursor.first_hit.get_or_insert(rank);
            cursor.dcg += discount(rank);
        }
        while let Some(k) = pending.next_if_eq(&rank) {
            results.insert(k, cursor.snapshot(k, ranking_len, relevant_len));
        }
    }

    // Cutoffs beyond the ranking length see the whole list.
    for k in pending {
        results.insert(k, cursor.snapshot(k, ranking_len, relevant_len));
    }
    results
}

pub(crate) fn harmonic_mean(a: f64, b: f64) -> f64 {
    if a + b > 0.0 {
        2.0 * a * b / (a + b)
    } else {
        0.0
    }
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[allow(clippy::cast_precision_loss)]
fn discount(rank: usize) -> f64 {
    1.0 / (rank as f64 + 1.0).log2()
}

fn ideal_dcg(relevant_in_window: usize) -> f64 {
    (1..=relevant_in_window).map(discount).sum()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn relevant_item_at_rank_two() {
        let metrics = evaluate_ranking(&["p2", "p1", "p3"], &set(&["p1"]), &[3]);
        let at3 = metrics[&3];
        assert!(approx(at3.recall, 1.0));
        assert!(approx(at3.precision, 1.0 / 3.0));
        assert!(approx(at3.mrr, 0.5));
        assert!((at3.ndcg - 0.6309).abs() < 1e-4);
        assert!(approx(at3.f1, 0.5));
    }

    #[test]
    fn empty_ranking_scores_zero() {
        let ranking: [&str; 0] = [];
        let metrics = evaluate_ranking(&ranking, &set(&["p1"]), &[5]);
        assert_eq!(metrics[&5], RankingMetrics::default());
    }

    #[test]
    fn every_cutoff_comes_from_one_pass() {
        let metrics = evaluate_ranking(&["a", "x", "b", "y"], &set(&["a", "b"]), &[10, 1, 3]);
        assert_eq!(metrics.keys().copied().collect::<Vec<_>>(), vec![1, 3, 10]);

        assert!(approx(metrics[&1].precision, 1.0));
        assert!(approx(metrics[&1].recall, 0.5));
        assert!(approx(metrics[&3].recall, 1.0));
        assert!(approx(metrics[&3].precision, 2.0 / 3.0));
        // k beyond the list: window is the whole ranking.
        assert!(approx(metrics[&10].precision, 0.5));
        assert!(approx(metrics[&10].mrr, 1.0));
    }

    #[test]
    fn duplicates_do_not_double_count() {
        let metrics = evaluate_ranking(&["p1", "p1", "p2"], &set(&["p1", "p3"]), &[3]);
        let at3 = metrics[&3];
        assert!(approx(at3.precision, 1.0 / 3.0));
        assert!(approx(at3.recall, 0.5));
        assert!(at3.ndcg <= 1.0);
    }

    #[test]
    fn zero_cutoff_is_all_zero() {
        let metrics = evaluate_ranking(&["p1"], &set(&["p1"]), &[0, 1]);
        assert_eq!(metrics[&0], RankingMetrics::default());
        assert!(approx(metrics[&1].ndcg, 1.0));
    }

    fn ranking_strategy() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec((0u8..8).prop_map(|n| format!("p{n}")), 0..12)
    }

    fn relevant_strategy() -> impl Strategy<Value = BTreeSet<String>> {
        prop::collection::btree_set((0u8..8).prop_map(|n| format!("p{n}")), 0..5)
    }

    fn k_strategy() -> impl Strategy<Value = Vec<usize>> {
        prop::collection::vec(1usize..15, 1..5)
    }

    proptest! {
        #[test]
        fn metrics_stay_in_unit_interval(
            ranking in ranking_strategy(),
            relevant in relevant_strategy(),
            ks in k_strategy(),
        ) {
            for metrics in evaluate_ranking(&ranking, &relevant, &ks).values() {
                for metric in RankingMetric::ALL {
                    let value = metric.value(metrics);
                    prop_assert!((0.0..=1.0 + 1e-9).contains(&value), "{metric:?} = {value}");
                }
            }
        }

        #[test]
        fn empty_relevant_set_scores_zero(ranking in ranking_strategy(), ks in k_strategy()) {
            for metrics in evaluate_ranking(&ranking, &BTreeSet::new(), &ks).values() {
                prop_assert_eq!(*metrics, RankingMetrics::default());
            }
        }

        #[test]
        fn relevant_head_gives_full_reciprocal_rank(
            ranking in ranking_strategy(),
            relevant in relevant_strategy(),
            ks in k_strategy(),
        ) {
            prop_assume!(!relevant.is_empty());
            let head = relevant.iter().next().cloned().unwrap_or_default();
            let mut ranking = ranking;
            ranking.insert(0, head);
            for metrics in evaluate_ranking(&ranking, &relevant, &ks).values() {
                prop_assert!(approx(metrics.mrr, 1.0));
            }
        }

        #[test]
        fn relevant_items_first_gives_perfect_ndcg(
            relevant in relevant_strategy(),
            tail in ranking_strategy(),
            ks in k_strategy(),
        ) {
            prop_assume!(!relevant.is_empty());
            let mut ranking: Vec<String> = relevant.iter().rev().cloned().collect();
            ranking.extend(tail.into_iter().filter(|id| !relevant.contains(id)));
            for metrics in evaluate_ranking(&ranking, &relevant, &ks).values() {
                prop_assert!(approx(metrics.ndcg, 1.0));
            }
        }

        #[test]
        fn recall_never_decreases_with_k(
            ranking in ranking_strategy(),
            relevant in relevant_strategy(),
        ) {
            let ks: Vec<usize> = (1..=14).collect();
            let metrics = evaluate_ranking(&ranking, &relevant, &ks);
            let recalls: Vec<f64> = metrics.values().map(|m| m.recall).collect();
            for pair in recalls.windows(2) {
                prop_assert!(pair[0] <= pair[1] + 1e-12);
            }
        }
    }
}
