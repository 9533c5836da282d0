use crate::{
    metrics::RankingMetric,
    types::{NliSummary, RetrievalSummary},
};

use super::comparison::MethodComparison;

const COVERAGE_RECALL: f64 = 0.5;
const LOW_RECALL: f64 = 0.3;
const LOW_PRECISION: f64 = 0.2;
const WEAK_MACRO_F1: f64 = 0.5;

/// Everything the rules look at.
pub struct RuleInput<'a> {
    pub reference_k: usize,
    pub comparison: Option<&'a MethodComparison>,
    pub retrieval: Option<&'a RetrievalSummary>,
    pub nli: Option<&'a NliSummary>,
}

impl RuleInput<'_> {
    fn recall_at_reference(&self) -> Vec<(&'static str, f64)> {
        self.metric_at_reference(RankingMetric::Recall)
    }

    fn metric_at_reference(&self, metric: RankingMetric) -> Vec<(&'static str, f64)> {
        let Some(retrieval) = self.retrieval else {
            return Vec::new();
        };
        retrieval
            .aggregates
            .iter()
            .filter_map(|(method, per_k)| {
                per_k
                    .get(&self.reference_k)
                    .map(|cell| (method.as_str(), metric.value(&cell.metrics)))
            })
            .collect()
    }
}

struct Rule {
    name: &'static str,
    evaluate: fn(&RuleInput<'_>) -> Vec<String>,
}

/// Evaluated top to bottom; each rule may emit any number of messages.
static RULES: &[Rule] = &[
    Rule {
        name: "overall-best",
        evaluate: overall_best,
    },
    Rule {
        name: "best-per-metric",
        evaluate: best_per_metric,
    },
    Rule {
        name: "data-coverage",
        evaluate: data_coverage,
    },
    Rule {
        name: "low-recall",
        evaluate: low_recall,
    },
    Rule {
        name: "low-precision",
        evaluate: low_precision,
    },
    Rule {
        name: "retrieval-failures",
        evaluate: retrieval_failures,
    },
    Rule {
        name: "control-leaks",
        evaluate: control_leaks,
    },
    Rule {
        name: "nli-macro-f1",
        evaluate: nli_macro_f1,
    },
    Rule {
        name: "nli-unrecovered-class",
        evaluate: nli_unrecovered_class,
    },
    Rule {
        name: "nli-unavailable",
        evaluate: nli_unavailable,
    },
];

pub fn recommend(input: &RuleInput<'_>) -> Vec<String> {
    RULES
        .iter()
        .flat_map(|rule| {
            let messages = (rule.evaluate)(input);
            if !messages.is_empty() {
                tracing::debug!(rule = rule.name, fired = messages.len(), "recommendation rule fired");
            }
            messages
        })
        .collect()
}

fn overall_best(input: &RuleInput<'_>) -> Vec<String> {
    let Some(comparison) = input.comparison else {
        return Vec::new();
    };
    comparison
        .overall_best
        .and_then(|method| comparison.win_record(method))
        .map(|record| {
            vec![format!(
                "Overall best method: {} (best in {}/{} metric comparisons, {:.1}%)",
                record.method, record.wins, record.cells, record.win_percentage
            )]
        })
        .unwrap_or_default()
}

fn best_per_metric(input: &RuleInput<'_>) -> Vec<String> {
    let Some(comparison) = input.comparison else {
        return Vec::new();
    };
    [
        RankingMetric::Recall,
        RankingMetric::Precision,
        RankingMetric::Ndcg,
    ]
    .into_iter()
    .filter_map(|metric| {
        comparison.best_for(metric).map(|best| {
            format!(
                "Best {}@{}: {} ({:.3})",
                metric.label(),
                comparison.reference_k,
                best.method,
                best.score
            )
        })
    })
    .collect()
}

fn data_coverage(input: &RuleInput<'_>) -> Vec<String> {
    let recalls = input.recall_at_reference();
    if !recalls.is_empty() && recalls.iter().all(|(_, recall)| *recall < COVERAGE_RECALL) {
        vec![format!(
            "Recall@{} is below {COVERAGE_RECALL} for every method: possible data coverage issue, the passages may not contain the evidence for many gold claims",
            input.reference_k
        )]
    } else {
        Vec::new()
    }
}

fn low_recall(input: &RuleInput<'_>) -> Vec<String> {
    input
        .recall_at_reference()
        .into_iter()
        .filter(|(_, recall)| *recall < LOW_RECALL)
        .map(|(method, recall)| {
            format!(
                "{method}: low Recall@{} ({recall:.3}); consider broadening concept patterns or candidate pools",
                input.reference_k
            )
        })
        .collect()
}

fn low_precision(input: &RuleInput<'_>) -> Vec<String> {
    input
        .metric_at_reference(RankingMetric::Precision)
        .into_iter()
        .filter(|(_, precision)| *precision < LOW_PRECISION)
        .map(|(method, precision)| {
            format!(
                "{method}: low Precision@{} ({precision:.3}); consider reranking or tighter filtering",
                input.reference_k
            )
        })
        .collect()
}

fn retrieval_failures(input: &RuleInput<'_>) -> Vec<String> {
    let Some(retrieval) = input.retrieval else {
        return Vec::new();
    };
    retrieval
        .methods
        .values()
        .filter(|run| run.failures > 0)
        .map(|run| {
            format!(
                "{}: {} of {} queries failed and were scored as zero; its scores are lower bounds",
                run.method, run.failures, run.queries
            )
        })
        .collect()
}

fn control_leaks(input: &RuleInput<'_>) -> Vec<String> {
    let Some(retrieval) = input.retrieval else {
        return Vec::new();
    };
    retrieval
        .methods
        .values()
        .filter_map(|run| {
            run.controls
                .pass_rate()
                .filter(|rate| *rate < 1.0)
                .map(|rate| {
                    format!(
                        "{}: returned passages for unsupported claims ({}/{} control claims passed, {:.1}%)",
                        run.method,
                        run.controls.passed,
                        run.controls.total,
                        rate * 100.0
                    )
                })
        })
        .collect()
}

fn nli_macro_f1(input: &RuleInput<'_>) -> Vec<String> {
    input
        .nli
        .and_then(|nli| nli.report.as_ref())
        .filter(|report| report.macro_avg.f1 < WEAK_MACRO_F1)
        .map(|report| {
            vec![format!(
                "NLI classifier underperforms: macro F1 {:.3} is below {WEAK_MACRO_F1}",
                report.macro_avg.f1
            )]
        })
        .unwrap_or_default()
}

fn nli_unrecovered_class(input: &RuleInput<'_>) -> Vec<String> {
    input
        .nli
        .and_then(|nli| nli.report.as_ref())
        .map(|report| {
            report
                .unrecovered_classes()
                .into_iter()
                .map(|label| {
                    let support = report.per_class.get(&label).map_or(0, |class| class.support);
                    format!(
                        "NLI class {label} was never recovered (recall 0 over {support} gold examples)"
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

fn nli_unavailable(input: &RuleInput<'_>) -> Vec<String> {
    input
        .nli
        .filter(|nli| nli.unavailable > 0)
        .map(|nli| {
            vec![format!(
                "{} of {} NLI predictions were unavailable ({} timed out); reported counts exclude them",
                nli.unavailable, nli.attempted, nli.timeouts
            )]
        })
        .unwrap_or_default()
}
