use common::storage::types::nli_label::NliLabel;

use crate::metrics::{LatencyStats, RankingMetric};

use super::{EvaluationReport, MethodSection, NliSection};

pub(super) fn render_markdown(report: &EvaluationReport) -> String {
    let mut md = String::new();

    md.push_str(&format!(
        "# Climate Claim Evaluation ({})\n\n",
        report.overview.run_id
    ));

    md.push_str("## Overview\n\n");
    md.push_str("| Metric | Value |\n| --- | --- |\n");
    md.push_str(&format!("| Generated | {} |\n", report.overview.generated_at));
    md.push_str(&format!(
        "| Run Label | {} |\n",
        report
            .overview
            .run_label
            .as_deref()
            .filter(|label| !label.is_empty())
            .unwrap_or("-")
    ));
    md.push_str(&format!("| Mode | {} |\n", report.overview.mode));
    md.push_str(&format!(
        "| Duration | {} ms |\n",
        report.overview.duration_ms
    ));

    md.push_str("\n## Dataset\n\n");
    md.push_str("| Metric | Value |\n| --- | --- |\n");
    md.push_str(&format!(
        "| Gold Set | `{}` |\n",
        report.dataset.gold_set_path
    ));
    md.push_str(&format!(
        "| Gold Set SHA-256 | `{}` |\n",
        report.dataset.gold_set_checksum
    ));
    md.push_str(&format!(
        "| Passages | `{}` ({}) |\n",
        report.dataset.passages_path, report.dataset.passages_total
    ));
    md.push_str(&format!(
        "| Gold Entries | {} |\n",
        report.dataset.analysis.total_entries
    ));
    md.push_str(&format!(
        "| Entries With Entailment | {} ({:.1}%) |\n",
        report.dataset.analysis.entries_with_entailment,
        report.dataset.analysis.entailment_percentage
    ));
    md.push_str(&format!(
        "| Queries / Control Claims / NLI Triples | {} / {} / {} |\n",
        report.dataset.queries, report.dataset.control_claims, report.dataset.nli_triples
    ));
    if let Some(limit) = report.dataset.limit {
        md.push_str(&format!("| Limit | {limit} |\n"));
    }
    if let Some(embedding) = report.dataset.embedding.as_ref() {
        let label = match embedding.model.as_ref() {
            Some(model) => format!("{} ({model})", embedding.backend),
            None => embedding.backend.clone(),
        };
        md.push_str(&format!("| Embedding | {label} |\n"));
        md.push_str(&format!(
            "| Embedding Dim | {} |\n",
            embedding.dimension
        ));
        md.push_str(&format!(
            "| Passages Embedded | {} |\n",
            embedding.passages_embedded
        ));
    }

    md.push_str("\n## Settings\n\n");
    md.push_str("| Setting | Value |\n| --- | --- |\n");
    md.push_str(&format!(
        "| k | {} |\n",
        join_display(&report.settings.k_list)
    ));
    md.push_str(&format!(
        "| Reference k | {} |\n",
        report.settings.reference_k
    ));
    md.push_str(&format!(
        "| Methods | {} |\n",
        if report.settings.methods.is_empty() {
            "-".to_string()
        } else {
            join_display(&report.settings.methods)
        }
    ));
    md.push_str(&format!("| Top N | {} |\n", report.settings.top_n));
    md.push_str(&format!(
        "| Concurrency | {} |\n",
        report.settings.concurrency
    ));
    md.push_str(&format!(
        "| Timeout | {} s |\n",
        report.settings.timeout_secs
    ));
    md.push_str(&format!(
        "| Hybrid Candidates | {} |\n",
        report.settings.hybrid_candidates
    ));

    if let Some(retrieval) = report.retrieval.as_ref() {
        md.push_str("\n## Retrieval Metrics\n\n");
        for method in &retrieval.methods {
            render_method_metrics(&mut md, method);
        }

        md.push_str("\n## Retrieval Runs\n\n");
        md.push_str(
            "| Method | Queries | Failures | Latency Avg / P50 / P95 (ms) | Control Pass Rate |\n",
        );
        md.push_str("| --- | --- | --- | --- | --- |\n");
        for method in &retrieval.methods {
            md.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                method.method,
                method.queries,
                method.failures,
                latency_cell(&method.latency_ms),
                method.control_pass_rate.map_or_else(
                    || "-".to_string(),
                    |rate| format!(
                        "{:.1}% ({}/{})",
                        rate * 100.0,
                        method.controls.passed,
                        method.controls.total
                    )
                )
            ));
        }
        md.push_str(&format!(
            "\nTotal retrieval failures: {}\n",
            retrieval.total_failures
        ));
    }

    if let Some(comparison) = report.comparison.as_ref() {
        md.push_str(&format!(
            "\n## Method Comparison (k={})\n\n",
            comparison.reference_k
        ));
        md.push_str("| Metric | Ranking | Best |\n| --- | --- | --- |\n");
        for ranking in &comparison.rankings {
            let order = ranking
                .ranked
                .iter()
                .map(|entry| format!("{} ({:.3})", entry.method, entry.score))
                .collect::<Vec<_>>()
                .join(" > ");
            md.push_str(&format!(
                "| {} | {} | {} |\n",
                ranking.metric.label(),
                if order.is_empty() { "-".into() } else { order },
                ranking
                    .best()
                    .map_or_else(|| "-".to_string(), |best| best.method.to_string())
            ));
        }

        md.push_str("\n| Method | Wins | Win % |\n| --- | --- | --- |\n");
        for record in &comparison.wins {
            md.push_str(&format!(
                "| {} | {}/{} | {:.1} |\n",
                record.method, record.wins, record.cells, record.win_percentage
            ));
        }
        if let Some(best) = comparison.overall_best {
            md.push_str(&format!("\nOverall best method: **{best}**\n"));
        }
    }

    if let Some(nli) = report.nli.as_ref() {
        render_nli(&mut md, nli);
    }

    md.push_str("\n## Recommendations\n\n");
    if report.recommendations.is_empty() {
        md.push_str("_No recommendations._\n");
    } else {
        for recommendation in &report.recommendations {
            md.push_str(&format!("- {recommendation}\n"));
        }
    }

    if let Some(retrieval) = report.retrieval.as_ref() {
        let misses: Vec<_> = retrieval
            .methods
            .iter()
            .flat_map(|method| method.misses.iter().map(move |miss| (method.method, miss)))
            .collect();
        if misses.is_empty() {
            md.push_str("\n_Every evaluated query retrieved at least one relevant passage._\n");
        } else {
            md.push_str("\n## Missed Queries (sample)\n\n");
            md.push_str("| Method | Query ID | Claim | Relevant | Top Retrieved |\n");
            md.push_str("| --- | --- | --- | --- | --- |\n");
            for (method, miss) in misses {
                let retrieved = match miss.error.as_deref() {
                    Some(error) => format!("error: {}", escape_cell(error)),
                    None => render_ids(&miss.retrieved),
                };
                md.push_str(&format!(
                    "| {} | `{}` | {} | {} | {} |\n",
                    method,
                    miss.query_id,
                    escape_cell(&miss.claim),
                    render_ids(&miss.relevant),
                    retrieved
                ));
            }
        }
    }

    md.push_str("\n## Stage Timings\n\n");
    md.push_str("| Stage | Duration (ms) |\n| --- | --- |\n");
    let timings = &report.stage_timings;
    for (label, value) in [
        ("Load Data", timings.load_data_ms),
        ("Prepare Retrievers", timings.prepare_retrievers_ms),
        ("Run Retrieval", timings.run_retrieval_ms),
        ("Run NLI", timings.run_nli_ms),
        ("Summarize", timings.summarize_ms),
        ("Finalize", timings.finalize_ms),
    ] {
        md.push_str(&format!("| {label} | {value} |\n"));
    }

    md
}

fn render_method_metrics(md: &mut String, method: &MethodSection) {
    md.push_str(&format!("### {}\n\n", method.method));
    md.push_str("| k |");
    for metric in RankingMetric::ALL {
        md.push_str(&format!(" {} |", metric.label()));
    }
    md.push_str(" Queries |\n| --- |");
    for _ in RankingMetric::ALL {
        md.push_str(" --- |");
    }
    md.push_str(" --- |\n");
    for (k, cell) in &method.metrics {
        md.push_str(&format!("| {k} |"));
        for metric in RankingMetric::ALL {
            md.push_str(&format!(" {:.3} |", metric.value(&cell.metrics)));
        }
        md.push_str(&format!(" {} |\n", cell.queries));
    }
    md.push('\n');
}

fn render_nli(md: &mut String, nli: &NliSection) {
    md.push_str("\n## NLI Classification\n\n");
    md.push_str("| Metric | Value |\n| --- | --- |\n");
    md.push_str(&format!("| Attempted | {} |\n", nli.attempted));
    md.push_str(&format!("| Evaluated | {} |\n", nli.evaluated));
    md.push_str(&format!(
        "| Unavailable (timeouts) | {} ({}) |\n",
        nli.unavailable, nli.timeouts
    ));
    md.push_str(&format!(
        "| Latency Avg / P50 / P95 (ms) | {} |\n",
        latency_cell(&nli.latency_ms)
    ));

    let Some(report) = nli.report.as_ref() else {
        md.push_str("\n_No predictions were available to score._\n");
        render_unavailable(md, nli);
        return;
    };

    md.push_str(&format!(
        "| Accuracy | {:.3} ({}/{}) |\n",
        report.accuracy, report.correct, report.total
    ));
    md.push_str(&format!("| Macro F1 | {:.3} |\n", report.macro_avg.f1));
    md.push_str(&format!("| Micro F1 | {:.3} |\n", report.micro_avg.f1));

    md.push_str("\n| Label | Precision | Recall | F1 | Support |\n");
    md.push_str("| --- | --- | --- | --- | --- |\n");
    for (label, class) in &report.per_class {
        md.push_str(&format!(
            "| {label} | {:.3} | {:.3} | {:.3} | {} |\n",
            class.precision, class.recall, class.f1, class.support
        ));
    }
    md.push_str(&format!(
        "| Macro avg | {:.3} | {:.3} | {:.3} | {} |\n",
        report.macro_avg.precision, report.macro_avg.recall, report.macro_avg.f1, report.total
    ));
    md.push_str(&format!(
        "| Micro avg | {:.3} | {:.3} | {:.3} | {} |\n",
        report.micro_avg.precision, report.micro_avg.recall, report.micro_avg.f1, report.total
    ));

    md.push_str("\n### Confusion Matrix (gold rows, predicted columns)\n\n");
    md.push_str("| Gold \\ Predicted |");
    for label in NliLabel::ALL {
        md.push_str(&format!(" {label} |"));
    }
    md.push_str("\n| --- |");
    for _ in NliLabel::ALL {
        md.push_str(" --- |");
    }
    md.push('\n');
    for gold in NliLabel::ALL {
        md.push_str(&format!("| {gold} |"));
        for predicted in NliLabel::ALL {
            md.push_str(&format!(" {} |", report.confusion.count(gold, predicted)));
        }
        md.push('\n');
    }

    md.push_str("\n### Label Distribution\n\n");
    md.push_str("| Label | Gold | Predicted |\n| --- | --- | --- |\n");
    for label in NliLabel::ALL {
        md.push_str(&format!(
            "| {label} | {} | {} |\n",
            report.gold_distribution.get(&label).copied().unwrap_or(0),
            report.predicted_distribution.get(&label).copied().unwrap_or(0)
        ));
    }

    render_unavailable(md, nli);
}

fn render_unavailable(md: &mut String, nli: &NliSection) {
    if nli.unavailable_sample.is_empty() {
        return;
    }
    md.push_str("\n### Unavailable Predictions (sample)\n\n");
    md.push_str("| Triple ID | Timed Out | Reason |\n| --- | --- | --- |\n");
    for entry in &nli.unavailable_sample {
        md.push_str(&format!(
            "| `{}` | {} | {} |\n",
            entry.triple_id,
            bool_badge(entry.timed_out),
            escape_cell(&entry.reason)
        ));
    }
}

fn latency_cell(stats: &LatencyStats) -> String {
    format!("{:.1} / {} / {}", stats.avg, stats.p50, stats.p95)
}

fn bool_badge(value: bool) -> &'static str {
    if value {
        "✅"
    } else {
        "⚪"
    }
}

fn render_ids(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.iter()
            .take(3)
            .map(|id| format!("`{id}`"))
            .collect::<Vec<_>>()
            .join("<br>")
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
