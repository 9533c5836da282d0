mod args;
mod metrics;
mod pipeline;
mod report;
mod runner;
mod types;

use anyhow::Context;
use tokio::runtime::Builder;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    let threads = std::thread::available_parallelism()?.get();
    let runtime = Builder::new_multi_thread()
        .enable_all()
        .worker_threads(threads)
        .thread_name("climate-eval-worker")
        .build()
        .context("failed to create tokio runtime")?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let parsed = args::parse()?;
    let config = parsed.config;

    let filter = config
        .log_level
        .clone()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());
    let _ = fmt()
        .with_env_filter(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let app_config = common::utils::config::get_config().context("loading app configuration")?;
    let services = config.preflight(&app_config)?;

    info!(
        mode = %config.mode,
        gold_set = %config.gold_set.display(),
        passages = %config.passages.display(),
        k = ?config.k,
        methods = ?config.methods,
        "Running climate claim evaluation"
    );
    let summary = pipeline::run_evaluation(&config, &app_config, &services)
        .await
        .context("running evaluation")?;

    args::ensure_dir(config.report_dir.as_path())?;
    let outcome = report::write_reports(&summary, config.report_dir.as_path(), config.sample)
        .with_context(|| format!("writing reports to {}", config.report_dir.display()))?;

    print!("{}", report::render_console_summary(&outcome.report));

    let headline = outcome
        .report
        .comparison
        .as_ref()
        .and_then(|comparison| comparison.overall_best)
        .map(|best| format!("best method {best}"))
        .unwrap_or_else(|| "no retrieval comparison".to_string());
    let nli_note = summary
        .nli
        .as_ref()
        .and_then(|nli| nli.report.as_ref())
        .map(|nli| format!(" | NLI macro F1 {:.3}", nli.macro_avg.f1))
        .unwrap_or_default();
    println!(
        "[{run_id}] {headline}{nli_note} → JSON: {json} | Markdown: {md} | History: {history}",
        run_id = outcome.run_id,
        json = outcome.paths.json.display(),
        md = outcome.paths.markdown.display(),
        history = outcome.history_path.display(),
    );

    Ok(())
}
