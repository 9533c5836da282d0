mod context;
mod stages;
mod state;

use anyhow::Result;
use common::utils::config::AppConfig;

use crate::{
    args::{Config, ServiceSettings},
    types::EvaluationSummary,
};

use context::EvaluationContext;

pub async fn run_evaluation(
    config: &Config,
    app_config: &AppConfig,
    services: &ServiceSettings,
) -> Result<EvaluationSummary> {
    let mut ctx = EvaluationContext::new(config, app_config, services);
    let machine = state::ready();

    let machine = stages::load_data(machine, &mut ctx).await?;
    let machine = stages::prepare_retrievers(machine, &mut ctx).await?;
    let machine = stages::run_retrieval(machine, &mut ctx).await?;
    let machine = stages::run_nli(machine, &mut ctx).await?;
    let machine = stages::summarize(machine, &mut ctx).await?;
    let machine = stages::finalize(machine, &mut ctx).await?;

    drop(machine);

    ctx.into_summary()
}
