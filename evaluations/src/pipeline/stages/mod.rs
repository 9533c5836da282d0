mod finalize;
mod load_data;
mod prepare_retrievers;
mod run_nli;
mod run_retrieval;
mod summarize;

pub(crate) use finalize::finalize;
pub(crate) use load_data::load_data;
pub(crate) use prepare_retrievers::prepare_retrievers;
pub(crate) use run_nli::run_nli;
pub(crate) use run_retrieval::run_retrieval;
pub(crate) use summarize::summarize;

use anyhow::Result;
use state_machines::core::GuardError;

use super::state::EvaluationMachine;

fn map_guard_error(event: &str, guard: GuardError) -> anyhow::Error {
    anyhow::anyhow!("invalid evaluation pipeline transition during {event}: {guard:?}")
}

type StageResult<S> = Result<EvaluationMachine<(), S>>;
