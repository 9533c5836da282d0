use state_machines::state_machine;

state_machine! {
    name: EvaluationMachine,
    state: EvaluationState,
    initial: Ready,
    states: [Ready, DataLoaded, RetrieversReady, RetrievalEvaluated, NliEvaluated, Summarized, Completed, Failed],
    events {
        load_data { transition: { from: Ready, to: DataLoaded } }
        prepare_retrievers { transition: { from: DataLoaded, to: RetrieversReady } }
        run_retrieval { transition: { from: RetrieversReady, to: RetrievalEvaluated } }
        run_nli { transition: { from: RetrievalEvaluated, to: NliEvaluated } }
        summarize { transition: { from: NliEvaluated, to: Summarized } }
        finalize { transition: { from: Summarized, to: Completed } }
        abort {
            transition: { from: Ready, to: Failed }
            transition: { from: DataLoaded, to: Failed }
            transition: { from: RetrieversReady, to: Failed }
            transition: { from: RetrievalEvaluated, to: Failed }
            transition: { from: NliEvaluated, to: Failed }
            transition: { from: Summarized, to: Failed }
            transition: { from: Completed, to: Failed }
        }
    }
}

pub fn ready() -> EvaluationMachine<(), Ready> {
    EvaluationMachine::new(())
}
