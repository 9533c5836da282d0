pub mod nli;
pub mod retrieval;
