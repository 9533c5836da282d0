pub mod index;
pub mod jsonl;
pub mod judgments;
pub mod types;
