use std::{cmp::Reverse, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use common::{error::AppError, storage::index::PassageIndex};
use tracing::debug;

use crate::{
    concepts::{extract_concepts, ConceptIndex},
    scoring::ScoredPassage,
    RetrievalMethod, Retriever,
};

/// Ranks passages by how many distinct query concepts they mention.
pub struct ConceptRetriever {
    index: Arc<PassageIndex>,
    concepts: Arc<ConceptIndex>,
}

impl ConceptRetriever {
    pub fn new(index: Arc<PassageIndex>, concepts: Arc<ConceptIndex>) -> Self {
        Self { index, concepts }
    }

    /// Every passage sharing at least one concept with `query`. The score is
    /// the number of shared concepts; ties keep collection order.
    pub fn rank(&self, query: &str) -> Vec<ScoredPassage> {
        let query_concepts = extract_concepts(query);
        if query_concepts.is_empty() {
            return Vec::new();
        }

        let mut matches: HashMap<usize, usize> = HashMap::new();
        for key in &query_concepts {
            for position in self.concepts.postings(key) {
                *matches.entry(*position).or_default() += 1;
            }
        }

        let mut ordered: Vec<(usize, usize)> = matches.into_iter().collect();
        ordered.sort_by_key(|&(position, count)| (Reverse(count), position));

        debug!(
            concepts = query_concepts.len(),
            candidates = ordered.len(),
            "Concept candidates collected"
        );

        ordered
            .into_iter()
            .filter_map(|(position, count)| {
                self.index.passages().get(position).map(|passage| {
                    #[allow(clippy::cast_precision_loss)]
                    ScoredPassage::new(passage.id.clone(), position, count as f32)
                })
            })
            .collect()
    }
}

#[async_trait]
impl Retriever for ConceptRetriever {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Regex
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, AppError> {
        let mut ranked = self.rank(query);
        ranked.truncate(limit);
        Ok(ranked.into_iter().map(|candidate| candidate.id).collect())
    }
}
