use async_trait::async_trait;
use common::error::AppError;
use tracing::debug;

use crate::{
    concept_match::ConceptRetriever,
    scoring::{reciprocal_rank_fusion, ScoredPassage},
    vector::DenseRetriever,
    RetrievalMethod, Retriever, RetrieverSettings,
};

/// Concept candidates reranked by embedding similarity, then fused with the
/// dense ranking.
pub struct HybridRetriever {
    concept: ConceptRetriever,
    dense: DenseRetriever,
    settings: RetrieverSettings,
}

impl HybridRetriever {
    pub fn new(concept: ConceptRetriever, dense: DenseRetriever, settings: RetrieverSettings) -> Self {
        Self {
            concept,
            dense,
            settings,
        }
    }

    async fn rank(&self, query: &str, limit: usize) -> Result<Vec<ScoredPassage>, AppError> {
        let embedding = self.dense.embed_query(query).await?;

        let concept_positions: Vec<usize> = self
            .concept
            .rank(query)
            .into_iter()
            .map(|candidate| candidate.position)
            .collect();
        let mut reranked = self.dense.rank_positions(&embedding, &concept_positions);
        reranked.truncate(self.settings.hybrid_candidates);

        let mut dense_ranked = self.dense.rank(&embedding);
        dense_ranked.truncate(limit);

        debug!(
            concept_candidates = concept_positions.len(),
            reranked = reranked.len(),
            dense = dense_ranked.len(),
            "Fusing hybrid candidates"
        );

        let mut fused = reciprocal_rank_fusion(&dense_ranked, &reranked, self.settings.rrf);
        fused.truncate(limit);
        Ok(fused)
    }
}

#[async_trait]
impl Retriever for HybridRetriever {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Hybrid
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let fused = self.rank(query, limit).await?;
        Ok(fused.into_iter().map(|candidate| candidate.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use common::utils::embedding::EmbeddingProvider;

    use super::*;
    use crate::{test_support::sample_resources, RetrievalResources};

    fn hybrid(resources: &RetrievalResources, hybrid_candidates: usize) -> HybridRetriever {
        HybridRetriever::new(
            ConceptRetriever::new(
                Arc::clone(&resources.index),
                Arc::clone(&resources.concepts),
            ),
            DenseRetriever::new(Arc::clone(&resources.index), EmbeddingProvider::new_hashed(64)),
            RetrieverSettings {
                hybrid_candidates,
                ..RetrieverSettings::default()
            },
        )
    }

    #[tokio::test]
    async fn results_are_unique_bounded_and_deterministic() {
        let resources = sample_resources().await;
        let retriever = hybrid(&resources, 3);
        let query = "Methane and CO2 emissions from fossil fuels";

        let first = retriever.retrieve(query, 3).await.unwrap();
        let second = retriever.retrieve(query, 3).await.unwrap();

        assert_eq!(first, second);
        assert!(first.len() <= 3);
        let unique: HashSet<&String> = first.iter().collect();
        assert_eq!(unique.len(), first.len());
    }

    #[tokio::test]
    async fn concept_candidates_are_promoted() {
        let resources = sample_resources().await;
        let retriever = hybrid(&resources, 3);
        let query = "Global CO2 emissions from fossil fuels reached a record high.";

        let ids = retriever.retrieve(query, 5).await.unwrap();

        // s1 is both the closest embedding and the best concept match.
        assert_eq!(ids.first().map(String::as_str), Some("s1"));
        assert!(retriever.retrieve(query, 0).await.unwrap().is_empty());
    }
}
