use std::sync::Arc;

use async_trait::async_trait;
use common::{
    error::AppError, storage::index::PassageIndex, utils::embedding::EmbeddingProvider,
};
use tracing::debug;

use crate::{
    scoring::{cosine_similarity, sort_by_score_desc, ScoredPassage},
    RetrievalMethod, Retriever,
};

/// Cosine-similarity retrieval over the passage embeddings.
pub struct DenseRetriever {
    index: Arc<PassageIndex>,
    embedder: EmbeddingProvider,
}

impl DenseRetriever {
    pub fn new(index: Arc<PassageIndex>, embedder: EmbeddingProvider) -> Self {
        Self { index, embedder }
    }

    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, AppError> {
        let embedding = self.embedder.embed(query).await?;
        if embedding.len() != self.embedder.dimension() {
            return Err(AppError::Embedding(format!(
                "query embedding has dimension {}, expected {}",
                embedding.len(),
                self.embedder.dimension()
            )));
        }
        Ok(embedding)
    }

    /// All passages with positive similarity to `query_embedding`, best first.
    pub fn rank(&self, query_embedding: &[f32]) -> Vec<ScoredPassage> {
        rank_by_embedding(&self.index, query_embedding, None)
    }

    /// Same as [`Self::rank`] but restricted to the given positions.
    pub fn rank_positions(&self, query_embedding: &[f32], positions: &[usize]) -> Vec<ScoredPassage> {
        rank_by_embedding(&self.index, query_embedding, Some(positions))
    }
}

/// Scores passages that carry an embedding and keeps similarities above zero.
/// Equal similarities are ordered by passage id.
pub fn rank_by_embedding(
    index: &PassageIndex,
    query_embedding: &[f32],
    positions: Option<&[usize]>,
) -> Vec<ScoredPassage> {
    let passages = index.passages();
    let candidates: Box<dyn Iterator<Item = usize>> = match positions {
        Some(positions) => Box::new(positions.iter().copied()),
        None => Box::new(0..passages.len()),
    };

    let mut scored: Vec<ScoredPassage> = candidates
        .filter_map(|position| {
            let passage = passages.get(position)?;
            let embedding = passage.embedding.as_deref()?;
            let score = cosine_similarity(query_embedding, embedding);
            (score > 0.0).then(|| ScoredPassage::new(passage.id.clone(), position, score))
        })
        .collect();
    sort_by_score_desc(&mut scored);
    scored
}

#[async_trait]
impl Retriever for DenseRetriever {
    fn method(&self) -> RetrievalMethod {
        RetrievalMethod::Dense
    }

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, AppError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embed_query(query).await?;
        let mut ranked = self.rank(&embedding);
        debug!(candidates = ranked.len(), "Dense candidates scored");
        ranked.truncate(limit);
        Ok(ranked.into_iter().map(|candidate| candidate.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use common::storage::types::passage::Passage;

    use super::*;

    fn hand_made_index() -> PassageIndex {
        PassageIndex::new(vec![
            Passage::new("b", "second").with_embedding(vec![1.0, 0.0, 0.0]),
            Passage::new("a", "first").with_embedding(vec![1.0, 0.0, 0.0]),
            Passage::new("c", "tilted").with_embedding(vec![1.0, 1.0, 0.0]),
            Passage::new("d", "orthogonal").with_embedding(vec![0.0, 0.0, 1.0]),
            Passage::new("e", "opposite").with_embedding(vec![-1.0, 0.0, 0.0]),
            Passage::new("f", "unembedded"),
        ])
    }

    #[test]
    fn keeps_positive_similarities_and_breaks_ties_by_id() {
        let ranked = rank_by_embedding(&hand_made_index(), &[1.0, 0.0, 0.0], None);
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(ranked[0].position, 1);
    }

    #[test]
    fn restricts_to_given_positions() {
        let ranked = rank_by_embedding(&hand_made_index(), &[1.0, 0.0, 0.0], Some(&[2, 3, 4]));
        let ids: Vec<&str> = ranked.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c"]);
    }

    #[tokio::test]
    async fn retrieves_the_passage_with_identical_text_first() {
        let resources = crate::test_support::sample_resources().await;
        let retriever = DenseRetriever::new(
            Arc::clone(&resources.index),
            EmbeddingProvider::new_hashed(64),
        );

        let ids = retriever
            .retrieve("Sea level rise accelerated over the last century.", 2)
            .await
            .unwrap();

        assert_eq!(ids.first().map(String::as_str), Some("s3"));
        assert!(ids.len() <= 2);
        assert!(retriever.retrieve("anything", 0).await.unwrap().is_empty());
    }
}
