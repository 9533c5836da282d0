use std::collections::HashMap;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
    error::AppError,
    storage::types::passage::Passage,
    utils::embedding::EmbeddingProvider,
};

const EMBED_BATCH_SIZE: usize = 64;

/// Immutable in-memory snapshot of the passages collection.
///
/// Positions are stable for the lifetime of the index and follow the order of
/// the passages file.
#[derive(Debug, Clone, Default)]
pub struct PassageIndex {
    passages: Vec<Passage>,
    positions: HashMap<String, usize>,
}

impl PassageIndex {
    pub fn new(passages: Vec<Passage>) -> Self {
        let positions = passages
            .iter()
            .enumerate()
            .map(|(idx, passage)| (passage.id.clone(), idx))
            .collect();
        Self {
            passages,
            positions,
        }
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    pub fn get(&self, id: &str) -> Option<&Passage> {
        self.position(id).and_then(|idx| self.passages.get(idx))
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Fills in embeddings for passages that have none, or whose stored vector
    /// does not match the provider dimension. Returns how many were embedded.
    pub async fn ensure_embeddings(
        &mut self,
        provider: &EmbeddingProvider,
    ) -> Result<usize, AppError> {
        let dimension = provider.dimension();
        let pending: Vec<usize> = self
            .passages
            .iter()
            .enumerate()
            .filter(|(_, passage)| {
                passage
                    .embedding
                    .as_ref()
                    .map_or(true, |embedding| embedding.len() != dimension)
            })
            .map(|(idx, _)| idx)
            .collect();

        if pending.is_empty() {
            return Ok(0);
        }

        let mismatched = pending
            .iter()
            .filter(|idx| {
                self.passages
                    .get(**idx)
                    .is_some_and(|passage| passage.embedding.is_some())
            })
            .count();
        if mismatched > 0 {
            warn!(
                mismatched,
                expected_dimension = dimension,
                backend = provider.backend_label(),
                "Stored passage embeddings do not match the provider dimension; re-embedding"
            );
        }

        for batch in pending.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<String> = batch
                .iter()
                .filter_map(|idx| self.passages.get(*idx).map(|p| p.text.clone()))
                .collect();
            let vectors = provider
                .embed_batch(texts)
                .await
                .context("embedding passages for the in-memory index")?;
            if vectors.len() != batch.len() {
                return Err(AppError::Embedding(format!(
                    "expected {} passage embeddings, received {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            for (idx, vector) in batch.iter().zip(vectors) {
                if let Some(passage) = self.passages.get_mut(*idx) {
                    passage.embedding = Some(vector);
                }
            }
        }

        info!(
            embedded = pending.len(),
            total = self.passages.len(),
            backend = provider.backend_label(),
            "Passage index embeddings ready"
        );
        Ok(pending.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embeds_missing_and_mismatched_vectors_only() {
        let provider = EmbeddingProvider::new_hashed(8);
        let mut index = PassageIndex::new(vec![
            Passage::new("s1", "carbon dioxide").with_embedding(vec![0.5; 8]),
            Passage::new("s2", "methane"),
            Passage::new("s3", "aerosols").with_embedding(vec![1.0; 3]),
        ]);

        let embedded = index.ensure_embeddings(&provider).await.unwrap();

        assert_eq!(embedded, 2);
        assert_eq!(index.get("s1").unwrap().embedding, Some(vec![0.5; 8]));
        assert_eq!(index.get("s3").unwrap().embedding.as_ref().unwrap().len(), 8);
        assert_eq!(index.position("s2"), Some(1));
        assert!(index.get("s9").is_none());
    }
}
