pub mod concept_match;
pub mod concepts;
pub mod hybrid;
pub mod scoring;
pub mod vector;

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use common::{
    error::AppError, storage::index::PassageIndex, utils::embedding::EmbeddingProvider,
};
use serde::{Deserialize, Serialize};

pub use concept_match::ConceptRetriever;
pub use concepts::ConceptIndex;
pub use hybrid::HybridRetriever;
pub use scoring::RrfConfig;
pub use vector::DenseRetriever;

/// The retrieval methods the harness can compare.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum RetrievalMethod {
    /// Regex concept matching against the concept index
    Regex,
    /// Cosine similarity over passage embeddings
    Dense,
    /// Concept candidates reranked by embeddings and fused with dense results
    Hybrid,
}

impl RetrievalMethod {
    pub const ALL: [RetrievalMethod; 3] = [
        RetrievalMethod::Regex,
        RetrievalMethod::Dense,
        RetrievalMethod::Hybrid,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            RetrievalMethod::Regex => "regex",
            RetrievalMethod::Dense => "dense",
            RetrievalMethod::Hybrid => "hybrid",
        }
    }

    pub const fn needs_embeddings(self) -> bool {
        matches!(self, RetrievalMethod::Dense | RetrievalMethod::Hybrid)
    }
}

impl fmt::Display for RetrievalMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability shared by every retrieval method: an ordered list of passage ids
/// for a query, at most `limit` long. Implementations are deterministic for a
/// fixed index snapshot.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn method(&self) -> RetrievalMethod;

    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<String>, AppError>;
}

#[derive(Debug, Clone, Copy)]
pub struct RetrieverSettings {
    /// Concept candidates kept after embedding rerank in the hybrid method
    pub hybrid_candidates: usize,
    pub rrf: RrfConfig,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            hybrid_candidates: 3,
            rrf: RrfConfig::default(),
        }
    }
}

/// Shared, read-only state the retrievers are built from.
#[derive(Clone)]
pub struct RetrievalResources {
    pub index: Arc<PassageIndex>,
    pub concepts: Arc<ConceptIndex>,
    pub embedder: Option<EmbeddingProvider>,
}

impl RetrievalResources {
    pub fn new(index: Arc<PassageIndex>, embedder: Option<EmbeddingProvider>) -> Self {
        let concepts = Arc::new(ConceptIndex::build(index.passages()));
        Self {
            index,
            concepts,
            embedder,
        }
    }

    fn embedder_for(&self, method: RetrievalMethod) -> Result<EmbeddingProvider, AppError> {
        self.embedder.clone().ok_or_else(|| {
            AppError::Validation(format!(
                "retrieval method '{method}' requires an embedding provider"
            ))
        })
    }
}

/// Constructs the retriever for `method`. Selection happens once, here.
pub fn build_retriever(
    method: RetrievalMethod,
    resources: &RetrievalResources,
    settings: RetrieverSettings,
) -> Result<Arc<dyn Retriever>, AppError> {
    let retriever: Arc<dyn Retriever> = match method {
        RetrievalMethod::Regex => Arc::new(ConceptRetriever::new(
            Arc::clone(&resources.index),
            Arc::clone(&resources.concepts),
        )),
        RetrievalMethod::Dense => Arc::new(DenseRetriever::new(
            Arc::clone(&resources.index),
            resources.embedder_for(method)?,
        )),
        RetrievalMethod::Hybrid => Arc::new(HybridRetriever::new(
            ConceptRetriever::new(
                Arc::clone(&resources.index),
                Arc::clone(&resources.concepts),
            ),
            DenseRetriever::new(Arc::clone(&resources.index), resources.embedder_for(method)?),
            settings,
        )),
    };
    Ok(retriever)
}

#[cfg(test)]
pub(crate) mod test_support {
    use common::storage::types::passage::Passage;

    use super::*;

    pub fn sample_passages() -> Vec<Passage> {
        vec![
            Passage::new("s1", "Global CO2 emissions from fossil fuels reached a record high."),
            Passage::new("s2", "Methane emissions from agriculture continue to rise."),
            Passage::new("s3", "Sea level rise accelerated over the last century."),
            Passage::new("s4", "Carbon dioxide removal is needed to reach net zero."),
            Passage::new("s5", "Coral reefs face bleaching under marine heatwaves."),
        ]
    }

    pub async fn sample_resources() -> RetrievalResources {
        let embedder = EmbeddingProvider::new_hashed(64);
        let mut index = PassageIndex::new(sample_passages());
        index
            .ensure_embeddings(&embedder)
            .await
            .expect("embedding sample passages");
        RetrievalResources::new(Arc::new(index), Some(embedder))
    }
}
