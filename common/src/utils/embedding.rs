use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_openai::{config::OpenAIConfig, types::CreateEmbeddingRequestArgs, Client};
use fastembed::{EmbeddingModel, ModelTrait, TextEmbedding, TextInitOptions};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::utils::config::AppConfig;

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_DIMENSION: u32 = 1536;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingBackend {
    #[default]
    OpenAI,
    FastEmbed,
    Hashed,
}

impl std::str::FromStr for EmbeddingBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "hashed" => Ok(Self::Hashed),
            "fastembed" | "fast-embed" | "fast" => Ok(Self::FastEmbed),
            other => Err(anyhow!(
                "unknown embedding backend '{other}'. Expected 'openai', 'hashed', or 'fastembed'."
            )),
        }
    }
}

/// Text → vector collaborator used by the dense and hybrid retrievers and
/// by the passage index when stored embeddings are missing.
#[derive(Clone)]
pub struct EmbeddingProvider {
    kind: ProviderKind,
}

#[derive(Clone)]
enum ProviderKind {
    Remote {
        client: Arc<Client<OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Local {
        session: Arc<Mutex<TextEmbedding>>,
        model: EmbeddingModel,
        dimension: usize,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.kind {
            ProviderKind::Remote { .. } => "openai",
            ProviderKind::Local { .. } => "fastembed",
            ProviderKind::Hashed { .. } => "hashed",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.kind {
            ProviderKind::Remote { dimensions, .. } => *dimensions as usize,
            ProviderKind::Local { dimension, .. } | ProviderKind::Hashed { dimension } => *dimension,
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.kind {
            ProviderKind::Remote { model, .. } => Some(model.clone()),
            ProviderKind::Local { model, .. } => Some(model.to_string()),
            ProviderKind::Hashed { .. } => None,
        }
    }

    /// Embeds a single text; same vector as the matching slot of
    /// [`EmbeddingProvider::embed_batch`].
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let ProviderKind::Hashed { dimension } = &self.kind {
            return Ok(hashed_embedding(text, *dimension));
        }
        self.embed_batch(vec![text.to_owned()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("{} returned no embedding for input", self.backend_label()))
    }

    /// Embeds `texts` in order. The result always has one vector per input.
    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();

        let vectors = match &self.kind {
            ProviderKind::Hashed { dimension } => texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect(),
            ProviderKind::Local { session, .. } => session
                .lock()
                .await
                .embed(texts, None)
                .context("generating fastembed embeddings")?,
            ProviderKind::Remote {
                client,
                model,
                dimensions,
            } => remote_embeddings(client, model, *dimensions, texts).await?,
        };

        if vectors.len() != expected {
            return Err(anyhow!(
                "{} returned {} embeddings for {expected} inputs",
                self.backend_label(),
                vectors.len()
            ));
        }
        debug!(
            backend = self.backend_label(),
            count = expected,
            "Generated embedding batch"
        );
        Ok(vectors)
    }

    pub fn new_openai(client: Arc<Client<OpenAIConfig>>, model: String, dimensions: u32) -> Self {
        Self {
            kind: ProviderKind::Remote {
                client,
                model,
                dimensions,
            },
        }
    }

    /// Loads a local FastEmbed model on the blocking pool.
    pub async fn new_fastembed(model_override: Option<String>) -> Result<Self> {
        let model = match model_override {
            Some(code) => EmbeddingModel::from_str(&code).map_err(|err| anyhow!(err))?,
            None => EmbeddingModel::default(),
        };

        let options = TextInitOptions::new(model.clone()).with_show_download_progress(true);
        let lookup = model.clone();
        let (session, dimension) = tokio::task::spawn_blocking(move || -> Result<_> {
            let session =
                TextEmbedding::try_new(options).context("initialising FastEmbed text model")?;
            let dimension = EmbeddingModel::get_model_info(&lookup)
                .map(|info| info.dim)
                .ok_or_else(|| anyhow!("FastEmbed model metadata missing for {lookup}"))?;
            Ok((session, dimension))
        })
        .await
        .context("joining FastEmbed initialisation task")??;

        Ok(Self {
            kind: ProviderKind::Local {
                session: Arc::new(Mutex::new(session)),
                model,
                dimension,
            },
        })
    }

    /// Deterministic bag-of-words vectors; needs no network or model files.
    pub fn new_hashed(dimension: usize) -> Self {
        Self {
            kind: ProviderKind::Hashed {
                dimension: dimension.max(1),
            },
        }
    }
}

async fn remote_embeddings(
    client: &Client<OpenAIConfig>,
    model: &str,
    dimensions: u32,
    texts: Vec<String>,
) -> Result<Vec<Vec<f32>>> {
    let request = CreateEmbeddingRequestArgs::default()
        .model(model)
        .input(texts)
        .dimensions(dimensions)
        .build()
        .context("building embedding request")?;
    let response = client
        .embeddings()
        .create(request)
        .await
        .context("requesting embeddings")?;

    let mut data = response.data;
    data.sort_by_key(|item| item.index);
    Ok(data.into_iter().map(|item| item.embedding).collect())
}

/// Settings needed to construct an [`EmbeddingProvider`].
#[derive(Debug, Clone)]
pub struct EmbeddingSettings {
    pub backend: EmbeddingBackend,
    pub model: Option<String>,
    pub dimension: Option<usize>,
}

pub async fn build_provider(
    settings: &EmbeddingSettings,
    app_config: &AppConfig,
) -> Result<EmbeddingProvider> {
    let provider = match settings.backend {
        EmbeddingBackend::Hashed => EmbeddingProvider::new_hashed(settings.dimension.unwrap_or(256)),
        EmbeddingBackend::FastEmbed => {
            EmbeddingProvider::new_fastembed(settings.model.clone()).await?
        }
        EmbeddingBackend::OpenAI => {
            let api_key = app_config.require_openai_key()?;
            let client = Client::with_config(
                OpenAIConfig::new()
                    .with_api_key(api_key)
                    .with_api_base(&app_config.openai_base_url),
            );
            let dimensions = match settings.dimension {
                Some(value) => u32::try_from(value)
                    .with_context(|| format!("embedding dimension {value} is out of range"))?,
                None => DEFAULT_OPENAI_DIMENSION,
            };
            EmbeddingProvider::new_openai(
                Arc::new(client),
                settings
                    .model
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
                dimensions,
            )
        }
    };

    info!(
        backend = provider.backend_label(),
        model = provider.model_code().as_deref().unwrap_or("<default>"),
        dimension = provider.dimension(),
        "Embedding provider ready"
    );

    Ok(provider)
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    for token in tokens(text) {
        if let Some(slot) = vector.get_mut(bucket(&token, dim)) {
            *slot += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    usize::try_from(hasher.finish() % dimension as u64).unwrap_or(0)
}
