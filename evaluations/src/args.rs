use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use common::utils::{
    config::AppConfig,
    embedding::{EmbeddingBackend as ProviderBackend, EmbeddingSettings},
};
use retrieval_pipeline::{RetrievalMethod, RetrieverSettings};

fn workspace_root() -> PathBuf {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    manifest_dir.parent().unwrap_or(&manifest_dir).to_path_buf()
}

fn default_report_dir() -> PathBuf {
    workspace_root().join("evaluations/reports")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    #[default]
    OpenAI,
    FastEmbed,
    Hashed,
}

impl fmt::Display for EmbeddingBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAI => write!(f, "openai"),
            Self::FastEmbed => write!(f, "fastembed"),
            Self::Hashed => write!(f, "hashed"),
        }
    }
}

impl From<EmbeddingBackend> for ProviderBackend {
    fn from(value: EmbeddingBackend) -> Self {
        match value {
            EmbeddingBackend::OpenAI => Self::OpenAI,
            EmbeddingBackend::FastEmbed => Self::FastEmbed,
            EmbeddingBackend::Hashed => Self::Hashed,
        }
    }
}

/// Which evaluations a run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[value(rename_all = "lowercase")]
pub enum EvalMode {
    Retrieval,
    Nli,
    #[default]
    All,
}

impl EvalMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Nli => "nli",
            Self::All => "all",
        }
    }

    pub const fn runs_retrieval(self) -> bool {
        matches!(self, Self::Retrieval | Self::All)
    }

    pub const fn runs_nli(self) -> bool {
        matches!(self, Self::Nli | Self::All)
    }
}

impl fmt::Display for EvalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Gold set JSONL (id, claim, evidence, entailment)
    #[arg(long)]
    pub gold_set: PathBuf,

    /// Passages JSONL (id, text, embedding, source)
    #[arg(long)]
    pub passages: PathBuf,

    /// Directory to write evaluation reports
    #[arg(long, default_value_os_t = default_report_dir())]
    pub report_dir: PathBuf,

    /// Rank cutoffs, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = [1usize, 3, 5, 10])]
    pub k: Vec<usize>,

    /// Retrieval methods to compare, comma separated
    #[arg(long, value_delimiter = ',', default_values_t = RetrievalMethod::ALL)]
    pub methods: Vec<RetrievalMethod>,

    /// Evaluations to run
    #[arg(long, default_value_t = EvalMode::All)]
    pub mode: EvalMode,

    /// Cutoff used for method rankings and recommendations
    #[arg(long, default_value_t = 5)]
    pub reference_k: usize,

    /// Limit the number of claims evaluated (0 = all)
    #[arg(long = "limit", default_value_t = 0)]
    pub limit_arg: usize,

    /// Concurrent calls to retrievers and the NLI endpoint
    #[arg(long, default_value_t = 4)]
    pub concurrency: usize,

    /// Per-call timeout for retrievers and the NLI endpoint
    #[arg(long, default_value_t = 30)]
    pub timeout_secs: u64,

    /// Result-count limit passed to every retriever
    #[arg(long, default_value_t = 10)]
    pub top_n: usize,

    /// Concept candidates kept after embedding rerank in the hybrid method
    #[arg(long, default_value_t = 3)]
    pub hybrid_candidates: usize,

    /// Embedding backend for dense and hybrid retrieval
    #[arg(long, default_value_t = EmbeddingBackend::default())]
    pub embedding_backend: EmbeddingBackend,

    /// Embedding model code (openai or fastembed)
    #[arg(long)]
    pub embedding_model: Option<String>,

    /// Embedding dimension (openai or hashed)
    #[arg(long)]
    pub embedding_dimension: Option<usize>,

    /// Annotate the run; label is stored in JSON/Markdown reports
    #[arg(long)]
    pub label: Option<String>,

    /// Log filter, overrides RUST_LOG
    #[arg(long)]
    pub log_level: Option<String>,

    /// Number of misses per method to surface in the Markdown summary
    #[arg(long, default_value_t = 5)]
    pub sample: usize,

    // Computed fields (not arguments)
    #[arg(skip)]
    pub limit: Option<usize>,
    #[arg(skip)]
    pub resolved_reference_k: usize,
}

impl Config {
    pub fn finalize(&mut self) -> Result<()> {
        if !self.gold_set.is_file() {
            return Err(anyhow!(
                "--gold-set {} does not exist or is not a file",
                self.gold_set.display()
            ));
        }
        if !self.passages.is_file() {
            return Err(anyhow!(
                "--passages {} does not exist or is not a file",
                self.passages.display()
            ));
        }

        self.k.sort_unstable();
        self.k.dedup();
        if self.k.is_empty() {
            return Err(anyhow!("--k requires at least one cutoff"));
        }
        if self.k.contains(&0) {
            return Err(anyhow!("--k cutoffs must be greater than zero"));
        }

        self.methods.sort_unstable();
        self.methods.dedup();
        if self.mode.runs_retrieval() && self.methods.is_empty() {
            return Err(anyhow!("--methods requires at least one retrieval method"));
        }

        if self.reference_k == 0 {
            return Err(anyhow!("--reference-k must be greater than zero"));
        }
        self.resolved_reference_k = resolve_reference_k(&self.k, self.reference_k)
            .ok_or_else(|| anyhow!("--k requires at least one cutoff"))?;

        self.limit = if self.limit_arg == 0 {
            None
        } else {
            Some(self.limit_arg)
        };

        if self.concurrency == 0 {
            return Err(anyhow!("--concurrency must be greater than zero"));
        }
        if self.timeout_secs == 0 {
            return Err(anyhow!("--timeout-secs must be greater than zero"));
        }
        if self.hybrid_candidates == 0 {
            return Err(anyhow!("--hybrid-candidates must be greater than zero"));
        }

        let max_k = self.k.last().copied().unwrap_or_default();
        if self.top_n < max_k {
            return Err(anyhow!(
                "--top-n ({}) must be at least the largest --k cutoff ({max_k})",
                self.top_n
            ));
        }

        if self.embedding_backend == EmbeddingBackend::Hashed && self.embedding_model.is_some() {
            return Err(anyhow!(
                "--embedding-model cannot be used with the 'hashed' embedding backend"
            ));
        }
        if self.embedding_dimension == Some(0) {
            return Err(anyhow!("--embedding-dimension must be greater than zero"));
        }
        if let Some(model) = &self.embedding_model {
            if model.trim().is_empty() {
                return Err(anyhow!("--embedding-model requires a non-empty model name"));
            }
        }

        if let Some(label) = self.label.take() {
            let trimmed = label.trim();
            if !trimmed.is_empty() {
                self.label = Some(trimmed.to_string());
            }
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn needs_embeddings(&self) -> bool {
        self.mode.runs_retrieval() && self.methods.iter().any(|m| m.needs_embeddings())
    }

    pub fn embedding_settings(&self) -> EmbeddingSettings {
        EmbeddingSettings {
            backend: self.embedding_backend.into(),
            model: self.embedding_model.clone(),
            dimension: self.embedding_dimension,
        }
    }

    pub fn retriever_settings(&self) -> RetrieverSettings {
        RetrieverSettings {
            hybrid_candidates: self.hybrid_candidates,
            ..RetrieverSettings::default()
        }
    }

    /// Validates the external services this run will call. Must run before
    /// the pipeline loads any data.
    pub fn preflight(&self, app_config: &AppConfig) -> Result<ServiceSettings> {
        if self.needs_embeddings() && self.embedding_backend == EmbeddingBackend::OpenAI {
            app_config
                .require_openai_key()
                .context("configuring the openai embedding backend")?;
        }

        let nli = if self.mode.runs_nli() {
            let (endpoint, api_key) = app_config
                .require_nli_endpoint()
                .context("configuring the NLI classifier")?;
            Some(NliEndpoint {
                url: endpoint.to_string(),
                api_key: api_key.map(str::to_string),
                max_retries: app_config.nli_max_retries,
            })
        } else {
            None
        };

        Ok(ServiceSettings { nli })
    }
}

/// Connection details for the NLI classifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NliEndpoint {
    pub url: String,
    pub api_key: Option<String>,
    pub max_retries: usize,
}

/// External-service settings checked by [`Config::preflight`].
#[derive(Debug, Clone, Default)]
pub struct ServiceSettings {
    pub nli: Option<NliEndpoint>,
}

/// The configured reference k if present, else the largest cutoff below it,
/// else the smallest cutoff.
pub fn resolve_reference_k(k_list: &[usize], reference: usize) -> Option<usize> {
    if k_list.contains(&reference) {
        return Some(reference);
    }
    k_list
        .iter()
        .copied()
        .filter(|k| *k < reference)
        .max()
        .or_else(|| k_list.iter().copied().min())
}

pub struct ParsedArgs {
    pub config: Config,
}

pub fn parse() -> Result<ParsedArgs> {
    let mut config = Config::parse();
    config.finalize()?;
    Ok(ParsedArgs { config })
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("creating directory {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn config_for(dir: &Path, extra: &[&str]) -> Config {
        let gold = dir.join("gold.jsonl");
        let passages = dir.join("passages.jsonl");
        fs::write(&gold, "").unwrap();
        fs::write(&passages, "").unwrap();
        let mut argv = vec![
            "evaluations".to_string(),
            "--gold-set".into(),
            gold.display().to_string(),
            "--passages".into(),
            passages.display().to_string(),
        ];
        argv.extend(extra.iter().map(|arg| (*arg).to_string()));
        Config::parse_from(argv)
    }

    #[test]
    fn defaults_match_documented_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path(), &[]);
        config.finalize().unwrap();

        assert_eq!(config.k, vec![1, 3, 5, 10]);
        assert_eq!(config.methods, RetrievalMethod::ALL.to_vec());
        assert_eq!(config.mode, EvalMode::All);
        assert_eq!(config.resolved_reference_k, 5);
        assert_eq!(config.top_n, 10);
        assert_eq!(config.hybrid_candidates, 3);
        assert!(config.limit.is_none());
    }

    #[test]
    fn parses_comma_separated_lists() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(
            dir.path(),
            &["--k", "10,1,3,3", "--methods", "hybrid,regex", "--limit", "7"],
        );
        config.finalize().unwrap();

        assert_eq!(config.k, vec![1, 3, 10]);
        assert_eq!(
            config.methods,
            vec![RetrievalMethod::Regex, RetrievalMethod::Hybrid]
        );
        assert_eq!(config.resolved_reference_k, 3);
        assert_eq!(config.limit, Some(7));
    }

    #[test]
    fn rejects_bad_configuration_before_work_starts() {
        let dir = tempfile::tempdir().unwrap();

        let mut zero_k = config_for(dir.path(), &["--k", "0,5"]);
        assert!(zero_k.finalize().is_err());

        let mut short_top_n = config_for(dir.path(), &["--top-n", "3"]);
        assert!(short_top_n.finalize().is_err());

        let mut hashed_model = config_for(
            dir.path(),
            &["--embedding-backend", "hashed", "--embedding-model", "x"],
        );
        assert!(hashed_model.finalize().is_err());

        let mut missing = config_for(dir.path(), &[]);
        missing.gold_set = dir.path().join("absent.jsonl");
        assert!(missing.finalize().is_err());

        assert!(Config::try_parse_from([
            "evaluations",
            "--gold-set",
            "g",
            "--passages",
            "p",
            "--methods",
            "bm25",
        ])
        .is_err());
    }

    #[test]
    fn preflight_requires_nli_endpoint_when_nli_runs() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_for(dir.path(), &["--methods", "regex"]);
        config.finalize().unwrap();

        let err = config.preflight(&AppConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("NLI_ENDPOINT"));

        let app_config = AppConfig {
            nli_endpoint: Some("http://localhost:8080/score".into()),
            nli_max_retries: 2,
            ..AppConfig::default()
        };
        let services = config.preflight(&app_config).unwrap();
        assert_eq!(
            services.nli,
            Some(NliEndpoint {
                url: "http://localhost:8080/score".into(),
                api_key: None,
                max_retries: 2,
            })
        );
    }

    #[test]
    fn preflight_checks_openai_key_only_for_dense_methods() {
        let dir = tempfile::tempdir().unwrap();

        let mut dense = config_for(dir.path(), &["--mode", "retrieval", "--methods", "dense"]);
        dense.finalize().unwrap();
        let err = dense.preflight(&AppConfig::default()).unwrap_err();
        assert!(format!("{err:#}").contains("OPENAI_API_KEY"));

        let mut hashed = config_for(
            dir.path(),
            &["--mode", "retrieval", "--methods", "dense", "--embedding-backend", "hashed"],
        );
        hashed.finalize().unwrap();
        let services = hashed.preflight(&AppConfig::default()).unwrap();
        assert!(services.nli.is_none());

        let mut regex_only = config_for(dir.path(), &["--mode", "retrieval", "--methods", "regex"]);
        regex_only.finalize().unwrap();
        assert!(regex_only.preflight(&AppConfig::default()).is_ok());
    }

    #[test]
    fn reference_k_falls_back_to_nearest_lower_then_smallest() {
        assert_eq!(resolve_reference_k(&[1, 3, 5, 10], 5), Some(5));
        assert_eq!(resolve_reference_k(&[1, 3, 10], 5), Some(3));
        assert_eq!(resolve_reference_k(&[10, 20], 5), Some(10));
        assert_eq!(resolve_reference_k(&[], 5), None);
    }
}
