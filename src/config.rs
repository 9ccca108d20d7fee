//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults.
//! [`load_config`] parses and validates; [`Config::validate`] can also be
//! used on a programmatically built config.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragloom_core::context::{
    DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_EMAIL_CHUNK_OVERLAP,
    DEFAULT_EMAIL_CHUNK_SIZE,
};
use ragloom_core::email::{DEFAULT_MAX_SIGNATURE_LINES, DEFAULT_SIGNATURE_DELIMITERS};
use ragloom_core::search::{
    KeywordNormalization, RetrieverConfig, DEFAULT_CANDIDATE_POOL_FACTOR, DEFAULT_HYBRID_ALPHA,
};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub email_chunk_size: usize,
    pub email_chunk_overlap: usize,
    /// `heuristic`, `chars`, `words` or `hf`.
    pub tokenizer: String,
    /// `tokenizer.json` for the `hf` tokenizer.
    pub tokenizer_path: Option<PathBuf>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            email_chunk_size: DEFAULT_EMAIL_CHUNK_SIZE,
            email_chunk_overlap: DEFAULT_EMAIL_CHUNK_OVERLAP,
            tokenizer: "heuristic".to_string(),
            tokenizer_path: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    pub hybrid_alpha: f64,
    pub top_k: usize,
    pub candidate_pool_factor: usize,
    pub score_threshold: f64,
    /// `min_max` or `logistic`.
    pub keyword_normalization: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            hybrid_alpha: DEFAULT_HYBRID_ALPHA,
            top_k: 10,
            candidate_pool_factor: DEFAULT_CANDIDATE_POOL_FACTOR,
            score_threshold: 0.0,
            keyword_normalization: "min_max".to_string(),
        }
    }
}

impl RetrievalConfig {
    pub fn retriever_config(&self) -> Result<RetrieverConfig> {
        let keyword_normalization: KeywordNormalization = self.keyword_normalization.parse()?;
        Ok(RetrieverConfig {
            candidate_pool_factor: self.candidate_pool_factor,
            score_threshold: self.score_threshold,
            keyword_normalization,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `disabled`, `hashing` or `openai`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "hashing".to_string(),
            model: None,
            dims: Some(256),
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IngestConfig {
    /// Documents embedded and stored concurrently.
    pub concurrency: usize,
    pub include_globs: Vec<String>,
    pub exclude_globs: Vec<String>,
    pub follow_symlinks: bool,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            include_globs: ["**/*.md", "**/*.tex", "**/*.txt", "**/*.json"]
                .iter()
                .map(|g| g.to_string())
                .collect(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmailConfig {
    pub signature_delimiters: Vec<String>,
    pub max_signature_lines: usize,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            signature_delimiters: DEFAULT_SIGNATURE_DELIMITERS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            max_signature_lines: DEFAULT_MAX_SIGNATURE_LINES,
        }
    }
}

impl Config {
    /// Config with every section at its default and the database at `db_path`.
    pub fn with_db_path(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            ingest: IngestConfig::default(),
            email: EmailConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 || c.email_chunk_size == 0 {
            bail!("chunking.chunk_size and chunking.email_chunk_size must be > 0");
        }
        if c.chunk_overlap >= c.chunk_size {
            bail!("chunking.chunk_overlap must be < chunking.chunk_size");
        }
        if c.email_chunk_overlap >= c.email_chunk_size {
            bail!("chunking.email_chunk_overlap must be < chunking.email_chunk_size");
        }
        match c.tokenizer.as_str() {
            "heuristic" | "chars" | "words" => {}
            "hf" => {
                if c.tokenizer_path.is_none() {
                    bail!("chunking.tokenizer_path must be set when tokenizer is 'hf'");
                }
            }
            other => bail!(
                "Unknown tokenizer: '{}'. Must be heuristic, chars, words, or hf.",
                other
            ),
        }

        let r = &self.retrieval;
        if r.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(0.0..=1.0).contains(&r.hybrid_alpha) {
            bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
        }
        if r.candidate_pool_factor < 1 {
            bail!("retrieval.candidate_pool_factor must be >= 1");
        }
        if !(0.0..=1.0).contains(&r.score_threshold) {
            bail!("retrieval.score_threshold must be in [0.0, 1.0]");
        }
        r.retriever_config()
            .context("invalid retrieval.keyword_normalization")?;

        let e = &self.embedding;
        match e.provider.as_str() {
            "disabled" => {}
            "hashing" => {
                if e.dims.unwrap_or(0) == 0 {
                    bail!("embedding.dims must be > 0 when provider is 'hashing'");
                }
            }
            "openai" => {
                if e.dims.unwrap_or(0) == 0 {
                    bail!("embedding.dims must be > 0 when provider is 'openai'");
                }
                if e.model.is_none() {
                    bail!("embedding.model must be specified when provider is 'openai'");
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hashing, or openai.",
                other
            ),
        }
        if e.is_enabled() && e.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        if self.ingest.concurrency < 1 {
            bail!("ingest.concurrency must be >= 1");
        }
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse("[db]\npath = \"./data/loom.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.chunk_size, 768);
        assert_eq!(config.chunking.email_chunk_overlap, 50);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.embedding.provider, "hashing");
        assert_eq!(config.email.signature_delimiters, vec!["-- ", "--", "__"]);
        assert_eq!(config.ingest.concurrency, 4);
    }

    #[test]
    fn test_rejects_overlap_not_below_size() {
        let err = parse("[db]\npath = \"x\"\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n")
            .unwrap_err();
        assert!(err.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_rejects_alpha_out_of_range() {
        assert!(parse("[db]\npath = \"x\"\n[retrieval]\nhybrid_alpha = 1.5\n").is_err());
    }

    #[test]
    fn test_openai_requires_model() {
        let err = parse("[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\ndims = 1536\n")
            .unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_normalization_is_rejected() {
        assert!(
            parse("[db]\npath = \"x\"\n[retrieval]\nkeyword_normalization = \"zscore\"\n")
                .is_err()
        );
        let config =
            parse("[db]\npath = \"x\"\n[retrieval]\nkeyword_normalization = \"logistic\"\n")
                .unwrap();
        assert!(matches!(
            config.retrieval.retriever_config().unwrap().keyword_normalization,
            KeywordNormalization::Logistic { .. }
        ));
    }

    #[test]
    fn test_hf_tokenizer_needs_path() {
        assert!(parse("[db]\npath = \"x\"\n[chunking]\ntokenizer = \"hf\"\n").is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("config/loom.example.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.retrieval.hybrid_alpha, 0.6);
        assert_eq!(config.embedding.dims, Some(256));
    }
}
