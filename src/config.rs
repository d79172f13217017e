//! TOML configuration.
//!
//! Every table is optional. A missing file is an error for commands that
//! touch the index; [`Config::minimal`] covers commands that can run
//! without one.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub redaction: RedactionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            collection: default_collection(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/chat_history.sqlite")
}
fn default_collection() -> String {
    "chat_history".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_ingest_batch_size")]
    pub batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: default_ingest_batch_size(),
        }
    }
}

fn default_ingest_batch_size() -> usize {
    crate::ingest::DEFAULT_BATCH_SIZE
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_result_count")]
    pub result_count: usize,
    #[serde(default)]
    pub threshold: Option<f64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            result_count: default_result_count(),
            threshold: None,
        }
    }
}

fn default_result_count() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    /// Extra attempts after a 429, 5xx or connection failure. Zero means a
    /// failed request surfaces immediately.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_max_retries() -> u32 {
    0
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedactionConfig {
    #[serde(default = "default_redaction_provider")]
    pub provider: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub persons: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
    /// Entity types the `pattern` provider may leave undetected when their
    /// name list is empty (`"PERSON"`, `"LOCATION"`).
    #[serde(default)]
    pub allow_undetected: Vec<String>,
    #[serde(default)]
    pub analyzer_url: Option<String>,
    #[serde(default)]
    pub anonymizer_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RedactionConfig {
    fn default() -> Self {
        Self {
            provider: default_redaction_provider(),
            language: default_language(),
            persons: Vec::new(),
            locations: Vec::new(),
            allow_undetected: Vec::new(),
            analyzer_url: None,
            anonymizer_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_redaction_provider() -> String {
    "pattern".to_string()
}
fn default_language() -> String {
    "en".to_string()
}

impl Config {
    /// All defaults: local index, hash embeddings, pattern redaction.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

pub fn validate(config: &Config) -> Result<()> {
    if config.index.collection.trim().is_empty() {
        bail!("index.collection must not be empty");
    }

    if config.ingest.batch_size == 0 {
        bail!("ingest.batch_size must be > 0");
    }

    if config.retrieval.result_count == 0 {
        bail!("retrieval.result_count must be >= 1");
    }

    if let Some(t) = config.retrieval.threshold {
        if !t.is_finite() || t < 0.0 {
            bail!("retrieval.threshold must be a non-negative number");
        }
    }

    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or ollama.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    for entity in &config.redaction.allow_undetected {
        if entity != "PERSON" && entity != "LOCATION" {
            bail!(
                "redaction.allow_undetected accepts PERSON or LOCATION, got '{}'",
                entity
            );
        }
    }

    match config.redaction.provider.as_str() {
        "pattern" => crate::redact::check_pattern_coverage(&config.redaction)?,
        "presidio" => {
            if config.redaction.analyzer_url.is_none() || config.redaction.anonymizer_url.is_none()
            {
                bail!("redaction.analyzer_url and redaction.anonymizer_url are required for presidio");
            }
        }
        other => bail!(
            "Unknown redaction provider: '{}'. Must be pattern or presidio.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = parse_config("").unwrap();
        assert_eq!(config.index.collection, "chat_history");
        assert_eq!(config.ingest.batch_size, 10);
        assert_eq!(config.retrieval.result_count, 10);
        assert!(config.retrieval.threshold.is_none());
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.max_retries, 0);
        assert_eq!(config.redaction.provider, "pattern");
        assert_eq!(config.redaction.language, "en");
    }

    #[test]
    fn test_full_config() {
        let config = parse_config(
            r#"
            log_level = "debug"

            [index]
            path = "/tmp/idx.sqlite"
            collection = "chats"

            [ingest]
            batch_size = 25

            [retrieval]
            result_count = 5
            threshold = 1.2

            [embedding]
            provider = "ollama"
            model = "nomic-embed-text"
            dims = 768

            [redaction]
            persons = ["Alice"]
            locations = ["Lisbon"]
            "#,
        )
        .unwrap();
        validate(&config).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.index.path, PathBuf::from("/tmp/idx.sqlite"));
        assert_eq!(config.ingest.batch_size, 25);
        assert_eq!(config.retrieval.threshold, Some(1.2));
        assert_eq!(config.embedding.dims, Some(768));
        assert_eq!(config.redaction.persons, vec!["Alice".to_string()]);
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let config = parse_config("[ingest]\nbatch_size = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rejects_negative_threshold() {
        let config = parse_config("[retrieval]\nthreshold = -0.5\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_remote_embedding_needs_model_and_dims() {
        let config = parse_config("[embedding]\nprovider = \"openai\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_unknown_redaction_provider() {
        let config = parse_config("[redaction]\nprovider = \"ner\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_default_redaction_must_cover_names_and_places() {
        let err = validate(&parse_config("").unwrap()).unwrap_err();
        assert!(err.to_string().contains("PERSON"));

        let config = parse_config("[redaction]\npersons = [\"Alice\"]\n").unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("LOCATION"));

        let config = parse_config(
            "[redaction]\npersons = [\"Alice\"]\nallow_undetected = [\"LOCATION\"]\n",
        )
        .unwrap();
        validate(&config).unwrap();

        let config =
            parse_config("[redaction]\nallow_undetected = [\"PERSON\", \"LOCATION\"]\n").unwrap();
        validate(&config).unwrap();
    }

    #[test]
    fn test_allow_undetected_rejects_other_entities() {
        let config = parse_config(
            "[redaction]\npersons = [\"A\"]\nlocations = [\"B\"]\nallow_undetected = [\"EMAIL_ADDRESS\"]\n",
        )
        .unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(load_config(Path::new("/no/such/sieve.toml")).is_err());
    }
}
