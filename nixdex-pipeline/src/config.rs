use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::warn;

use crate::error::{ConfigError, Result};

fn default_artifacts_prefix() -> String {
    "evaluations".into()
}

fn default_data_key() -> String {
    "fdnix-data.db".into()
}

fn default_minified_key() -> String {
    "fdnix.db".into()
}

fn default_stats_prefix() -> String {
    "stats".into()
}

fn default_node_prefix() -> String {
    "nodes/".into()
}

fn default_node_workers() -> usize {
    30
}

fn default_node_batch_size() -> usize {
    50
}

fn default_true() -> bool {
    true
}

fn default_vector_index_partitions() -> u32 {
    256
}

fn default_vector_index_sub_vectors() -> u32 {
    8
}

/// What Stage 2 produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    Metadata,
    Embedding,
    Minified,
    Both,
    /// Alias accepted from older run definitions
    #[serde(alias = "full")]
    All,
}

impl ProcessingMode {
    pub fn wants_metadata(self) -> bool {
        matches!(self, Self::Metadata | Self::Both | Self::All)
    }

    pub fn wants_embeddings(self) -> bool {
        matches!(self, Self::Embedding | Self::Both | Self::All)
    }

    pub fn wants_minified(self) -> bool {
        matches!(self, Self::Minified | Self::Both | Self::All)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvalConfig {
    pub binary: String,
    pub repo_url: String,
    pub branch: String,
    pub system: Option<String>,
    pub workers: u32,
    pub max_memory_mb: u32,
    pub sharded: bool,
    pub shard_expr: PathBuf,
}

impl Default for EvalConfig {
    fn default() -> Self {
        let defaults = nixdex_eval::EvalSettings::default();
        EvalConfig {
            binary: defaults.binary,
            repo_url: defaults.repo_url,
            branch: defaults.branch,
            system: None,
            workers: defaults.workers,
            max_memory_mb: defaults.max_memory_mb,
            sharded: false,
            shard_expr: defaults.shard_expr,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmbeddingConfig {
    pub host: String,
    pub model_id: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub output_dimension: usize,
    pub task_type: String,
    pub max_rpm: usize,
    pub max_tpm: u64,
    pub max_concurrent_requests: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        let defaults = nixdex_embed::EmbedSettings::default();
        EmbeddingConfig {
            host: defaults.host,
            model_id: defaults.model_id,
            api_key_env: "EMBEDDING_API_KEY".into(),
            output_dimension: defaults.output_dimension,
            task_type: defaults.task_type,
            max_rpm: defaults.max_rpm,
            max_tpm: defaults.max_tpm,
            max_concurrent_requests: defaults.max_concurrent_requests,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MinifyConfig {
    pub dict_size: usize,
    pub sample_count: usize,
    pub compression_level: i32,
}

impl Default for MinifyConfig {
    fn default() -> Self {
        let defaults = nixdex_minify::MinifySettings::default();
        MinifyConfig {
            dict_size: defaults.dict_size,
            sample_count: defaults.sample_count,
            compression_level: defaults.compression_level,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FtsSettings {
    pub stemmer: String,
    pub stopwords: String,
}

impl Default for FtsSettings {
    fn default() -> Self {
        FtsSettings {
            stemmer: "english".into(),
            stopwords: "english".into(),
        }
    }
}

/// Run configuration, loaded from TOML with environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Bucket holding raw evaluations and the database artifacts
    #[serde(default)]
    pub artifacts_bucket: String,
    /// Bucket holding per-node files and stats for the frontend
    #[serde(default)]
    pub processed_bucket: String,

    #[serde(default = "default_artifacts_prefix")]
    pub evaluations_prefix: String,
    /// Raw JSONL key to process; defaults to the key Stage 1 just wrote
    #[serde(default)]
    pub jsonl_input_key: Option<String>,

    #[serde(default = "default_data_key")]
    pub data_key: String,
    #[serde(default = "default_minified_key")]
    pub minified_key: String,
    #[serde(default = "default_stats_prefix")]
    pub stats_prefix: String,
    #[serde(default = "default_node_prefix")]
    pub node_prefix: String,

    #[serde(default = "default_processing_mode")]
    pub processing_mode: ProcessingMode,
    #[serde(default = "default_true")]
    pub enable_embeddings: bool,
    #[serde(default = "default_true")]
    pub enable_stats: bool,
    #[serde(default = "default_true")]
    pub enable_node_s3: bool,
    #[serde(default = "default_true")]
    pub clear_existing_nodes: bool,
    #[serde(default)]
    pub force_rebuild_embeddings: bool,

    #[serde(default = "default_node_workers")]
    pub node_workers: usize,
    #[serde(default = "default_node_batch_size")]
    pub node_batch_size: usize,

    /// Accepted for compatibility with vector-index consumers; no index
    /// is built by this pipeline.
    #[serde(default = "default_vector_index_partitions")]
    pub vector_index_partitions: u32,
    #[serde(default = "default_vector_index_sub_vectors")]
    pub vector_index_sub_vectors: u32,

    #[serde(default)]
    pub eval: EvalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub minify: MinifyConfig,
    #[serde(default)]
    pub fts: FtsSettings,
}

fn default_processing_mode() -> ProcessingMode {
    ProcessingMode::Both
}

/// Truthy environment flag: `1`, `true`, `yes`, `on`.
fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    Some(matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    ))
}

impl Default for Config {
    fn default() -> Self {
        toml::from_str("").expect("empty config uses defaults")
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Config> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_owned(),
            source: e,
        })?;
        let config: Config = toml::from_str(&contents).map_err(ConfigError::TomlParse)?;
        Ok(config)
    }

    /// Load from `CONFIG_FILE`, `nixdex.toml` when present, or defaults;
    /// then apply environment overrides and validate.
    pub fn load() -> Result<Config> {
        let mut config = match std::env::var("CONFIG_FILE") {
            Ok(path) => Config::load_from(Path::new(&path))?,
            Err(_) => {
                if Path::new("nixdex.toml").exists() {
                    Config::load_from(Path::new("nixdex.toml"))?
                } else {
                    Config::default()
                }
            }
        };

        if let Ok(bucket) = std::env::var("ARTIFACTS_BUCKET") {
            config.artifacts_bucket = bucket;
        }
        if let Ok(bucket) = std::env::var("PROCESSED_FILES_BUCKET") {
            config.processed_bucket = bucket;
        }
        if let Ok(key) = std::env::var("JSONL_INPUT_KEY") {
            config.jsonl_input_key = Some(key);
        }
        if let Ok(system) = std::env::var("NIX_SYSTEM") {
            config.eval.system = Some(system);
        }
        if let Ok(mode) = std::env::var("PROCESSING_MODE") {
            config.processing_mode = match mode.to_lowercase().as_str() {
                "metadata" => ProcessingMode::Metadata,
                "embedding" => ProcessingMode::Embedding,
                "minified" => ProcessingMode::Minified,
                "both" | "all" | "full" => ProcessingMode::Both,
                other => {
                    return Err(ConfigError::Invalid {
                        reason: format!("unknown PROCESSING_MODE '{other}'"),
                    }
                    .into());
                }
            };
        }
        if let Some(force) = env_flag("FORCE_REBUILD_EMBEDDINGS") {
            config.force_rebuild_embeddings = force;
        }
        if let Some(enabled) = env_flag("ENABLE_EMBEDDINGS") {
            config.enable_embeddings = enabled;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.artifacts_bucket.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "artifacts_bucket must be set (config or ARTIFACTS_BUCKET)".into(),
            });
        }
        if self.processed_bucket.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "processed_bucket must be set (config or PROCESSED_FILES_BUCKET)".into(),
            });
        }
        if self.eval.workers == 0 {
            return Err(ConfigError::Invalid {
                reason: "eval.workers must be greater than 0".into(),
            });
        }
        if self.embedding.output_dimension == 0 {
            return Err(ConfigError::Invalid {
                reason: "embedding.output_dimension must be greater than 0".into(),
            });
        }
        if self.node_workers == 0 || self.node_batch_size == 0 {
            return Err(ConfigError::Invalid {
                reason: "node_workers and node_batch_size must be greater than 0".into(),
            });
        }
        Ok(())
    }

    /// Target system token: configured, or detected from the host
    /// architecture with `x86_64-linux` as the container default.
    pub fn system(&self) -> String {
        if let Some(system) = &self.eval.system {
            return system.clone();
        }
        match std::env::consts::ARCH {
            "x86_64" => "x86_64-linux".to_string(),
            "aarch64" => "aarch64-linux".to_string(),
            other => {
                warn!("unrecognized host architecture '{other}', assuming x86_64-linux");
                "x86_64-linux".to_string()
            }
        }
    }

    pub fn eval_settings(&self) -> nixdex_eval::EvalSettings {
        nixdex_eval::EvalSettings {
            binary: self.eval.binary.clone(),
            repo_url: self.eval.repo_url.clone(),
            branch: self.eval.branch.clone(),
            system: self.system(),
            workers: self.eval.workers,
            max_memory_mb: self.eval.max_memory_mb,
            mode: if self.eval.sharded {
                nixdex_eval::EvaluationMode::Sharded
            } else {
                nixdex_eval::EvaluationMode::Direct
            },
            shard_expr: self.eval.shard_expr.clone(),
            extractor_version: format!("nixdex-evaluator-v{}", env!("CARGO_PKG_VERSION")),
        }
    }

    pub fn embed_settings(&self) -> nixdex_embed::EmbedSettings {
        nixdex_embed::EmbedSettings {
            host: self.embedding.host.clone(),
            model_id: self.embedding.model_id.clone(),
            api_key: std::env::var(&self.embedding.api_key_env).unwrap_or_default(),
            output_dimension: self.embedding.output_dimension,
            task_type: self.embedding.task_type.clone(),
            max_rpm: self.embedding.max_rpm,
            max_tpm: self.embedding.max_tpm,
            max_concurrent_requests: self.embedding.max_concurrent_requests,
        }
    }

    pub fn minify_settings(&self) -> nixdex_minify::MinifySettings {
        nixdex_minify::MinifySettings {
            dict_size: self.minify.dict_size,
            sample_count: self.minify.sample_count,
            compression_level: self.minify.compression_level,
        }
    }

    pub fn fts_config(&self) -> nixdex_db::FtsConfig {
        nixdex_db::FtsConfig {
            stemmer: self.fts.stemmer.clone(),
            stopwords: self.fts.stopwords.clone(),
        }
    }

    /// Key of the minified dictionary, always the `.dict` sibling.
    pub fn dict_key(&self) -> String {
        match self.minified_key.rsplit_once('.') {
            Some((stem, _)) => format!("{stem}.dict"),
            None => format!("{}.dict", self.minified_key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.data_key, "fdnix-data.db");
        assert_eq!(config.minified_key, "fdnix.db");
        assert_eq!(config.dict_key(), "fdnix.dict");
        assert!(config.processing_mode.wants_metadata());
        assert!(config.enable_node_s3);
        assert_eq!(config.node_workers, 30);
        assert_eq!(config.node_batch_size, 50);
    }

    #[test]
    fn toml_roundtrip_with_overrides() {
        let config: Config = toml::from_str(
            r#"
            artifacts_bucket = "artifacts"
            processed_bucket = "processed"
            processing_mode = "minified"

            [eval]
            branch = "release-25.11"
            sharded = true

            [minify]
            compression_level = 9
            "#,
        )
        .unwrap();
        assert_eq!(config.eval.branch, "release-25.11");
        assert!(config.eval.sharded);
        assert_eq!(config.minify.compression_level, 9);
        assert!(!config.processing_mode.wants_metadata());
        assert!(config.processing_mode.wants_minified());
    }

    #[test]
    fn validation_requires_buckets() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }
}
