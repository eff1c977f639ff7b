use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Top-level pipeline error; every variant is fatal and maps to exit
/// code 1.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("evaluation failed: {0}")]
    Eval(#[from] nixdex_eval::Error),

    #[error("catalog database error: {0}")]
    Db(#[from] nixdex_db::Error),

    #[error("embedding error: {0}")]
    Embed(#[from] nixdex_embed::Error),

    #[error("minified artifact error: {0}")]
    Minify(#[from] nixdex_minify::Error),

    #[error("object store error: {0}")]
    Store(#[from] nixdex_object_store::Error),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("FTS row count {fts} does not match package count {packages}")]
    FtsMismatch { fts: usize, packages: usize },
}

impl PipelineError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            context: context.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("invalid configuration: {reason}")]
    Invalid { reason: String },
}
