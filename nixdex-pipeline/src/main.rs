//! nixdex pipeline entry point.
//!
//! Usage: `nixdex <evaluate|process|all>` — stage selection is the only
//! command-line input; everything else comes from the TOML config and
//! environment (see `config.rs`).

use std::process::ExitCode;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod error;
mod evaluate;
mod jsonl;
mod nodes;
mod process;
mod stats;

use config::Config;
use error::{ConfigError, Result};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let stage = std::env::args().nth(1).unwrap_or_else(|| "all".to_string());
    match run(&stage).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal: {err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(stage: &str) -> Result<()> {
    let config = Config::load()?;
    info!(
        artifacts_bucket = config.artifacts_bucket,
        processed_bucket = config.processed_bucket,
        stage,
        "nixdex starting"
    );

    match stage {
        "evaluate" => {
            let key = evaluate::run(&config).await?;
            info!(key, "next stage should read from this key");
            Ok(())
        }
        "process" => process::run(&config, None).await,
        "all" => {
            let key = evaluate::run(&config).await?;
            process::run(&config, Some(key)).await
        }
        other => Err(ConfigError::Invalid {
            reason: format!("unknown stage '{other}' (expected evaluate, process, or all)"),
        }
        .into()),
    }
}
