//! Stage 1: evaluate the package set and upload the raw JSONL stream.

use tracing::{info, warn};

use nixdex_eval::{Evaluator, clone_source};
use nixdex_object_store::ObjectStore;

use crate::config::Config;
use crate::error::Result;
use crate::jsonl::upload_raw_jsonl;

/// Run the evaluation stage; returns the uploaded JSONL key.
pub async fn run(config: &Config) -> Result<String> {
    info!("starting evaluation stage");
    let settings = config.eval_settings();

    // Probe for the evaluator before the (expensive) clone
    let evaluator = Evaluator::new(settings.clone())?;
    let source = clone_source(&settings.repo_url, &settings.branch).await?;
    let output = evaluator.evaluate(&source).await?;
    if output.metadata.total_packages == 0 {
        warn!("evaluation produced zero packages");
    }

    let store = ObjectStore::connect(&config.artifacts_bucket).await;
    let key = format!(
        "{}/{}/nixpkgs-raw.jsonl.br",
        config.evaluations_prefix.trim_end_matches('/'),
        chrono::Utc::now().timestamp()
    );
    upload_raw_jsonl(&store, &key, &output.jsonl_path, &output.metadata).await?;

    info!(
        key,
        packages = output.metadata.total_packages,
        "evaluation stage complete"
    );
    Ok(key)
}
