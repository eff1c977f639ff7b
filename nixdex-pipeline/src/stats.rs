//! Aggregate graph statistics blob.

use serde::Serialize;
use tracing::info;

use nixdex_graph::GraphStats;
use nixdex_model::StreamMetadata;
use nixdex_object_store::{BlobOptions, JSON_BROTLI_QUALITY, ObjectStore};

use crate::error::Result;

#[derive(Serialize)]
struct StatsDocument<'a> {
    metadata: StatsMetadata<'a>,
    stats: &'a GraphStats,
}

#[derive(Serialize)]
struct StatsMetadata<'a> {
    extraction_timestamp: &'a str,
    nixpkgs_branch: &'a str,
    total_packages: usize,
}

/// Upload the stats blob to `<stats_prefix>/<name>.json.br`.
pub async fn upload_stats(
    store: &ObjectStore,
    key: &str,
    stats: &GraphStats,
    run: &StreamMetadata,
    total_packages: usize,
) -> Result<()> {
    let document = StatsDocument {
        metadata: StatsMetadata {
            extraction_timestamp: &run.extraction_timestamp,
            nixpkgs_branch: &run.nixpkgs_branch,
            total_packages,
        },
        stats,
    };
    let json = serde_json::to_vec(&document)?;
    store
        .put_json_brotli(key, &json, JSON_BROTLI_QUALITY, BlobOptions::json_brotli())
        .await?;
    info!(key, "stats blob uploaded");
    Ok(())
}
