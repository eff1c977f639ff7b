//! Stage 2: turn the raw stream into the catalog artifacts.
//!
//! Phases, gated by the processing mode and enable flags:
//! normalize → graph → relational catalog (+ stats blob) → embeddings →
//! minified artifact → per-node objects.

use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nixdex_db::{CatalogDb, OpenMode};
use nixdex_embed::{EmbedClient, EmbedItem, EmbeddingCache, embed_with_cache};
use nixdex_graph::{DependencyGraph, GraphData};
use nixdex_minify::MinifiedWriter;
use nixdex_model::{
    MergedPackage, Package, StreamMetadata, embedding_text, group_and_merge, normalize_record,
};
use nixdex_object_store::{BlobOptions, ObjectStore};

use crate::config::Config;
use crate::error::{ConfigError, PipelineError, Result};
use crate::jsonl::download_raw_jsonl;
use crate::nodes::{NodeWriterSettings, write_index, write_nodes};
use crate::stats::upload_stats;

/// Totals for the run's final log line.
#[derive(Debug, Default)]
struct RunTotals {
    packages: usize,
    embeddings_generated: usize,
    embeddings_reused: usize,
    embeddings_failed: usize,
}

/// Run the processing stage against `input_key` (or the configured one).
pub async fn run(config: &Config, input_key: Option<String>) -> Result<()> {
    info!("starting processing stage");
    let artifacts = ObjectStore::connect(&config.artifacts_bucket).await;
    let processed = ObjectStore::connect(&config.processed_bucket).await;

    let input_key = input_key
        .or_else(|| config.jsonl_input_key.clone())
        .ok_or_else(|| ConfigError::Invalid {
            reason: "jsonl_input_key must be set for the processing stage".into(),
        })?;

    let (raw_records, stream_metadata) = download_raw_jsonl(&artifacts, &input_key).await?;
    if raw_records.is_empty() {
        // An empty evaluation is a valid (if suspicious) run: emit empty
        // artifacts and exit cleanly.
        warn!("raw stream contained no packages; artifacts will be empty");
    }
    let run_metadata = stream_metadata.unwrap_or_else(|| StreamMetadata {
        extraction_timestamp: chrono::Utc::now().to_rfc3339(),
        nixpkgs_branch: config.eval.branch.clone(),
        total_packages: raw_records.len(),
        extractor_version: "unknown".into(),
    });

    // Normalize and merge variants. Stream order drives the
    // first-non-empty merge rule.
    let last_updated = chrono::Utc::now().to_rfc3339();
    let target_system = config.system();
    let normalized: Vec<_> = raw_records
        .iter()
        .filter_map(|record| normalize_record(record, &target_system, &last_updated))
        .collect();
    let merged = group_and_merge(normalized);
    let packages: Vec<Package> = merged.iter().map(|entry| entry.package.clone()).collect();
    info!(
        raw = raw_records.len(),
        canonical = packages.len(),
        "normalized package set"
    );

    let mut totals = RunTotals {
        packages: packages.len(),
        ..RunTotals::default()
    };

    // The graph pass feeds both the stats blob and the node objects.
    let graph_data = if config.enable_node_s3 || config.enable_stats {
        let graph = DependencyGraph::from_raw_packages(&raw_records);
        Some(graph.process_all())
    } else {
        None
    };

    let workdir = tempfile::tempdir()
        .map_err(|e| PipelineError::io("failed to create processing workdir", e))?;
    let main_db_path = workdir.path().join("catalog-main.db");

    if config.processing_mode.wants_metadata() {
        write_main_catalog(config, &main_db_path, &merged)?;

        if config.enable_stats
            && let Some(graph_data) = &graph_data
        {
            let key = format!(
                "{}/catalog-stats-{}.json.br",
                config.stats_prefix.trim_end_matches('/'),
                chrono::Utc::now().timestamp()
            );
            upload_stats(
                &processed,
                &key,
                &graph_data.graph_stats,
                &run_metadata,
                packages.len(),
            )
            .await?;
        }
    } else {
        // Embedding/minified-only runs operate on the current artifact
        download_main_catalog(&artifacts, &config.data_key, &main_db_path).await?;
    }

    if config.processing_mode.wants_embeddings() {
        if config.enable_embeddings {
            run_embedding_phase(config, &artifacts, &main_db_path, &mut totals).await?;
        } else {
            info!("embedding phase skipped (embeddings disabled)");
        }
    }

    // Ship the main artifact once all phases that mutate it are done.
    if config.processing_mode.wants_metadata() || config.processing_mode.wants_embeddings() {
        upload_database(&artifacts, &config.data_key, &main_db_path).await?;
    }

    if config.processing_mode.wants_minified() {
        let minified_path = workdir.path().join("catalog-min.db");
        let db = CatalogDb::open(&main_db_path, OpenMode::ReadOnly)?;
        let minify_input = db.read_packages()?;
        drop(db);
        info!(packages = minify_input.len(), "building minified artifact");
        let writer = MinifiedWriter::new(config.minify_settings());
        let output = writer.write_artifact(&minified_path, &minify_input)?;

        upload_database(&artifacts, &config.minified_key, &output.db_path).await?;
        upload_database(&artifacts, &config.dict_key(), &output.dict_path).await?;
    }

    if config.enable_node_s3 {
        match &graph_data {
            Some(graph_data) => {
                run_node_phase(config, &processed, &packages, graph_data, &run_metadata).await?;
            }
            None => info!("node phase skipped (no graph data)"),
        }
    }

    info!(
        packages = totals.packages,
        embeddings_generated = totals.embeddings_generated,
        embeddings_reused = totals.embeddings_reused,
        embeddings_failed = totals.embeddings_failed,
        "processing stage complete"
    );
    Ok(())
}

/// Create the normalized catalog and verify the FTS invariant.
fn write_main_catalog(config: &Config, path: &Path, merged: &[MergedPackage]) -> Result<()> {
    let mut db = CatalogDb::open(path, OpenMode::Create)?;
    db.create_schema(&config.fts_config())?;
    db.write_catalog(merged)?;

    let packages = db.package_count()?;
    let fts = db.fts_count()?;
    if packages != fts {
        return Err(PipelineError::FtsMismatch { fts, packages });
    }
    db.finalize()?;
    Ok(())
}

/// Pull the current main artifact for runs that do not rebuild it.
async fn download_main_catalog(store: &ObjectStore, key: &str, path: &Path) -> Result<()> {
    info!(key, "downloading current main artifact");
    let bytes = store.get_blob(key).await?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|e| PipelineError::io("failed to write downloaded artifact", e))?;
    Ok(())
}

/// Generate or reuse embeddings for every package in the main artifact.
async fn run_embedding_phase(
    config: &Config,
    artifacts: &ObjectStore,
    main_db_path: &Path,
    totals: &mut RunTotals,
) -> Result<()> {
    info!("starting embedding phase");
    let client = EmbedClient::new(config.embed_settings())?;
    client.probe().await?;
    info!("embedding model access validated");

    let cache = if config.force_rebuild_embeddings {
        info!("force rebuild enabled, ignoring prior embeddings");
        EmbeddingCache::default()
    } else {
        load_embedding_seeds(artifacts, &config.data_key).await
    };

    let db = CatalogDb::open(main_db_path, OpenMode::ReadWrite)?;
    let packages = db.read_packages()?;
    let pending: Vec<&Package> = if config.force_rebuild_embeddings {
        packages.iter().collect()
    } else {
        let missing: std::collections::HashSet<String> = db
            .packages_without_embedding()?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        packages
            .iter()
            .filter(|pkg| missing.contains(&pkg.package_id))
            .collect()
    };
    if pending.is_empty() {
        info!("no packages need embeddings, nothing to do");
        return Ok(());
    }

    let items: Vec<EmbedItem> = pending
        .iter()
        .map(|pkg| EmbedItem {
            record_id: pkg.package_id.clone(),
            content_hash: pkg.content_hash,
            text: embedding_text(pkg),
        })
        .collect();

    let cancel = CancellationToken::new();
    let outcome = embed_with_cache(&client, &items, &cache, &cancel).await;

    let hash_by_id: std::collections::HashMap<&str, i64> = pending
        .iter()
        .map(|pkg| (pkg.package_id.as_str(), pkg.content_hash))
        .collect();
    for (record_id, vector) in &outcome.vectors {
        if let Some(vector) = vector {
            let content_hash = hash_by_id[record_id.as_str()];
            db.upsert_embedding(record_id, content_hash, vector)?;
        }
    }

    totals.embeddings_generated = outcome.generated;
    totals.embeddings_reused = outcome.reused;
    totals.embeddings_failed = outcome.failed;
    info!(
        generated = outcome.generated,
        reused = outcome.reused,
        failed = outcome.failed,
        "embedding phase complete"
    );
    Ok(())
}

/// Seed the embedding cache from the previous run's artifact; absence
/// means a fresh build, not an error.
async fn load_embedding_seeds(store: &ObjectStore, key: &str) -> EmbeddingCache {
    let bytes = match store.get_blob(key).await {
        Ok(bytes) => bytes,
        Err(err) => {
            info!("no previous artifact available ({err}), starting fresh");
            return EmbeddingCache::default();
        }
    };
    let Ok(dir) = tempfile::tempdir() else {
        return EmbeddingCache::default();
    };
    let path = dir.path().join("previous.db");
    if std::fs::write(&path, bytes).is_err() {
        return EmbeddingCache::default();
    }
    match CatalogDb::open(&path, OpenMode::ReadOnly).and_then(|db| db.embedding_seeds()) {
        Ok(seeds) => {
            info!(seeds = seeds.len(), "seeded embedding cache from previous artifact");
            EmbeddingCache::from_pairs(seeds)
        }
        Err(err) => {
            warn!("failed to read previous artifact ({err}), starting fresh");
            EmbeddingCache::default()
        }
    }
}

/// Upload a database file, plus a timestamped snapshot copy for
/// retention.
async fn upload_database(store: &ObjectStore, key: &str, path: &Path) -> Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| PipelineError::io("failed to read artifact for upload", e))?;
    let options = BlobOptions {
        content_type: Some("application/octet-stream".to_string()),
        ..BlobOptions::default()
    };
    info!(
        key,
        mb = format!("{:.2}", bytes.len() as f64 / 1024.0 / 1024.0),
        "uploading artifact"
    );
    store.put_blob(key, bytes.clone(), &options).await?;

    let snapshot = snapshot_key(key, chrono::Utc::now().timestamp());
    store.put_blob(&snapshot, bytes, &options).await?;
    Ok(())
}

/// `fdnix-data.db` -> `snapshots/fdnix-data-<ts>.db`
fn snapshot_key(key: &str, timestamp: i64) -> String {
    let name = key.rsplit('/').next().unwrap_or(key);
    match name.rsplit_once('.') {
        Some((stem, ext)) => format!("snapshots/{stem}-{timestamp}.{ext}"),
        None => format!("snapshots/{name}-{timestamp}"),
    }
}

/// Write per-node objects and the index file.
async fn run_node_phase(
    config: &Config,
    processed: &ObjectStore,
    packages: &[Package],
    graph_data: &GraphData,
    run_metadata: &StreamMetadata,
) -> Result<()> {
    let settings = NodeWriterSettings {
        prefix: config.node_prefix.clone(),
        clear_existing: config.clear_existing_nodes,
        batch_size: config.node_batch_size,
        max_workers: config.node_workers,
    };
    let stats = write_nodes(processed, &settings, packages, graph_data, run_metadata).await?;
    write_index(
        processed,
        &settings,
        packages,
        &graph_data.graph_stats,
        run_metadata,
    )
    .await?;
    info!(
        success = stats.success,
        errors = stats.errors,
        "node phase complete"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_key_shapes() {
        assert_eq!(
            snapshot_key("fdnix-data.db", 1700000000),
            "snapshots/fdnix-data-1700000000.db"
        );
        assert_eq!(
            snapshot_key("some/prefix/fdnix.dict", 42),
            "snapshots/fdnix-42.dict"
        );
        assert_eq!(snapshot_key("nodict", 1), "snapshots/nodict-1");
    }
}
