//! Per-node object writer.
//!
//! One object per canonical package at `<prefix>/<node_id>.json.br`
//! carrying the full metadata plus dependency information, and an
//! `index.json.br` with an abbreviated entry per package and the graph
//! aggregates. Uploads run on a bounded worker pool in batches; the
//! shared success/error counters are updated once per batch under a
//! mutex.

use std::sync::Mutex;

use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use nixdex_graph::{DependencyInfo, GraphData, GraphStats};
use nixdex_model::{License, Maintainer, Package, StreamMetadata};
use nixdex_object_store::{BlobOptions, ObjectStore};

use crate::error::Result;

const INDEX_DESCRIPTION_LIMIT: usize = 200;
/// Node payloads trade a little upload time for size
const NODE_BROTLI_QUALITY: u32 = 6;

#[derive(Debug, Clone)]
pub struct NodeWriterSettings {
    pub prefix: String,
    pub clear_existing: bool,
    pub batch_size: usize,
    pub max_workers: usize,
}

impl Default for NodeWriterSettings {
    fn default() -> Self {
        NodeWriterSettings {
            prefix: "nodes/".to_string(),
            clear_existing: true,
            batch_size: 50,
            max_workers: 30,
        }
    }
}

/// Upload counters, updated per batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UploadStats {
    pub success: usize,
    pub errors: usize,
    pub total: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeDocument<'a> {
    node_id: &'a str,
    package_name: &'a str,
    version: &'a str,
    attribute_path: &'a str,
    description: &'a str,
    long_description: &'a str,
    homepage: &'a str,
    license: &'a Option<License>,
    platforms: &'a [String],
    maintainers: &'a [Maintainer],
    category: &'a str,
    broken: bool,
    unfree: bool,
    available: bool,
    insecure: bool,
    unsupported: bool,
    main_program: &'a str,
    position: &'a str,
    outputs_to_install: &'a [String],
    last_updated: &'a str,
    dependencies: EdgeSummary<'a>,
    dependents: EdgeSummary<'a>,
    node_metadata: NodeMetadata<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EdgeSummary<'a> {
    direct: &'a [String],
    all: &'a [String],
    count: usize,
    total_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NodeMetadata<'a> {
    generated_at: &'a str,
    nixpkgs_branch: &'a str,
    has_dependencies: bool,
    has_dependents: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexDocument<'a> {
    metadata: IndexMetadata<'a>,
    dependency_stats: &'a GraphStats,
    packages: Vec<IndexEntry<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexMetadata<'a> {
    generated_at: &'a str,
    nixpkgs_branch: &'a str,
    total_packages: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexEntry<'a> {
    node_id: String,
    package_name: &'a str,
    version: &'a str,
    attribute_path: &'a str,
    description: String,
    category: &'a str,
    broken: bool,
    unfree: bool,
}

fn node_document<'a>(
    pkg: &'a Package,
    node_id: &'a str,
    info: &'a DependencyInfo,
    run: &'a StreamMetadata,
) -> NodeDocument<'a> {
    NodeDocument {
        node_id,
        package_name: &pkg.package_name,
        version: &pkg.version,
        attribute_path: &pkg.attribute_path,
        description: &pkg.description,
        long_description: &pkg.long_description,
        homepage: &pkg.homepage,
        license: &pkg.license,
        platforms: &pkg.platforms,
        maintainers: &pkg.maintainers,
        category: &pkg.category,
        broken: pkg.broken,
        unfree: pkg.unfree,
        available: pkg.available,
        insecure: pkg.insecure,
        unsupported: pkg.unsupported,
        main_program: &pkg.main_program,
        position: &pkg.position,
        outputs_to_install: &pkg.outputs_to_install,
        last_updated: &pkg.last_updated,
        dependencies: EdgeSummary {
            direct: &info.direct_dependencies,
            all: &info.all_dependencies,
            count: info.dependency_count,
            total_count: info.total_dependency_count,
        },
        dependents: EdgeSummary {
            direct: &info.direct_dependents,
            all: &info.all_dependents,
            count: info.dependent_count,
            total_count: info.total_dependent_count,
        },
        node_metadata: NodeMetadata {
            generated_at: &run.extraction_timestamp,
            nixpkgs_branch: &run.nixpkgs_branch,
            has_dependencies: info.dependency_count > 0,
            has_dependents: info.dependent_count > 0,
        },
    }
}

/// Write one object per package under the configured prefix.
pub async fn write_nodes(
    store: &ObjectStore,
    settings: &NodeWriterSettings,
    packages: &[Package],
    graph_data: &GraphData,
    run: &StreamMetadata,
) -> Result<UploadStats> {
    let prefix = normalized_prefix(&settings.prefix);
    if settings.clear_existing {
        store.delete_prefix(&prefix).await?;
    }

    let empty = DependencyInfo::default();
    let nodes: Vec<(&Package, String)> = packages
        .iter()
        .filter(|pkg| !pkg.package_name.is_empty() && !pkg.version.is_empty())
        .map(|pkg| {
            let node_id = pkg.node_id();
            (pkg, node_id)
        })
        .collect();

    let stats = Mutex::new(UploadStats {
        total: nodes.len(),
        ..UploadStats::default()
    });
    info!(
        nodes = nodes.len(),
        batch_size = settings.batch_size,
        workers = settings.max_workers,
        prefix,
        "writing per-node objects"
    );

    {
        let uploads = nodes.chunks(settings.batch_size).map(|batch| {
            let prefix = prefix.as_str();
            let empty = &empty;
            let stats = &stats;
            async move {
                let mut success = 0usize;
                let mut errors = 0usize;
                for &(pkg, ref node_id) in batch {
                    let info = graph_data.dependency_data.get(node_id).unwrap_or(empty);
                    let document = node_document(pkg, node_id, info, run);
                    let key = format!("{prefix}{node_id}.json.br");
                    let upload = match serde_json::to_vec(&document) {
                        Ok(json) => {
                            let options = BlobOptions::json_brotli()
                                .with_metadata("package-name", &pkg.package_name)
                                .with_metadata("version", &pkg.version)
                                .with_metadata("category", &pkg.category);
                            store
                                .put_json_brotli(&key, &json, NODE_BROTLI_QUALITY, options)
                                .await
                                .map_err(crate::error::PipelineError::from)
                        }
                        Err(err) => Err(err.into()),
                    };
                    match upload {
                        Ok(()) => success += 1,
                        Err(err) => {
                            warn!(node = node_id.as_str(), "node upload failed: {err}");
                            errors += 1;
                        }
                    }
                }
                let mut stats = stats.lock().expect("stats mutex poisoned");
                stats.success += success;
                stats.errors += errors;
            }
        });

        futures::stream::iter(uploads)
            .buffer_unordered(settings.max_workers.max(1))
            .collect::<Vec<()>>()
            .await;
    }

    let stats = stats.into_inner().expect("stats mutex poisoned");
    info!(
        success = stats.success,
        errors = stats.errors,
        total = stats.total,
        "node writing completed"
    );
    Ok(stats)
}

/// Write `<prefix>/index.json.br`: abbreviated per-package entries plus
/// graph aggregates.
pub async fn write_index(
    store: &ObjectStore,
    settings: &NodeWriterSettings,
    packages: &[Package],
    stats: &GraphStats,
    run: &StreamMetadata,
) -> Result<()> {
    let prefix = normalized_prefix(&settings.prefix);
    let entries: Vec<IndexEntry<'_>> = packages
        .iter()
        .map(|pkg| IndexEntry {
            node_id: pkg.node_id(),
            package_name: &pkg.package_name,
            version: &pkg.version,
            attribute_path: &pkg.attribute_path,
            description: pkg.description.chars().take(INDEX_DESCRIPTION_LIMIT).collect(),
            category: &pkg.category,
            broken: pkg.broken,
            unfree: pkg.unfree,
        })
        .collect();
    let document = IndexDocument {
        metadata: IndexMetadata {
            generated_at: &run.extraction_timestamp,
            nixpkgs_branch: &run.nixpkgs_branch,
            total_packages: packages.len(),
        },
        dependency_stats: stats,
        packages: entries,
    };
    let json = serde_json::to_vec(&document)?;
    let key = format!("{prefix}index.json.br");
    store
        .put_json_brotli(
            &key,
            &json,
            NODE_BROTLI_QUALITY,
            BlobOptions::json_brotli().with_metadata("type", "node-index"),
        )
        .await?;
    info!(key, "node index written");
    Ok(())
}

fn normalized_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_document_shape() {
        let pkg = Package {
            package_id: "hello".into(),
            package_name: "hello".into(),
            version: "2.12".into(),
            description: "GNU Hello".into(),
            ..Package::default()
        };
        let node_id = pkg.node_id();
        let info = DependencyInfo {
            direct_dependencies: vec!["glibc-2.38".into()],
            dependency_count: 1,
            total_dependency_count: 1,
            all_dependencies: vec!["glibc-2.38".into()],
            ..DependencyInfo::default()
        };
        let run = StreamMetadata {
            extraction_timestamp: "2025-06-01T00:00:00Z".into(),
            nixpkgs_branch: "release-25.05".into(),
            ..StreamMetadata::default()
        };
        let doc = node_document(&pkg, &node_id, &info, &run);
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["nodeId"], "hello-2.12");
        assert_eq!(json["dependencies"]["count"], 1);
        assert_eq!(json["dependencies"]["direct"][0], "glibc-2.38");
        assert_eq!(json["nodeMetadata"]["hasDependencies"], true);
        assert_eq!(json["nodeMetadata"]["hasDependents"], false);
    }

    #[test]
    fn prefix_normalization() {
        assert_eq!(normalized_prefix("nodes"), "nodes/");
        assert_eq!(normalized_prefix("nodes/"), "nodes/");
        assert_eq!(normalized_prefix(""), "");
    }
}
