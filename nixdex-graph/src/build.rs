// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Graph construction from raw evaluator records.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::info;

use nixdex_model::{RawPackage, parse_name_version};

/// Vertex metadata carried alongside the adjacency structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub package_name: String,
    pub version: String,
    pub attr_path: String,
    pub drv_path: String,
}

/// Directed dependency graph with dense vertex ids.
///
/// `out_adj[v]` lists what `v` depends on; `in_adj[v]` lists what depends
/// on `v`. Node ids are `<pname>-<version>` strings; the drv-path table
/// joins edges during construction and is kept for diagnostics.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    nodes: Vec<NodeInfo>,
    ids: HashMap<String, u32>,
    drv_index: HashMap<String, u32>,
    out_adj: Vec<Vec<u32>>,
    in_adj: Vec<Vec<u32>>,
    edge_count: usize,
}

impl DependencyGraph {
    /// Build the graph in two passes over the raw records.
    ///
    /// Pass 1 allocates a vertex per node id and records the
    /// `drv_path -> vertex` table. Pass 2 resolves `inputDrvs` keys
    /// through that table; self-loops and references to derivations the
    /// evaluation did not cover are dropped.
    pub fn from_raw_packages(records: &[RawPackage]) -> Self {
        let mut graph = DependencyGraph::default();

        for record in records {
            let (package_name, version) = parse_name_version(&record.name);
            if package_name.is_empty() || package_name == "unknown" {
                continue;
            }
            let node_id = format!("{package_name}-{version}");
            if graph.ids.contains_key(&node_id) {
                // Same package evaluated for several systems; first wins.
                if !record.drv_path.is_empty() {
                    let index = graph.ids[&node_id];
                    graph.drv_index.entry(record.drv_path.clone()).or_insert(index);
                }
                continue;
            }
            let index = graph.nodes.len() as u32;
            graph.nodes.push(NodeInfo {
                package_name,
                version,
                attr_path: record.attribute_path(),
                drv_path: record.drv_path.clone(),
            });
            graph.ids.insert(node_id, index);
            if !record.drv_path.is_empty() {
                graph.drv_index.insert(record.drv_path.clone(), index);
            }
        }

        graph.out_adj = vec![Vec::new(); graph.nodes.len()];
        graph.in_adj = vec![Vec::new(); graph.nodes.len()];

        let mut seen_edges: HashSet<(u32, u32)> = HashSet::new();
        for record in records {
            let (package_name, version) = parse_name_version(&record.name);
            let node_id = format!("{package_name}-{version}");
            let Some(&source) = graph.ids.get(&node_id) else {
                continue;
            };
            for dep_drv_path in record.input_drvs.keys() {
                let Some(&target) = graph.drv_index.get(dep_drv_path) else {
                    // Dependency outside the evaluated set; drop silently.
                    continue;
                };
                if target == source {
                    continue;
                }
                if seen_edges.insert((source, target)) {
                    graph.out_adj[source as usize].push(target);
                    graph.in_adj[target as usize].push(source);
                    graph.edge_count += 1;
                }
            }
        }

        info!(
            nodes = graph.nodes.len(),
            edges = graph.edge_count,
            "built dependency graph"
        );
        graph
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Vertex index for a node id.
    pub(crate) fn index_of(&self, node_id: &str) -> Option<u32> {
        self.ids.get(node_id).copied()
    }

    pub(crate) fn out_neighbors(&self, v: u32) -> &[u32] {
        &self.out_adj[v as usize]
    }

    pub(crate) fn in_neighbors(&self, v: u32) -> &[u32] {
        &self.in_adj[v as usize]
    }

    /// Node id of a vertex index.
    pub(crate) fn node_id_of(&self, v: u32) -> String {
        let info = &self.nodes[v as usize];
        format!("{}-{}", info.package_name, info.version)
    }

    /// Metadata for a node; None for unknown ids.
    pub fn node_info(&self, node_id: &str) -> Option<&NodeInfo> {
        self.index_of(node_id).map(|v| &self.nodes[v as usize])
    }

    /// Iterate all node ids in vertex order.
    pub fn node_ids(&self) -> impl Iterator<Item = String> + '_ {
        self.nodes
            .iter()
            .map(|info| format!("{}-{}", info.package_name, info.version))
    }

    /// Whether the graph contains the given node.
    pub fn contains(&self, node_id: &str) -> bool {
        self.ids.contains_key(node_id)
    }
}
