// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Dependency graph engine.
//!
//! Builds a directed graph over the full package set from derivation
//! store-path references and answers closure, path, cycle, and aggregate
//! queries. The graph is a pair of flat adjacency vectors indexed by
//! dense vertex id; on a ~100k-node graph every traversal is plain index
//! iteration with no per-neighbor descriptor overhead.

mod build;
mod query;
mod stats;

pub use build::{DependencyGraph, NodeInfo};
pub use query::DependencyInfo;
pub use stats::GraphStats;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Everything downstream writers need from one graph pass: per-node
/// dependency information, aggregate statistics, and detected cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphData {
    pub dependency_data: HashMap<String, DependencyInfo>,
    pub graph_stats: GraphStats,
    pub circular_dependencies: Vec<Vec<String>>,
}

impl DependencyGraph {
    /// Compute dependency information for every node plus aggregates.
    pub fn process_all(&self) -> GraphData {
        let mut dependency_data = HashMap::with_capacity(self.node_count());
        for node_id in self.node_ids() {
            let info = self.dependency_info(&node_id);
            dependency_data.insert(node_id, info);
        }
        let graph_stats = self.stats();
        let circular_dependencies = self.find_cycles();
        if !circular_dependencies.is_empty() {
            tracing::warn!(
                cycles = circular_dependencies.len(),
                "dependency graph contains circular dependencies"
            );
        }
        GraphData {
            dependency_data,
            graph_stats,
            circular_dependencies,
        }
    }
}
