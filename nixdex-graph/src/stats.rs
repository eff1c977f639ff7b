// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Aggregate graph statistics.

use serde::{Deserialize, Serialize};

use crate::build::DependencyGraph;

/// Whole-graph aggregates published in the stats artifact and the node
/// index file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_packages: usize,
    pub total_dependencies: usize,
    pub strongly_connected_components: usize,
    pub weakly_connected_components: usize,
    pub average_dependencies_per_package: f64,
    pub average_dependents_per_package: f64,
    pub max_dependencies: usize,
    pub max_dependents: usize,
    pub packages_with_no_dependencies: usize,
    pub packages_with_no_dependents: usize,
}

impl DependencyGraph {
    /// Compute aggregate statistics in a single adjacency sweep plus the
    /// two component counts.
    pub fn stats(&self) -> GraphStats {
        let n = self.node_count();
        let mut out_sum = 0usize;
        let mut in_sum = 0usize;
        let mut max_out = 0usize;
        let mut max_in = 0usize;
        let mut zero_out = 0usize;
        let mut zero_in = 0usize;
        for v in 0..n as u32 {
            let out = self.out_neighbors(v).len();
            let inn = self.in_neighbors(v).len();
            out_sum += out;
            in_sum += inn;
            max_out = max_out.max(out);
            max_in = max_in.max(inn);
            if out == 0 {
                zero_out += 1;
            }
            if inn == 0 {
                zero_in += 1;
            }
        }
        GraphStats {
            total_packages: n,
            total_dependencies: self.edge_count(),
            strongly_connected_components: self.count_sccs(),
            weakly_connected_components: self.count_wccs(),
            average_dependencies_per_package: if n > 0 { out_sum as f64 / n as f64 } else { 0.0 },
            average_dependents_per_package: if n > 0 { in_sum as f64 / n as f64 } else { 0.0 },
            max_dependencies: max_out,
            max_dependents: max_in,
            packages_with_no_dependencies: zero_out,
            packages_with_no_dependents: zero_in,
        }
    }

    /// Strongly connected component count, iterative Tarjan.
    fn count_sccs(&self) -> usize {
        let n = self.node_count();
        const UNSET: u32 = u32::MAX;
        let mut index = vec![UNSET; n];
        let mut lowlink = vec![0u32; n];
        let mut on_stack = vec![false; n];
        let mut scc_stack: Vec<u32> = Vec::new();
        let mut next_index = 0u32;
        let mut count = 0usize;

        // (vertex, neighbor offset) call frames
        let mut frames: Vec<(u32, usize)> = Vec::new();

        for start in 0..n as u32 {
            if index[start as usize] != UNSET {
                continue;
            }
            frames.push((start, 0));
            while let Some(frame) = frames.last_mut() {
                let v = frame.0;
                let offset = frame.1;
                if offset == 0 {
                    index[v as usize] = next_index;
                    lowlink[v as usize] = next_index;
                    next_index += 1;
                    scc_stack.push(v);
                    on_stack[v as usize] = true;
                }
                let neighbors = self.out_neighbors(v);
                if offset < neighbors.len() {
                    frame.1 += 1;
                    let next = neighbors[offset];
                    if index[next as usize] == UNSET {
                        frames.push((next, 0));
                    } else if on_stack[next as usize] {
                        lowlink[v as usize] = lowlink[v as usize].min(index[next as usize]);
                    }
                } else {
                    frames.pop();
                    if let Some(parent) = frames.last() {
                        let p = parent.0 as usize;
                        lowlink[p] = lowlink[p].min(lowlink[v as usize]);
                    }
                    if lowlink[v as usize] == index[v as usize] {
                        count += 1;
                        while let Some(w) = scc_stack.pop() {
                            on_stack[w as usize] = false;
                            if w == v {
                                break;
                            }
                        }
                    }
                }
            }
        }
        count
    }

    /// Weakly connected component count via BFS over the undirected view.
    fn count_wccs(&self) -> usize {
        let n = self.node_count();
        let mut visited = vec![false; n];
        let mut queue: Vec<u32> = Vec::new();
        let mut count = 0usize;
        for start in 0..n as u32 {
            if visited[start as usize] {
                continue;
            }
            count += 1;
            visited[start as usize] = true;
            queue.push(start);
            while let Some(v) = queue.pop() {
                for &next in self.out_neighbors(v).iter().chain(self.in_neighbors(v)) {
                    if !visited[next as usize] {
                        visited[next as usize] = true;
                        queue.push(next);
                    }
                }
            }
        }
        count
    }
}
