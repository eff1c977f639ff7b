// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Graph queries: direct neighbors, transitive closures, shortest paths,
//! cycle enumeration.
//!
//! All queries on unknown node ids return empty results rather than
//! errors; dependency data is inherently incomplete when shards fail.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::build::DependencyGraph;

/// Cap on the number of enumerated cycles.
const MAX_CYCLES: usize = 50;

/// Per-node dependency summary as stored in the node artifacts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyInfo {
    pub direct_dependencies: Vec<String>,
    pub direct_dependents: Vec<String>,
    pub all_dependencies: Vec<String>,
    pub all_dependents: Vec<String>,
    pub dependency_count: usize,
    pub dependent_count: usize,
    pub total_dependency_count: usize,
    pub total_dependent_count: usize,
}

impl DependencyGraph {
    /// Direct dependencies of a node (what it depends on).
    pub fn dependencies(&self, node_id: &str) -> Vec<String> {
        match self.index_of(node_id) {
            Some(v) => self
                .out_neighbors(v)
                .iter()
                .map(|&n| self.node_id_of(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// Direct dependents of a node (what depends on it).
    pub fn dependents(&self, node_id: &str) -> Vec<String> {
        match self.index_of(node_id) {
            Some(v) => self
                .in_neighbors(v)
                .iter()
                .map(|&n| self.node_id_of(n))
                .collect(),
            None => Vec::new(),
        }
    }

    /// All transitive dependencies of a node, excluding the node itself
    /// unless it sits on a cycle through itself.
    pub fn all_dependencies(&self, node_id: &str) -> Vec<String> {
        self.closure(node_id, Direction::Out)
    }

    /// All transitive dependents of a node.
    pub fn all_dependents(&self, node_id: &str) -> Vec<String> {
        self.closure(node_id, Direction::In)
    }

    /// Shortest dependency path from `source` to `target` in edge
    /// direction, inclusive of both endpoints. Empty when no path exists.
    pub fn shortest_path(&self, source: &str, target: &str) -> Vec<String> {
        let (Some(s), Some(t)) = (self.index_of(source), self.index_of(target)) else {
            return Vec::new();
        };
        if s == t {
            return vec![self.node_id_of(s)];
        }
        let mut prev: Vec<Option<u32>> = vec![None; self.node_count()];
        let mut visited = vec![false; self.node_count()];
        let mut queue = VecDeque::new();
        visited[s as usize] = true;
        queue.push_back(s);
        while let Some(v) = queue.pop_front() {
            for &n in self.out_neighbors(v) {
                if visited[n as usize] {
                    continue;
                }
                visited[n as usize] = true;
                prev[n as usize] = Some(v);
                if n == t {
                    let mut path = vec![t];
                    let mut cur = t;
                    while let Some(p) = prev[cur as usize] {
                        path.push(p);
                        cur = p;
                    }
                    path.reverse();
                    return path.into_iter().map(|v| self.node_id_of(v)).collect();
                }
                queue.push_back(n);
            }
        }
        Vec::new()
    }

    /// Enumerate dependency cycles with an iterative DFS, capped at 50.
    ///
    /// When an edge closes back to a vertex on the current DFS stack the
    /// stack slice from that vertex to the top is emitted as one cycle.
    pub fn find_cycles(&self) -> Vec<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let n = self.node_count();
        let mut color = vec![Color::White; n];
        let mut cycles: Vec<Vec<String>> = Vec::new();

        // Explicit stack of (vertex, next-neighbor-offset); path mirrors
        // the gray vertices in order.
        let mut stack: Vec<(u32, usize)> = Vec::new();
        let mut path: Vec<u32> = Vec::new();

        for start in 0..n as u32 {
            if color[start as usize] != Color::White {
                continue;
            }
            stack.push((start, 0));
            color[start as usize] = Color::Gray;
            path.push(start);

            while let Some(frame) = stack.last_mut() {
                let v = frame.0;
                let offset = frame.1;
                frame.1 += 1;
                let neighbors = self.out_neighbors(v);
                if offset < neighbors.len() {
                    let next = neighbors[offset];
                    match color[next as usize] {
                        Color::White => {
                            color[next as usize] = Color::Gray;
                            stack.push((next, 0));
                            path.push(next);
                        }
                        Color::Gray => {
                            if cycles.len() < MAX_CYCLES {
                                let pos = path
                                    .iter()
                                    .position(|&p| p == next)
                                    .expect("gray vertex is on the path");
                                let cycle =
                                    path[pos..].iter().map(|&p| self.node_id_of(p)).collect();
                                cycles.push(cycle);
                            }
                        }
                        Color::Black => {}
                    }
                } else {
                    color[v as usize] = Color::Black;
                    stack.pop();
                    path.pop();
                }
            }
            if cycles.len() >= MAX_CYCLES {
                break;
            }
        }
        cycles
    }

    /// Comprehensive dependency information for a node. Unknown nodes
    /// yield the empty default.
    pub fn dependency_info(&self, node_id: &str) -> DependencyInfo {
        if !self.contains(node_id) {
            return DependencyInfo::default();
        }
        let direct_dependencies = self.dependencies(node_id);
        let direct_dependents = self.dependents(node_id);
        let all_dependencies = self.all_dependencies(node_id);
        let all_dependents = self.all_dependents(node_id);
        DependencyInfo {
            dependency_count: direct_dependencies.len(),
            dependent_count: direct_dependents.len(),
            total_dependency_count: all_dependencies.len(),
            total_dependent_count: all_dependents.len(),
            direct_dependencies,
            direct_dependents,
            all_dependencies,
            all_dependents,
        }
    }

    /// BFS closure seeded from the direct neighbors so the source itself
    /// only appears when reachable through a cycle.
    fn closure(&self, node_id: &str, direction: Direction) -> Vec<String> {
        let Some(start) = self.index_of(node_id) else {
            return Vec::new();
        };
        let mut visited: HashSet<u32> = HashSet::new();
        let mut order: Vec<u32> = Vec::new();
        let mut queue: VecDeque<u32> = VecDeque::new();
        for &n in self.neighbors(start, direction) {
            if visited.insert(n) {
                order.push(n);
                queue.push_back(n);
            }
        }
        while let Some(v) = queue.pop_front() {
            for &n in self.neighbors(v, direction) {
                if visited.insert(n) {
                    order.push(n);
                    queue.push_back(n);
                }
            }
        }
        order.into_iter().map(|v| self.node_id_of(v)).collect()
    }

    fn neighbors(&self, v: u32, direction: Direction) -> &[u32] {
        match direction {
            Direction::Out => self.out_neighbors(v),
            Direction::In => self.in_neighbors(v),
        }
    }
}

#[derive(Clone, Copy)]
enum Direction {
    Out,
    In,
}
