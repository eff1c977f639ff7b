// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Graph engine tests over small synthetic package sets.

use nixdex_graph::DependencyGraph;
use nixdex_model::RawPackage;
use serde_json::json;

/// Build a raw record with the given dependencies (by drv path).
fn record(name: &str, deps: &[&str]) -> RawPackage {
    let input_drvs: serde_json::Map<String, serde_json::Value> = deps
        .iter()
        .map(|d| (format!("/nix/store/{d}.drv"), json!(["out"])))
        .collect();
    serde_json::from_value(json!({
        "attrPath": [name.split('-').next().unwrap()],
        "name": name,
        "drvPath": format!("/nix/store/{name}.drv"),
        "inputDrvs": input_drvs,
        "meta": {}
    }))
    .unwrap()
}

#[test]
fn direct_and_transitive_dependencies() {
    // app -> lib -> glibc
    let records = vec![
        record("glibc-2.38", &[]),
        record("lib-1.0", &["glibc-2.38"]),
        record("app-0.1", &["lib-1.0"]),
    ];
    let graph = DependencyGraph::from_raw_packages(&records);
    assert_eq!(graph.node_count(), 3);
    assert_eq!(graph.edge_count(), 2);

    assert_eq!(graph.dependencies("app-0.1"), vec!["lib-1.0"]);
    let all = graph.all_dependencies("app-0.1");
    assert_eq!(all.len(), 2);
    assert!(all.contains(&"lib-1.0".to_string()));
    assert!(all.contains(&"glibc-2.38".to_string()));
    // The node itself is not part of its own closure
    assert!(!all.contains(&"app-0.1".to_string()));

    assert_eq!(graph.dependents("glibc-2.38"), vec!["lib-1.0"]);
    assert_eq!(graph.all_dependents("glibc-2.38").len(), 2);
}

#[test]
fn unknown_nodes_yield_empty_results() {
    let graph = DependencyGraph::from_raw_packages(&[record("solo-1.0", &[])]);
    assert!(graph.dependencies("nope-0.0").is_empty());
    assert!(graph.all_dependents("nope-0.0").is_empty());
    assert!(graph.shortest_path("nope-0.0", "solo-1.0").is_empty());
    let info = graph.dependency_info("nope-0.0");
    assert_eq!(info.dependency_count, 0);
}

#[test]
fn self_loops_and_unresolved_edges_are_dropped() {
    let records = vec![
        record("selfy-1.0", &["selfy-1.0", "not-in-set-9.9"]),
        record("other-1.0", &[]),
    ];
    let graph = DependencyGraph::from_raw_packages(&records);
    assert_eq!(graph.edge_count(), 0);
    assert!(graph.dependencies("selfy-1.0").is_empty());
}

#[test]
fn shortest_path_in_edge_direction() {
    let records = vec![
        record("d-1", &[]),
        record("c-1", &["d-1"]),
        record("b-1", &["c-1"]),
        record("a-1", &["b-1", "c-1"]),
    ];
    let graph = DependencyGraph::from_raw_packages(&records);
    assert_eq!(graph.shortest_path("a-1", "d-1"), vec!["a-1", "c-1", "d-1"]);
    // No path against edge direction
    assert!(graph.shortest_path("d-1", "a-1").is_empty());
    assert_eq!(graph.shortest_path("a-1", "a-1"), vec!["a-1"]);
}

#[test]
fn three_cycle_is_enumerated() {
    // A -> B -> C -> A
    let records = vec![
        record("a-1", &["b-1"]),
        record("b-1", &["c-1"]),
        record("c-1", &["a-1"]),
    ];
    let graph = DependencyGraph::from_raw_packages(&records);

    let cycles = graph.find_cycles();
    assert!(!cycles.is_empty());
    let cycle = &cycles[0];
    assert_eq!(cycle.len(), 3);
    for id in ["a-1", "b-1", "c-1"] {
        assert!(cycle.contains(&id.to_string()), "{id} missing from {cycle:?}");
    }

    // Transitive closure crosses the cycle
    let all = graph.all_dependencies("a-1");
    assert!(all.contains(&"b-1".to_string()));
    assert!(all.contains(&"c-1".to_string()));

    let stats = graph.stats();
    assert_eq!(stats.strongly_connected_components, 1);
    assert_eq!(stats.weakly_connected_components, 1);
}

#[test]
fn stats_over_small_graph() {
    let records = vec![
        record("leaf-1", &[]),
        record("mid-1", &["leaf-1"]),
        record("top-1", &["mid-1", "leaf-1"]),
    ];
    let graph = DependencyGraph::from_raw_packages(&records);
    let stats = graph.stats();
    assert_eq!(stats.total_packages, 3);
    assert_eq!(stats.total_dependencies, 3);
    assert_eq!(stats.max_dependencies, 2);
    assert_eq!(stats.max_dependents, 2);
    assert_eq!(stats.packages_with_no_dependencies, 1);
    assert_eq!(stats.packages_with_no_dependents, 1);
    // Three nodes, no cycle: every node is its own SCC
    assert_eq!(stats.strongly_connected_components, 3);
    assert_eq!(stats.weakly_connected_components, 1);
    assert!((stats.average_dependencies_per_package - 1.0).abs() < f64::EPSILON);
}

#[test]
fn duplicate_records_share_a_vertex() {
    // Same package evaluated for two systems with distinct drv paths
    let mut a = record("hello-2.12", &[]);
    a.drv_path = "/nix/store/hello-linux.drv".into();
    let mut b = record("hello-2.12", &[]);
    b.drv_path = "/nix/store/hello-darwin.drv".into();
    let consumer_record = {
        let mut r = record("consumer-1.0", &[]);
        r.input_drvs = [
            ("/nix/store/hello-linux.drv".to_string(), json!(["out"])),
            ("/nix/store/hello-darwin.drv".to_string(), json!(["out"])),
        ]
        .into_iter()
        .collect();
        r
    };
    let graph = DependencyGraph::from_raw_packages(&[a, b, consumer_record]);
    assert_eq!(graph.node_count(), 2);
    // Both drv paths resolve to the same vertex; the edge is deduplicated
    assert_eq!(graph.edge_count(), 1);
}

#[test]
fn process_all_covers_every_node() {
    let records = vec![record("x-1", &[]), record("y-1", &["x-1"])];
    let graph = DependencyGraph::from_raw_packages(&records);
    let data = graph.process_all();
    assert_eq!(data.dependency_data.len(), 2);
    assert_eq!(data.graph_stats.total_packages, 2);
    assert!(data.circular_dependencies.is_empty());
    let y = &data.dependency_data["y-1"];
    assert_eq!(y.direct_dependencies, vec!["x-1"]);
    assert_eq!(y.total_dependency_count, 1);
}
