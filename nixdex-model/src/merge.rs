// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Variant merging.
//!
//! Records that differ only in their architecture segment share a
//! `package_id` and collapse into one canonical [`Package`] plus one
//! [`Variant`] row per system. Merge rules:
//!
//! - platforms: set union, first-seen order
//! - maintainers: union keyed by (name, email, github)
//! - scalar fields: first non-empty value in stream order
//! - broken/unfree/insecure/unsupported: logical OR
//! - available: logical AND

use std::collections::{HashMap, HashSet};

use crate::normalize::NormalizedPackage;
use crate::package::{Package, Variant, package_content_hash};

/// A canonical package together with its variant rows. Invariant: at
/// least one variant per package.
#[derive(Debug, Clone)]
pub struct MergedPackage {
    pub package: Package,
    pub variants: Vec<Variant>,
}

/// Group normalized records by package id and merge each group.
///
/// Stream order is significant: the first record of a group seeds the
/// scalar fields, and groups are returned in first-seen order.
pub fn group_and_merge(records: Vec<NormalizedPackage>) -> Vec<MergedPackage> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<NormalizedPackage>> = HashMap::new();
    for record in records {
        let group = groups.entry(record.package_id.clone()).or_default();
        if group.is_empty() {
            order.push(record.package_id.clone());
        }
        group.push(record);
    }

    order
        .into_iter()
        .map(|id| {
            let group = groups.remove(&id).expect("group exists for ordered id");
            merge_group(group)
        })
        .collect()
}

fn merge_group(group: Vec<NormalizedPackage>) -> MergedPackage {
    debug_assert!(!group.is_empty());

    let mut variants: Vec<Variant> = Vec::new();
    let mut seen_systems: HashSet<String> = HashSet::new();
    for record in &group {
        if seen_systems.insert(record.system.clone()) {
            variants.push(Variant {
                package_id: record.package_id.clone(),
                system: record.system.clone(),
                drv_path: record.drv_path.clone(),
                outputs: record.outputs.clone(),
            });
        }
    }

    let first = &group[0];
    let mut package = Package {
        package_id: first.package_id.clone(),
        package_name: first.package_name.clone(),
        version: first.version.clone(),
        attribute_path: first.attribute_path.clone(),
        description: first.description.clone(),
        long_description: first.long_description.clone(),
        homepage: first.homepage.clone(),
        license: first.license.clone(),
        platforms: Vec::new(),
        maintainers: Vec::new(),
        category: first.category.clone(),
        broken: false,
        unfree: false,
        available: true,
        insecure: false,
        unsupported: false,
        main_program: first.main_program.clone(),
        position: first.position.clone(),
        outputs_to_install: first.outputs_to_install.clone(),
        last_updated: first.last_updated.clone(),
        content_hash: 0,
    };

    let mut seen_platforms: HashSet<&str> = HashSet::new();
    let mut seen_maintainers: HashSet<(String, String, String)> = HashSet::new();
    for record in &group {
        for platform in &record.platforms {
            if seen_platforms.insert(platform.as_str()) {
                package.platforms.push(platform.clone());
            }
        }
        for maintainer in &record.maintainers {
            if seen_maintainers.insert(maintainer.key()) {
                package.maintainers.push(maintainer.clone());
            }
        }
        if package.description.is_empty() {
            package.description = record.description.clone();
        }
        if package.long_description.is_empty() {
            package.long_description = record.long_description.clone();
        }
        if package.homepage.is_empty() {
            package.homepage = record.homepage.clone();
        }
        if package.category.is_empty() {
            package.category = record.category.clone();
        }
        if package.main_program.is_empty() {
            package.main_program = record.main_program.clone();
        }
        if package.license.is_none() {
            package.license = record.license.clone();
        }
        package.broken |= record.broken;
        package.unfree |= record.unfree;
        package.insecure |= record.insecure;
        package.unsupported |= record.unsupported;
        package.available &= record.available;
    }

    package.content_hash = package_content_hash(&package);
    MergedPackage { package, variants }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(system: &str) -> NormalizedPackage {
        NormalizedPackage {
            package_id: "legacyPackages.hello".into(),
            package_name: "hello".into(),
            version: "2.12".into(),
            attribute_path: format!("legacyPackages.{system}.hello"),
            system: system.into(),
            drv_path: format!("/nix/store/{system}-hello.drv"),
            available: true,
            ..NormalizedPackage::default()
        }
    }

    #[test]
    fn variants_merge_into_one_package() {
        let mut a = record("x86_64-linux");
        a.platforms = vec!["x86_64-linux".into(), "aarch64-linux".into()];
        a.broken = false;
        let mut b = record("aarch64-darwin");
        b.platforms = vec!["aarch64-darwin".into(), "x86_64-linux".into()];
        b.unfree = true;

        let merged = group_and_merge(vec![a, b]);
        assert_eq!(merged.len(), 1);
        let m = &merged[0];
        assert_eq!(m.variants.len(), 2);
        assert!(m.package.unfree);
        assert!(!m.package.broken);
        assert_eq!(
            m.package.platforms,
            vec!["x86_64-linux", "aarch64-linux", "aarch64-darwin"]
        );
    }

    #[test]
    fn available_is_and_of_variants() {
        let mut a = record("x86_64-linux");
        a.available = true;
        let mut b = record("aarch64-darwin");
        b.available = false;
        let merged = group_and_merge(vec![a, b]);
        assert!(!merged[0].package.available);
    }

    #[test]
    fn first_non_empty_scalar_wins() {
        let mut a = record("x86_64-linux");
        a.description = String::new();
        let mut b = record("aarch64-darwin");
        b.description = "from darwin".into();
        let merged = group_and_merge(vec![a, b]);
        assert_eq!(merged[0].package.description, "from darwin");
    }

    #[test]
    fn groups_preserve_stream_order() {
        let mut a = record("x86_64-linux");
        a.package_id = "b-pkg".into();
        let mut b = record("x86_64-linux");
        b.package_id = "a-pkg".into();
        let merged = group_and_merge(vec![a, b]);
        assert_eq!(merged[0].package.package_id, "b-pkg");
        assert_eq!(merged[1].package.package_id, "a-pkg");
    }

    #[test]
    fn single_record_yields_one_variant() {
        let merged = group_and_merge(vec![record("x86_64-linux")]);
        assert_eq!(merged[0].variants.len(), 1);
        assert_eq!(
            merged[0].variants[0].variation_id(),
            "legacyPackages.hello.x86_64-linux"
        );
    }
}
