// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Smoke tests for nixdex-db.
//!
//! These tests verify the schema and the write/readback cycle using an
//! in-memory database.

use nixdex_db::CatalogDb;
use nixdex_model::{
    License, LicenseDetail, Maintainer, MergedPackage, Package, Variant, package_content_hash,
};

fn sample_package(id: &str, name: &str) -> MergedPackage {
    let mut package = Package {
        package_id: id.to_string(),
        package_name: name.to_string(),
        version: "1.0".to_string(),
        attribute_path: id.to_string(),
        description: "A sample package".to_string(),
        homepage: "https://example.org".to_string(),
        category: "tools".to_string(),
        available: true,
        platforms: vec!["x86_64-linux".into(), "aarch64-linux".into()],
        maintainers: vec![Maintainer {
            name: "alice".into(),
            email: "alice@example.org".into(),
            github: "alice".into(),
            github_id: Some(7),
        }],
        license: Some(License::Object(LicenseDetail {
            short_name: "mit".into(),
            spdx_id: "MIT".into(),
            ..LicenseDetail::default()
        })),
        last_updated: "2025-06-01T00:00:00Z".to_string(),
        ..Package::default()
    };
    package.content_hash = package_content_hash(&package);
    let variants = vec![Variant {
        package_id: id.to_string(),
        system: "x86_64-linux".to_string(),
        drv_path: format!("/nix/store/{name}.drv"),
        outputs: vec![("out".into(), format!("/nix/store/{name}"))],
    }];
    MergedPackage { package, variants }
}

#[test]
fn schema_creation_and_empty_counts() {
    let db = CatalogDb::open_memory().unwrap();
    assert_eq!(db.package_count().unwrap(), 0);
    assert_eq!(db.fts_count().unwrap(), 0);
    assert_eq!(db.variation_count().unwrap(), 0);
}

#[test]
fn write_and_read_roundtrip() {
    let mut db = CatalogDb::open_memory().unwrap();
    let merged = vec![sample_package("hello", "hello"), sample_package("jq", "jq")];
    let summary = db.write_catalog(&merged).unwrap();
    assert_eq!(summary.packages, 2);
    assert_eq!(summary.variations, 2);
    assert_eq!(summary.licenses, 1);
    assert_eq!(summary.architectures, 2);
    assert_eq!(summary.maintainers, 1);

    let packages = db.read_packages().unwrap();
    assert_eq!(packages.len(), 2);
    let hello = packages.iter().find(|p| p.package_id == "hello").unwrap();
    assert_eq!(hello.description, "A sample package");
    assert_eq!(hello.platforms.len(), 2);
    assert_eq!(hello.maintainers.len(), 1);
    assert_eq!(hello.maintainers[0].github_id, Some(7));
    match hello.license.as_ref().unwrap() {
        License::Object(detail) => assert_eq!(detail.spdx_id, "MIT"),
        other => panic!("unexpected license shape: {other:?}"),
    }
}

#[test]
fn fts_row_count_matches_packages() {
    let mut db = CatalogDb::open_memory().unwrap();
    let merged: Vec<MergedPackage> = (0..25)
        .map(|i| sample_package(&format!("pkg{i}"), &format!("pkg{i}")))
        .collect();
    db.write_catalog(&merged).unwrap();
    assert_eq!(db.package_count().unwrap(), 25);
    assert_eq!(db.fts_count().unwrap(), db.package_count().unwrap());
}

#[test]
fn fts_matches_description_terms() {
    let mut db = CatalogDb::open_memory().unwrap();
    let mut special = sample_package("ripgrep", "ripgrep");
    special.package.description = "recursively searches directories".to_string();
    db.write_catalog(&[special, sample_package("jq", "jq")])
        .unwrap();

    let count: i64 = db
        .connection()
        .query_row(
            "SELECT COUNT(*) FROM packages_fts WHERE packages_fts MATCH 'search'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    // Porter stemming folds 'searches' onto 'search'
    assert_eq!(count, 1);
}

#[test]
fn embeddings_roundtrip_bitwise() {
    let mut db = CatalogDb::open_memory().unwrap();
    let merged = vec![sample_package("hello", "hello")];
    db.write_catalog(&merged).unwrap();
    let hash = merged[0].package.content_hash;

    let vector: Vec<f32> = (0..256).map(|i| i as f32 * 0.5).collect();
    db.upsert_embedding("hello", hash, &vector).unwrap();

    let stored = db.embedding_for("hello").unwrap().unwrap();
    assert_eq!(stored, vector);

    let seeds = db.embedding_seeds().unwrap();
    assert_eq!(seeds.len(), 1);
    assert_eq!(seeds[0].0, hash);
    assert_eq!(seeds[0].1, vector);

    assert!(db.packages_without_embedding().unwrap().is_empty());
}

#[test]
fn packages_without_embedding_lists_unflagged_rows() {
    let mut db = CatalogDb::open_memory().unwrap();
    db.write_catalog(&[sample_package("a", "a"), sample_package("b", "b")])
        .unwrap();
    db.upsert_embedding("a", 1, &[0.0; 4]).unwrap();
    let missing = db.packages_without_embedding().unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].0, "b");
}

#[test]
fn junction_rows_reference_existing_lookups() {
    let mut db = CatalogDb::open_memory().unwrap();
    db.write_catalog(&[sample_package("hello", "hello")]).unwrap();
    // Every junction row joins back to a lookup row
    let orphans: i64 = db
        .connection()
        .query_row(
            r#"
            SELECT COUNT(*) FROM package_licenses pl
            LEFT JOIN licenses l ON pl.license_id = l.license_id
            WHERE l.license_id IS NULL
            "#,
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(orphans, 0);
}

#[test]
fn finalize_vacuums_on_disk_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("catalog.db");
    {
        let mut db = CatalogDb::open(&path, nixdex_db::OpenMode::Create).unwrap();
        db.create_schema(&nixdex_db::FtsConfig::default()).unwrap();
        db.write_catalog(&[sample_package("hello", "hello")]).unwrap();
        db.finalize().unwrap();
    }
    let db = CatalogDb::open(&path, nixdex_db::OpenMode::ReadOnly).unwrap();
    assert_eq!(db.package_count().unwrap(), 1);
}
