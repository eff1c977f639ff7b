// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Write operations for the catalog database.

use std::collections::{BTreeSet, HashSet};

use rusqlite::params;
use tracing::{debug, info};

use nixdex_model::{Maintainer, MergedPackage, search_text};

use crate::connection::CatalogDb;
use crate::error::Result;

/// Row counts produced by a catalog write.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub packages: usize,
    pub variations: usize,
    pub licenses: usize,
    pub architectures: usize,
    pub maintainers: usize,
}

impl CatalogDb {
    /// Write the full merged catalog in one transaction: lookup tables
    /// first, then packages, variations, junctions, and the FTS mirror.
    pub fn write_catalog(&mut self, merged: &[MergedPackage]) -> Result<WriteSummary> {
        let mut summary = WriteSummary::default();
        let tx = self.conn.transaction()?;

        // Lookup tables are extracted across all packages before any
        // junction row references them.
        let licenses = collect_licenses(merged);
        let architectures = collect_architectures(merged);
        let maintainers = collect_maintainers(merged);
        summary.licenses = licenses.len();
        summary.architectures = architectures.len();
        summary.maintainers = maintainers.len();

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO licenses
                    (short_name, full_name, spdx_id, url, is_free, is_redistributable, is_deprecated)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )?;
            for license in &licenses {
                stmt.execute(params![
                    license.short_name,
                    license.full_name,
                    license.spdx_id,
                    license.url,
                    license.free,
                    license.redistributable,
                    license.deprecated,
                ])?;
            }

            let mut stmt = tx.prepare("INSERT OR IGNORE INTO architectures (name) VALUES (?1)")?;
            for arch in &architectures {
                stmt.execute(params![arch])?;
            }

            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO maintainers (name, email, github, github_id)
                VALUES (?1, ?2, ?3, ?4)
                "#,
            )?;
            for maintainer in &maintainers {
                stmt.execute(params![
                    maintainer.name,
                    maintainer.email,
                    maintainer.github,
                    maintainer.github_id,
                ])?;
            }

            let mut insert_package = tx.prepare(
                r#"
                INSERT OR REPLACE INTO packages (
                    package_id, package_name, version, attribute_path, description,
                    long_description, search_text, homepage, category, broken, unfree,
                    available, insecure, unsupported, main_program, position,
                    outputs_to_install, last_updated, content_hash, has_embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, 0)
                "#,
            )?;
            let mut insert_variation = tx.prepare(
                r#"
                INSERT OR REPLACE INTO package_variations
                    (variation_id, package_id, system, drv_path, outputs)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )?;
            let mut insert_license_rel = tx.prepare(
                r#"
                INSERT OR IGNORE INTO package_licenses (package_id, license_id)
                SELECT ?1, license_id FROM licenses WHERE short_name = ?2
                "#,
            )?;
            let mut insert_arch_rel = tx.prepare(
                r#"
                INSERT OR IGNORE INTO package_architectures (package_id, arch_id)
                SELECT ?1, arch_id FROM architectures WHERE name = ?2
                "#,
            )?;
            let mut insert_maintainer_rel = tx.prepare(
                r#"
                INSERT OR IGNORE INTO package_maintainers (package_id, maintainer_id)
                SELECT ?1, maintainer_id FROM maintainers
                WHERE name = ?2 AND email = ?3 AND github = ?4
                "#,
            )?;
            let mut insert_fts = tx.prepare(
                r#"
                INSERT INTO packages_fts
                    (rowid, package_id, package_name, attribute_path, description, long_description, main_program)
                SELECT rowid, package_id, package_name, attribute_path, description, long_description, main_program
                FROM packages WHERE package_id = ?1
                "#,
            )?;

            for entry in merged {
                let pkg = &entry.package;
                let outputs_to_install = if pkg.outputs_to_install.is_empty() {
                    String::new()
                } else {
                    serde_json::to_string(&pkg.outputs_to_install)?
                };
                insert_package.execute(params![
                    pkg.package_id,
                    pkg.package_name,
                    pkg.version,
                    pkg.attribute_path,
                    pkg.description,
                    pkg.long_description,
                    search_text(pkg),
                    pkg.homepage,
                    pkg.category,
                    pkg.broken,
                    pkg.unfree,
                    pkg.available,
                    pkg.insecure,
                    pkg.unsupported,
                    pkg.main_program,
                    pkg.position,
                    outputs_to_install,
                    pkg.last_updated,
                    pkg.content_hash,
                ])?;
                summary.packages += 1;

                for variant in &entry.variants {
                    let outputs: serde_json::Map<String, serde_json::Value> = variant
                        .outputs
                        .iter()
                        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                        .collect();
                    insert_variation.execute(params![
                        variant.variation_id(),
                        variant.package_id,
                        variant.system,
                        variant.drv_path,
                        serde_json::Value::Object(outputs).to_string(),
                    ])?;
                    summary.variations += 1;
                }

                if let Some(license) = &pkg.license {
                    for detail in license.details() {
                        if !detail.short_name.is_empty() {
                            insert_license_rel.execute(params![pkg.package_id, detail.short_name])?;
                        }
                    }
                }
                for platform in &pkg.platforms {
                    insert_arch_rel.execute(params![pkg.package_id, platform])?;
                }
                for maintainer in &pkg.maintainers {
                    insert_maintainer_rel.execute(params![
                        pkg.package_id,
                        maintainer.name,
                        maintainer.email,
                        maintainer.github,
                    ])?;
                }

                insert_fts.execute(params![pkg.package_id])?;

                if summary.packages % 1000 == 0 {
                    debug!(packages = summary.packages, "catalog write progress");
                }
            }
        }

        tx.commit()?;
        info!(
            packages = summary.packages,
            variations = summary.variations,
            licenses = summary.licenses,
            architectures = summary.architectures,
            maintainers = summary.maintainers,
            "catalog written"
        );
        Ok(summary)
    }

    /// Store a vector for a package and flag the row. Vectors are raw
    /// little-endian f32 bytes.
    pub fn upsert_embedding(
        &self,
        package_id: &str,
        content_hash: i64,
        vector: &[f32],
    ) -> Result<()> {
        let mut blob = Vec::with_capacity(vector.len() * 4);
        for value in vector {
            blob.extend_from_slice(&value.to_le_bytes());
        }
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO embeddings (package_id, content_hash, vector)
            VALUES (?1, ?2, ?3)
            "#,
            params![package_id, content_hash, blob],
        )?;
        self.conn.execute(
            "UPDATE packages SET has_embedding = 1 WHERE package_id = ?1",
            params![package_id],
        )?;
        Ok(())
    }
}

/// Unique licenses across all packages, keyed by short name.
fn collect_licenses(merged: &[MergedPackage]) -> Vec<nixdex_model::LicenseDetail> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for entry in merged {
        let Some(license) = &entry.package.license else {
            continue;
        };
        for detail in license.details() {
            if !detail.short_name.is_empty() && seen.insert(detail.short_name.clone()) {
                out.push(detail);
            }
        }
    }
    out
}

/// Unique architecture names, sorted.
fn collect_architectures(merged: &[MergedPackage]) -> Vec<String> {
    let set: BTreeSet<String> = merged
        .iter()
        .flat_map(|entry| entry.package.platforms.iter().cloned())
        .collect();
    set.into_iter().collect()
}

/// Unique maintainers keyed by (name, email, github).
fn collect_maintainers(merged: &[MergedPackage]) -> Vec<Maintainer> {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    let mut out = Vec::new();
    for entry in merged {
        for maintainer in &entry.package.maintainers {
            if seen.insert(maintainer.key()) {
                out.push(maintainer.clone());
            }
        }
    }
    out
}
