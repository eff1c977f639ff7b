// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Query operations: row counts, full package readback, and embedding
//! seeds.

use rusqlite::params;
use tracing::info;

use nixdex_model::{License, LicenseDetail, Maintainer, Package};

use crate::connection::CatalogDb;
use crate::error::{Error, Result};

impl CatalogDb {
    pub fn package_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM packages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn fts_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM packages_fts", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn variation_count(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM package_variations",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Package ids and content hashes of rows without a stored vector.
    pub fn packages_without_embedding(&self) -> Result<Vec<(String, i64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT package_id, content_hash FROM packages WHERE has_embedding = 0",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// `(content_hash, vector)` pairs seeding the next run's embedding
    /// cache.
    pub fn embedding_seeds(&self) -> Result<Vec<(i64, Vec<f32>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT package_id, content_hash, vector FROM embeddings")?;
        let rows = stmt
            .query_map([], |row| {
                let package_id: String = row.get(0)?;
                let content_hash: i64 = row.get(1)?;
                let blob: Vec<u8> = row.get(2)?;
                Ok((package_id, content_hash, blob))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut seeds = Vec::with_capacity(rows.len());
        for (package_id, content_hash, blob) in rows {
            if blob.len() % 4 != 0 {
                return Err(Error::CorruptEmbedding { package_id });
            }
            let vector = blob
                .chunks_exact(4)
                .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
                .collect();
            seeds.push((content_hash, vector));
        }
        info!(seeds = seeds.len(), "loaded embedding seeds");
        Ok(seeds)
    }

    /// Stored vector for one package, if any.
    pub fn embedding_for(&self, package_id: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT vector FROM embeddings WHERE package_id = ?1",
                params![package_id],
                |row| row.get(0),
            )
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        match blob {
            None => Ok(None),
            Some(blob) if blob.len() % 4 == 0 => Ok(Some(
                blob.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect(),
            )),
            Some(_) => Err(Error::CorruptEmbedding {
                package_id: package_id.to_string(),
            }),
        }
    }

    /// Read every canonical package back, rebuilding license,
    /// maintainer, and platform structures from the junction tables.
    /// Used by the minified-artifact writer.
    pub fn read_packages(&self) -> Result<Vec<Package>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT package_id, package_name, version, attribute_path, description,
                   long_description, homepage, category, broken, unfree, available,
                   insecure, unsupported, main_program, position, outputs_to_install,
                   last_updated, content_hash
            FROM packages ORDER BY rowid
            "#,
        )?;
        let mut packages = stmt
            .query_map([], |row| {
                let outputs_raw: String = row.get(15)?;
                Ok(Package {
                    package_id: row.get(0)?,
                    package_name: row.get(1)?,
                    version: row.get(2)?,
                    attribute_path: row.get(3)?,
                    description: row.get(4)?,
                    long_description: row.get(5)?,
                    homepage: row.get(6)?,
                    category: row.get(7)?,
                    broken: row.get(8)?,
                    unfree: row.get(9)?,
                    available: row.get(10)?,
                    insecure: row.get(11)?,
                    unsupported: row.get(12)?,
                    main_program: row.get(13)?,
                    position: row.get(14)?,
                    outputs_to_install: serde_json::from_str(&outputs_raw).unwrap_or_default(),
                    last_updated: row.get(16)?,
                    content_hash: row.get(17)?,
                    license: None,
                    platforms: Vec::new(),
                    maintainers: Vec::new(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut license_stmt = self.conn.prepare(
            r#"
            SELECT l.short_name, l.full_name, l.spdx_id, l.url,
                   l.is_free, l.is_redistributable, l.is_deprecated
            FROM licenses l
            JOIN package_licenses pl ON l.license_id = pl.license_id
            WHERE pl.package_id = ?1
            ORDER BY l.license_id
            "#,
        )?;
        let mut arch_stmt = self.conn.prepare(
            r#"
            SELECT a.name
            FROM architectures a
            JOIN package_architectures pa ON a.arch_id = pa.arch_id
            WHERE pa.package_id = ?1
            ORDER BY a.name
            "#,
        )?;
        let mut maintainer_stmt = self.conn.prepare(
            r#"
            SELECT m.name, m.email, m.github, m.github_id
            FROM maintainers m
            JOIN package_maintainers pm ON m.maintainer_id = pm.maintainer_id
            WHERE pm.package_id = ?1
            ORDER BY m.maintainer_id
            "#,
        )?;

        for pkg in &mut packages {
            let licenses = license_stmt
                .query_map(params![pkg.package_id], |row| {
                    Ok(LicenseDetail {
                        short_name: row.get(0)?,
                        full_name: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        spdx_id: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        url: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        free: row.get(4)?,
                        redistributable: row.get(5)?,
                        deprecated: row.get(6)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            pkg.license = match licenses.len() {
                0 => None,
                1 => Some(License::Object(licenses.into_iter().next().expect("one"))),
                _ => Some(License::Array { licenses }),
            };

            pkg.platforms = arch_stmt
                .query_map(params![pkg.package_id], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            pkg.maintainers = maintainer_stmt
                .query_map(params![pkg.package_id], |row| {
                    Ok(Maintainer {
                        name: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                        email: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                        github: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        github_id: row.get(3)?,
                    })
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
        }

        Ok(packages)
    }
}
