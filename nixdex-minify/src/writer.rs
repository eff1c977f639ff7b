// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! The minified-artifact writer.

use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use nixdex_model::Package;

use crate::error::{Error, Result};

/// Tunables for dictionary training and compression.
#[derive(Debug, Clone)]
pub struct MinifySettings {
    /// Dictionary capacity in bytes
    pub dict_size: usize,
    /// Maximum number of packages sampled for training
    pub sample_count: usize,
    pub compression_level: i32,
}

impl Default for MinifySettings {
    fn default() -> Self {
        MinifySettings {
            dict_size: 64 * 1024,
            sample_count: 10_000,
            compression_level: 3,
        }
    }
}

/// Paths of the two files that make up the artifact.
#[derive(Debug, Clone)]
pub struct MinifyOutput {
    pub db_path: PathBuf,
    pub dict_path: PathBuf,
}

const MINIFIED_SCHEMA: &str = r#"
create table if not exists packages_kv (
    id   text primary key,
    data blob not null
);

create virtual table if not exists packages_fts using fts5(
    id,
    name,
    description,
    content=''
);
"#;

/// Writes the compressed key-value artifact plus its dictionary.
pub struct MinifiedWriter {
    settings: MinifySettings,
}

impl MinifiedWriter {
    pub fn new(settings: MinifySettings) -> Self {
        MinifiedWriter { settings }
    }

    /// Write `packages` into a fresh database at `db_path`, with the
    /// trained dictionary at the sibling `.dict` path.
    pub fn write_artifact(&self, db_path: &Path, packages: &[Package]) -> Result<MinifyOutput> {
        let dict_path = db_path.with_extension("dict");
        info!(
            packages = packages.len(),
            dict_size = self.settings.dict_size,
            level = self.settings.compression_level,
            "writing minified artifact to {}",
            db_path.display()
        );

        let dictionary = self.train_dictionary(packages)?;
        std::fs::write(&dict_path, &dictionary).map_err(|e| Error::WriteFile {
            path: dict_path.clone(),
            source: e,
        })?;
        info!(bytes = dictionary.len(), "dictionary written");

        let conn = Connection::open(db_path)?;
        conn.execute_batch(MINIFIED_SCHEMA)?;
        self.insert_packages(&conn, packages, &dictionary)?;

        conn.execute_batch("VACUUM; ANALYZE;")?;
        drop(conn);
        info!("minified artifact complete: {}", db_path.display());
        Ok(MinifyOutput {
            db_path: db_path.to_path_buf(),
            dict_path,
        })
    }

    /// Train the dictionary on a uniform random sample of the corpus.
    ///
    /// Training needs a reasonably sized corpus; on tiny inputs zstd
    /// refuses, in which case the artifact falls back to dictionaryless
    /// compression (an empty sibling file).
    fn train_dictionary(&self, packages: &[Package]) -> Result<Vec<u8>> {
        if packages.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = rand::rng();
        let mut indices: Vec<usize> = (0..packages.len()).collect();
        indices.shuffle(&mut rng);
        indices.truncate(self.settings.sample_count);

        let mut samples: Vec<Vec<u8>> = Vec::with_capacity(indices.len());
        for index in indices {
            samples.push(package_json(&packages[index])?);
        }
        debug!(samples = samples.len(), "training compression dictionary");

        match zstd::dict::from_samples(&samples, self.settings.dict_size) {
            Ok(dictionary) => Ok(dictionary),
            Err(err) => {
                warn!("dictionary training failed ({err}), compressing without dictionary");
                Ok(Vec::new())
            }
        }
    }

    /// Compress and insert every package, verifying each row bytewise.
    fn insert_packages(
        &self,
        conn: &Connection,
        packages: &[Package],
        dictionary: &[u8],
    ) -> Result<()> {
        let level = self.settings.compression_level;
        let mut insert_kv =
            conn.prepare("INSERT OR REPLACE INTO packages_kv (id, data) VALUES (?1, ?2)")?;
        let mut insert_fts = conn.prepare(
            r#"
            INSERT INTO packages_fts (rowid, id, name, description)
            SELECT rowid, id, ?2, ?3 FROM packages_kv WHERE id = ?1
            "#,
        )?;

        for (i, pkg) in packages.iter().enumerate() {
            let json_bytes = package_json(pkg)?;
            let compressed = compress(&json_bytes, dictionary, level, &pkg.package_id)?;

            // Round-trip verification before the row is committed
            let restored = decompress(&compressed, dictionary, json_bytes.len(), &pkg.package_id)?;
            if restored != json_bytes {
                return Err(Error::VerificationFailed {
                    package_id: pkg.package_id.clone(),
                });
            }

            insert_kv.execute(params![pkg.package_id, compressed])?;
            insert_fts.execute(params![pkg.package_id, pkg.package_name, pkg.description])?;

            if (i + 1) % 1000 == 0 {
                debug!(
                    done = i + 1,
                    total = packages.len(),
                    ratio = format!("{:.1}%", compressed.len() as f64 * 100.0 / json_bytes.len() as f64),
                    "compression progress"
                );
            }
        }
        Ok(())
    }
}

/// Compact JSON serialization of a package; byte-identical across
/// write and verification.
fn package_json(pkg: &Package) -> Result<Vec<u8>> {
    serde_json::to_vec(pkg).map_err(|e| Error::Serialize {
        package_id: pkg.package_id.clone(),
        source: e,
    })
}

fn compress(data: &[u8], dictionary: &[u8], level: i32, package_id: &str) -> Result<Vec<u8>> {
    let result = if dictionary.is_empty() {
        zstd::bulk::compress(data, level)
    } else {
        zstd::bulk::Compressor::with_dictionary(level, dictionary)
            .and_then(|mut c| c.compress(data))
    };
    result.map_err(|e| Error::Compression {
        package_id: package_id.to_string(),
        source: e,
    })
}

/// Decompress one row; `capacity` is the known uncompressed size.
pub fn decompress_with_dictionary(
    data: &[u8],
    dictionary: &[u8],
    capacity: usize,
) -> std::io::Result<Vec<u8>> {
    if dictionary.is_empty() {
        zstd::bulk::decompress(data, capacity)
    } else {
        zstd::bulk::Decompressor::with_dictionary(dictionary)
            .and_then(|mut d| d.decompress(data, capacity))
    }
}

fn decompress(
    data: &[u8],
    dictionary: &[u8],
    capacity: usize,
    package_id: &str,
) -> Result<Vec<u8>> {
    decompress_with_dictionary(data, dictionary, capacity).map_err(|e| Error::Compression {
        package_id: package_id.to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> Package {
        Package {
            package_id: format!("pkg{i}"),
            package_name: format!("pkg{i}"),
            version: "1.0".into(),
            attribute_path: format!("pkgs.pkg{i}"),
            description: format!("Sample package number {i} with some repeated prose"),
            homepage: "https://example.org".into(),
            category: "tools".into(),
            available: true,
            last_updated: "2025-06-01T00:00:00Z".into(),
            ..Package::default()
        }
    }

    #[test]
    fn ten_sample_corpus_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("minified.db");
        let packages: Vec<Package> = (0..10).map(sample).collect();

        let writer = MinifiedWriter::new(MinifySettings::default());
        let output = writer.write_artifact(&db_path, &packages).unwrap();
        let dictionary = std::fs::read(&output.dict_path).unwrap();

        let conn = Connection::open(&output.db_path).unwrap();
        let mut stmt = conn.prepare("SELECT id, data FROM packages_kv").unwrap();
        let rows: Vec<(String, Vec<u8>)> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 10);

        for (id, data) in rows {
            let pkg = packages.iter().find(|p| p.package_id == id).unwrap();
            let expected = serde_json::to_vec(pkg).unwrap();
            let restored =
                decompress_with_dictionary(&data, &dictionary, expected.len()).unwrap();
            assert_eq!(restored, expected, "row {id} did not roundtrip");
        }
    }

    #[test]
    fn fts_rows_track_kv_rows() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("minified.db");
        let packages: Vec<Package> = (0..5).map(sample).collect();
        MinifiedWriter::new(MinifySettings::default())
            .write_artifact(&db_path, &packages)
            .unwrap();

        let conn = Connection::open(&db_path).unwrap();
        let kv: i64 = conn
            .query_row("SELECT COUNT(*) FROM packages_kv", [], |r| r.get(0))
            .unwrap();
        let fts: i64 = conn
            .query_row("SELECT COUNT(*) FROM packages_fts", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kv, 5);
        assert_eq!(kv, fts);
    }

    #[test]
    fn empty_corpus_yields_empty_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("minified.db");
        let output = MinifiedWriter::new(MinifySettings::default())
            .write_artifact(&db_path, &[])
            .unwrap();
        assert!(output.db_path.exists());
        assert!(output.dict_path.exists());

        let conn = Connection::open(&output.db_path).unwrap();
        let kv: i64 = conn
            .query_row("SELECT COUNT(*) FROM packages_kv", [], |r| r.get(0))
            .unwrap();
        assert_eq!(kv, 0);
    }
}
