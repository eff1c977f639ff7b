// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Database connection management.

use std::path::Path;

use rusqlite::{Connection, OpenFlags};
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{INDEX_SQL, SCHEMA_SQL, fts_table_sql};

/// Database open mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only access (seeding embeddings from a prior artifact)
    ReadOnly,
    /// Read-write access to an existing database
    ReadWrite,
    /// Create a new database, initializing the schema
    Create,
}

/// Full-text search configuration.
///
/// `stemmer` selects the FTS5 tokenizer: `english` engages the porter
/// stemmer, anything else falls back to plain unicode61. The stopword
/// list is carried for interface compatibility with downstream
/// consumers; FTS5 has no native stopword support.
#[derive(Debug, Clone)]
pub struct FtsConfig {
    pub stemmer: String,
    pub stopwords: String,
}

impl Default for FtsConfig {
    fn default() -> Self {
        FtsConfig {
            stemmer: "english".to_string(),
            stopwords: "english".to_string(),
        }
    }
}

impl FtsConfig {
    pub(crate) fn tokenizer(&self) -> &'static str {
        if self.stemmer.eq_ignore_ascii_case("english") {
            "porter unicode61"
        } else {
            "unicode61"
        }
    }
}

/// SQLite connection for the normalized catalog.
pub struct CatalogDb {
    pub(crate) conn: Connection,
}

impl CatalogDb {
    /// Open or create a catalog database at `path`.
    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref();
        let flags = match mode {
            OpenMode::ReadOnly => {
                if !path.exists() {
                    return Err(Error::DatabaseNotFound(path.to_owned()));
                }
                OpenFlags::SQLITE_OPEN_READ_ONLY
            }
            OpenMode::ReadWrite => {
                if !path.exists() {
                    return Err(Error::DatabaseNotFound(path.to_owned()));
                }
                OpenFlags::SQLITE_OPEN_READ_WRITE
            }
            OpenMode::Create => OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        };

        let conn = Connection::open_with_flags(path, flags).map_err(|e| Error::DatabaseOpen {
            path: path.to_owned(),
            source: e,
        })?;
        let db = Self { conn };
        if mode == OpenMode::Create {
            db.configure_pragmas()?;
        }
        debug!("opened catalog database at {} ({:?})", path.display(), mode);
        Ok(db)
    }

    /// Create an in-memory database with the full schema (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.configure_pragmas()?;
        db.create_schema(&FtsConfig::default())?;
        debug!("created in-memory catalog database");
        Ok(db)
    }

    fn configure_pragmas(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
            "#,
        )?;
        Ok(())
    }

    /// Create all tables, the FTS index, and the performance indexes.
    pub fn create_schema(&self, fts: &FtsConfig) -> Result<()> {
        self.conn.execute_batch(SCHEMA_SQL)?;
        self.conn.execute_batch(&fts_table_sql(fts.tokenizer()))?;
        self.conn.execute_batch(INDEX_SQL)?;
        debug!("created catalog schema");
        Ok(())
    }

    /// Get raw connection (for advanced usage).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// VACUUM and ANALYZE before shipping the file.
    pub fn finalize(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM; ANALYZE;")?;
        Ok(())
    }
}
