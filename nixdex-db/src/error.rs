// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Error types for catalog database operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for catalog database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during catalog database operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to open database with context
    #[error("failed to open database at '{path}': {source}")]
    DatabaseOpen {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Database file not found
    #[error("database not found at: {0}")]
    DatabaseNotFound(PathBuf),

    /// Stored vector blob has a length that is not a multiple of 4
    #[error("corrupt embedding blob for package '{package_id}'")]
    CorruptEmbedding { package_id: String },

    /// Serialization of a JSON-typed column failed
    #[error("failed to serialize column value: {0}")]
    ColumnJson(#[from] serde_json::Error),
}
