// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Error types for the minified-artifact writer.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for minified-artifact operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to write the dictionary or database file
    #[error("failed to write {path}: {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Compression or decompression failed outright
    #[error("zstd failure for package '{package_id}': {source}")]
    Compression {
        package_id: String,
        #[source]
        source: std::io::Error,
    },

    /// Round-trip verification mismatch; the artifact would be corrupt
    #[error("compression verification failed for package '{package_id}'")]
    VerificationFailed { package_id: String },

    /// Package serialization failed
    #[error("failed to serialize package '{package_id}': {source}")]
    Serialize {
        package_id: String,
        #[source]
        source: serde_json::Error,
    },
}
