// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Error types for object-store operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for object-store operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A retriable failure that kept failing through all attempts
    #[error("transient object-store failure during {context}: {message}")]
    Transient { context: String, message: String },

    /// A non-retriable failure (authorization, missing key, bad request)
    #[error("object-store failure during {context}: {message}")]
    Permanent { context: String, message: String },

    /// Local filesystem error during tree transfer
    #[error("{context} ({path}): {source}")]
    LocalFile {
        context: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Brotli compression/decompression failure
    #[error("brotli {context} failed: {source}")]
    Compression {
        context: String,
        #[source]
        source: std::io::Error,
    },
}
