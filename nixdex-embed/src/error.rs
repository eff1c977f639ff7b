// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Error types for the embedding client.

use thiserror::Error;

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Client construction or configuration problem
    #[error("embedding client misconfigured: {reason}")]
    Misconfiguration { reason: String },

    /// The probe call failed; the model is unreachable
    #[error("embedding model unreachable: {reason}")]
    Unreachable { reason: String },

    /// HTTP 429 from the service
    #[error("embedding request was throttled")]
    Throttled,

    /// Any other non-success HTTP status
    #[error("embedding service returned {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// Transport-level failure (timeout, connection reset, TLS)
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response carried no usable vector
    #[error("embedding response carried no vector")]
    EmptyResponse,

    /// Vector dimension differed from the configured output dimension
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}
