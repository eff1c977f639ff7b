// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Object-storage I/O for catalog artifacts.
//!
//! Thin wrapper over the S3 API: blob put/get with content metadata,
//! prefix listing and deletion (batched at the service limit of 1000
//! keys), parallel directory-tree transfer, and brotli helpers for the
//! JSON payload artifacts. Transient failures are retried with
//! exponential backoff before becoming fatal.

mod compress;
mod error;
mod store;

pub use compress::{brotli_compress, brotli_decompress};
pub use error::{Error, Result};
pub use store::{BlobOptions, JSON_BROTLI_QUALITY, ObjectStore};
