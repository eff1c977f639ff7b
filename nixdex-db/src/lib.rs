// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Normalized SQLite catalog for the nixdex artifacts.
//!
//! Schema: one row per canonical package, lookup tables for licenses,
//! architectures, and maintainers with junction tables between them, a
//! variations table preserving per-system derivation data, an embeddings
//! table, and a contentless FTS5 index over the searchable text columns.

mod connection;
mod error;
mod query;
mod schema;
mod write;

pub use connection::{CatalogDb, FtsConfig, OpenMode};
pub use error::{Error, Result};
pub use write::WriteSummary;
