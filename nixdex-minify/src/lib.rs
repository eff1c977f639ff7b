// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Distribution-sized catalog artifact.
//!
//! Every package is serialized as compact JSON and compressed with a
//! dictionary trained on a sample of the corpus, then stored in a
//! key-value table with an FTS overlay. The dictionary ships as a
//! sibling file; it is a prerequisite for decompression and the two
//! files are only useful together.
//!
//! Each row is decompressed and compared bytewise right after it is
//! written. That round-trip catches dictionaries trained on one schema
//! and applied to another, which otherwise surfaces as corrupt rows in
//! production readers.

mod error;
mod writer;

pub use error::{Error, Result};
pub use writer::{MinifiedWriter, MinifyOutput, MinifySettings, decompress_with_dictionary};
