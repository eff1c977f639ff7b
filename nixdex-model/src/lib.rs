// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Package data model for the nixdex catalog.
//!
//! This crate defines the raw records emitted by the external evaluator,
//! the canonical package type produced by normalization, and the merge
//! rules that collapse architecture variants into one canonical package.

mod category;
mod merge;
mod normalize;
mod package;
mod raw;

pub use category::classify_category;
pub use merge::{MergedPackage, group_and_merge};
pub use normalize::{NormalizedPackage, normalize_record, sanitize_string};
pub use package::{
    Package, Variant, embedding_text, package_content_hash, package_id, parse_name_version,
    search_text, system_from_attribute_path,
};
pub use raw::{License, LicenseDetail, Maintainer, RawMeta, RawPackage, StreamMetadata};
