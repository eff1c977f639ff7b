// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Raw records as emitted by the external evaluator, one JSON object per
//! line.
//!
//! The `meta` attribute set is only loosely typed on the Nix side:
//! `license` may be a string, an attribute set, or a list of either;
//! `maintainers` mixes attribute sets and bare strings; `platforms` is
//! usually a list of system strings but occasionally something else
//! entirely. Those fields are kept as [`serde_json::Value`] here and
//! coerced into tagged types during normalization.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::{Deserialize, Serialize};

/// One line of evaluator output.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawPackage {
    /// Attribute path segments, e.g. `["legacyPackages", "x86_64-linux", "hello"]`
    pub attr_path: Vec<String>,
    /// `<pname>-<version>` as assembled by nixpkgs
    pub name: String,
    /// Store path of the derivation
    pub drv_path: String,
    /// Input derivations keyed by store path; values are opaque output selections
    pub input_drvs: BTreeMap<String, serde_json::Value>,
    /// Realized output paths keyed by output name
    pub outputs: BTreeMap<String, String>,
    pub meta: Option<RawMeta>,
    /// Set instead of the payload when evaluation of this attribute failed
    pub error: Option<String>,
}

impl RawPackage {
    /// Attribute path joined with `.`, the form used throughout the artifacts.
    pub fn attribute_path(&self) -> String {
        self.attr_path.join(".")
    }

    /// Dedup key for combining shard output: `(attrPath joined, name)`.
    pub fn dedup_key(&self) -> (String, String) {
        (self.attribute_path(), self.name.clone())
    }
}

/// The `meta` attribute set of a raw record.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawMeta {
    #[serde(deserialize_with = "string_or_none")]
    pub description: Option<String>,
    #[serde(deserialize_with = "string_or_none")]
    pub long_description: Option<String>,
    #[serde(deserialize_with = "string_or_none")]
    pub homepage: Option<String>,
    pub license: Option<serde_json::Value>,
    pub platforms: Option<serde_json::Value>,
    pub maintainers: Option<serde_json::Value>,
    #[serde(deserialize_with = "string_or_none")]
    pub category: Option<String>,
    #[serde(deserialize_with = "bool_or_default")]
    pub broken: bool,
    #[serde(deserialize_with = "bool_or_default")]
    pub unfree: bool,
    /// Defaults to true when the evaluator omits it
    pub available: Option<bool>,
    #[serde(deserialize_with = "bool_or_default")]
    pub insecure: bool,
    #[serde(deserialize_with = "bool_or_default")]
    pub unsupported: bool,
    #[serde(deserialize_with = "string_or_none")]
    pub main_program: Option<String>,
    #[serde(deserialize_with = "string_or_none")]
    pub position: Option<String>,
    pub outputs_to_install: Option<Vec<String>>,
}

/// Accept a JSON string, quietly discarding any other shape.
///
/// Nixpkgs metadata is not uniformly typed; `homepage` in particular is a
/// list for a handful of packages.
fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// Accept a JSON bool, treating anything else as false.
fn bool_or_default<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(matches!(value, serde_json::Value::Bool(true)))
}

/// License information coerced into one of three shapes.
///
/// The tag survives into every downstream artifact so consumers can
/// pattern-match instead of probing dynamic maps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum License {
    String { value: String },
    Object(LicenseDetail),
    Array { licenses: Vec<LicenseDetail> },
}

/// A single nixpkgs license attribute set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LicenseDetail {
    pub short_name: String,
    pub full_name: String,
    pub spdx_id: String,
    pub url: String,
    pub free: Option<bool>,
    pub redistributable: Option<bool>,
    pub deprecated: Option<bool>,
}

impl License {
    /// Names suitable for display or text embedding, preferring SPDX ids.
    pub fn display_names(&self) -> Vec<&str> {
        fn pick(detail: &LicenseDetail) -> &str {
            if !detail.spdx_id.is_empty() {
                &detail.spdx_id
            } else if !detail.short_name.is_empty() {
                &detail.short_name
            } else {
                &detail.full_name
            }
        }
        match self {
            License::String { value } => vec![value.as_str()],
            License::Object(detail) => vec![pick(detail)],
            License::Array { licenses } => licenses.iter().map(pick).collect(),
        }
    }

    /// All license attribute sets carried by this value; a bare string
    /// yields a detail with only `short_name` set.
    pub fn details(&self) -> Vec<LicenseDetail> {
        match self {
            License::String { value } => vec![LicenseDetail {
                short_name: value.clone(),
                ..LicenseDetail::default()
            }],
            License::Object(detail) => vec![detail.clone()],
            License::Array { licenses } => licenses.clone(),
        }
    }
}

/// A package maintainer. At least one of `name`, `email`, `github` is
/// nonempty for entries that survive normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Maintainer {
    pub name: String,
    pub email: String,
    pub github: String,
    pub github_id: Option<i64>,
}

impl Maintainer {
    /// Identity key used for deduplication across variants.
    pub fn key(&self) -> (String, String, String) {
        (self.name.clone(), self.email.clone(), self.github.clone())
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.email.is_empty() && self.github.is_empty()
    }
}

/// The synthetic `_metadata` first line of the raw JSONL stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub extraction_timestamp: String,
    pub nixpkgs_branch: String,
    pub total_packages: usize,
    pub extractor_version: String,
}

impl StreamMetadata {
    /// Render the metadata line as it appears at the top of the stream.
    pub fn to_jsonl_line(&self) -> String {
        // Never fails: the struct contains only strings and integers.
        serde_json::json!({ "_metadata": self }).to_string()
    }

    /// Parse the first stream line; returns None when the line is a
    /// regular package record instead.
    pub fn from_jsonl_line(line: &str) -> Option<Self> {
        #[derive(Deserialize)]
        struct Wrapper {
            _metadata: StreamMetadata,
        }
        serde_json::from_str::<Wrapper>(line)
            .map(|w| w._metadata)
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_package_parses_evaluator_line() {
        let line = r#"{"attrPath":["legacyPackages","x86_64-linux","hello"],"name":"hello-2.12","drvPath":"/nix/store/aaa-hello-2.12.drv","inputDrvs":{"/nix/store/bbb-glibc.drv":["out"]},"outputs":{"out":"/nix/store/ccc-hello-2.12"},"meta":{"description":"GNU Hello","license":{"shortName":"gpl3Plus","spdxId":"GPL-3.0-or-later"},"platforms":["x86_64-linux","aarch64-linux"]}}"#;
        let pkg: RawPackage = serde_json::from_str(line).unwrap();
        assert_eq!(pkg.attribute_path(), "legacyPackages.x86_64-linux.hello");
        assert_eq!(pkg.name, "hello-2.12");
        assert_eq!(pkg.input_drvs.len(), 1);
        let meta = pkg.meta.unwrap();
        assert_eq!(meta.description.as_deref(), Some("GNU Hello"));
        assert!(meta.license.is_some());
    }

    #[test]
    fn non_string_homepage_is_discarded() {
        let line = r#"{"attrPath":["a"],"name":"a-1.0","drvPath":"","inputDrvs":{},"meta":{"homepage":["https://example.org"]}}"#;
        let pkg: RawPackage = serde_json::from_str(line).unwrap();
        assert_eq!(pkg.meta.unwrap().homepage, None);
    }

    #[test]
    fn license_tagged_roundtrip() {
        let license = License::Array {
            licenses: vec![
                LicenseDetail {
                    short_name: "mit".into(),
                    spdx_id: "MIT".into(),
                    ..LicenseDetail::default()
                },
                LicenseDetail {
                    short_name: "bsd3".into(),
                    ..LicenseDetail::default()
                },
            ],
        };
        let json = serde_json::to_string(&license).unwrap();
        assert!(json.contains(r#""type":"array""#));
        let back: License = serde_json::from_str(&json).unwrap();
        assert_eq!(back, license);
        assert_eq!(license.display_names(), vec!["MIT", "bsd3"]);
    }

    #[test]
    fn metadata_line_roundtrip() {
        let meta = StreamMetadata {
            extraction_timestamp: "2025-06-01T00:00:00Z".into(),
            nixpkgs_branch: "release-25.05".into(),
            total_packages: 3,
            extractor_version: "nixdex-evaluator-v1".into(),
        };
        let line = meta.to_jsonl_line();
        assert_eq!(StreamMetadata::from_jsonl_line(&line), Some(meta));
        assert_eq!(StreamMetadata::from_jsonl_line(r#"{"name":"x"}"#), None);
    }
}
