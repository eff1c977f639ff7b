// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Coercion of raw evaluator records into per-record normalized packages.
//!
//! One raw record maps to at most one normalized package; records whose
//! name cannot be resolved, or which carry an evaluation error instead of
//! a payload, are skipped by the caller.

use serde_json::Value;
use tracing::debug;

use crate::category::classify_category;
use crate::package::{package_id, parse_name_version, system_from_attribute_path};
use crate::raw::{License, LicenseDetail, Maintainer, RawPackage};

const MAX_STRING: usize = 2000;
const MAX_PLATFORMS: usize = 20;
const MAX_MAINTAINERS: usize = 10;
const MAX_FALLBACK_LICENSE: usize = 500;

/// A single raw record after field coercion, before variant merging.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedPackage {
    pub package_id: String,
    pub package_name: String,
    pub version: String,
    pub attribute_path: String,
    pub description: String,
    pub long_description: String,
    pub homepage: String,
    pub license: Option<License>,
    pub platforms: Vec<String>,
    pub maintainers: Vec<Maintainer>,
    pub category: String,
    pub broken: bool,
    pub unfree: bool,
    pub available: bool,
    pub insecure: bool,
    pub unsupported: bool,
    pub main_program: String,
    pub position: String,
    pub outputs_to_install: Vec<String>,
    pub last_updated: String,
    /// System this record was evaluated for; falls back to the run target
    pub system: String,
    pub drv_path: String,
    pub outputs: Vec<(String, String)>,
}

/// Strip NUL bytes, trim, and truncate to 2000 characters.
pub fn sanitize_string(s: &str) -> String {
    let cleaned: String = s.chars().filter(|&c| c != '\0').collect();
    let trimmed = cleaned.trim();
    trimmed.chars().take(MAX_STRING).collect()
}

fn sanitize_opt(s: &Option<String>) -> String {
    s.as_deref().map(sanitize_string).unwrap_or_default()
}

/// Coerce the polymorphic `meta.license` value into its tagged form.
fn coerce_license(value: &Value) -> Option<License> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(License::String {
            value: sanitize_string(s),
        }),
        Value::Array(items) => {
            let licenses: Vec<LicenseDetail> =
                items.iter().filter_map(coerce_license_detail).collect();
            Some(License::Array { licenses })
        }
        Value::Object(_) => coerce_license_detail(value).map(License::Object),
        other => Some(License::String {
            value: other.to_string().chars().take(MAX_FALLBACK_LICENSE).collect(),
        }),
    }
}

/// Coerce one element of a license list (or a lone license set).
fn coerce_license_detail(value: &Value) -> Option<LicenseDetail> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(LicenseDetail {
            short_name: sanitize_string(s),
            ..LicenseDetail::default()
        }),
        Value::Object(map) => {
            let field = |key: &str| {
                map.get(key)
                    .and_then(Value::as_str)
                    .map(sanitize_string)
                    .unwrap_or_default()
            };
            let flag = |key: &str| map.get(key).and_then(Value::as_bool);
            Some(LicenseDetail {
                short_name: field("shortName"),
                full_name: field("fullName"),
                spdx_id: field("spdxId"),
                url: field("url"),
                free: flag("free"),
                redistributable: flag("redistributable"),
                deprecated: flag("deprecated"),
            })
        }
        other => Some(LicenseDetail {
            short_name: other.to_string(),
            ..LicenseDetail::default()
        }),
    }
}

/// Accept only a list of strings, truncated to the first 20.
fn coerce_platforms(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .take(MAX_PLATFORMS)
            .collect(),
        _ => Vec::new(),
    }
}

/// Accept a list of maintainer sets or bare strings, truncated to the
/// first 10. Attribute-set entries survive only when at least one of
/// name/email/github is nonempty.
fn coerce_maintainers(value: Option<&Value>) -> Vec<Maintainer> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for item in items {
        match item {
            Value::Object(map) => {
                let field = |key: &str| {
                    map.get(key)
                        .and_then(Value::as_str)
                        .map(sanitize_string)
                        .unwrap_or_default()
                };
                let maintainer = Maintainer {
                    name: field("name"),
                    email: field("email"),
                    github: field("github"),
                    github_id: map.get("githubId").and_then(Value::as_i64),
                };
                if !maintainer.is_empty() {
                    out.push(maintainer);
                }
            }
            Value::String(s) => out.push(Maintainer {
                name: s.clone(),
                ..Maintainer::default()
            }),
            other => out.push(Maintainer {
                name: other.to_string(),
                ..Maintainer::default()
            }),
        }
        if out.len() == MAX_MAINTAINERS {
            break;
        }
    }
    out
}

/// Normalize one raw record.
///
/// Returns None for error records and for records whose name resolves to
/// `unknown`. `target_system` supplies the variant system when the
/// attribute path carries no architecture segment; `last_updated` is the
/// run timestamp stamped onto every row.
pub fn normalize_record(
    raw: &RawPackage,
    target_system: &str,
    last_updated: &str,
) -> Option<NormalizedPackage> {
    if let Some(error) = &raw.error {
        debug!(attr = %raw.attribute_path(), "skipping errored record: {error}");
        return None;
    }
    let attribute_path = raw.attribute_path();
    let (package_name, version) = parse_name_version(&raw.name);
    if package_name.is_empty() || package_name == "unknown" {
        debug!(attr = %attribute_path, "skipping record with unknown name");
        return None;
    }

    let meta = raw.meta.clone().unwrap_or_default();
    let category = match meta.category.as_deref() {
        Some(category) if !category.is_empty() => {
            classify_category(Some(category), &attribute_path)
        }
        _ => classify_category(None, &attribute_path),
    };
    let system = system_from_attribute_path(&attribute_path)
        .unwrap_or(target_system)
        .to_string();

    Some(NormalizedPackage {
        package_id: package_id(&attribute_path, &package_name, &version),
        package_name,
        version,
        attribute_path,
        description: sanitize_opt(&meta.description),
        long_description: sanitize_opt(&meta.long_description),
        homepage: sanitize_opt(&meta.homepage),
        license: meta.license.as_ref().and_then(coerce_license),
        platforms: coerce_platforms(meta.platforms.as_ref()),
        maintainers: coerce_maintainers(meta.maintainers.as_ref()),
        category,
        broken: meta.broken,
        unfree: meta.unfree,
        available: meta.available.unwrap_or(true),
        insecure: meta.insecure,
        unsupported: meta.unsupported,
        main_program: sanitize_opt(&meta.main_program),
        position: sanitize_opt(&meta.position),
        outputs_to_install: meta.outputs_to_install.clone().unwrap_or_default(),
        last_updated: last_updated.to_string(),
        system,
        drv_path: raw.drv_path.clone(),
        outputs: raw
            .outputs
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw_from(value: serde_json::Value) -> RawPackage {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn sanitize_strips_and_truncates() {
        assert_eq!(sanitize_string("  a\0b  "), "ab");
        let long = "x".repeat(3000);
        assert_eq!(sanitize_string(&long).chars().count(), 2000);
    }

    #[test]
    fn normalizes_scenario_record() {
        let raw = raw_from(json!({
            "attrPath": ["legacyPackages", "x86_64-linux", "hello"],
            "name": "hello-2.12",
            "drvPath": "/nix/store/aaa-hello-2.12.drv",
            "inputDrvs": {},
            "meta": {
                "description": "GNU Hello",
                "license": {"shortName": "gpl3Plus", "spdxId": "GPL-3.0-or-later"},
                "platforms": ["x86_64-linux", "aarch64-linux"]
            }
        }));
        let pkg = normalize_record(&raw, "x86_64-linux", "2025-06-01T00:00:00Z").unwrap();
        assert_eq!(pkg.package_id, "legacyPackages.hello");
        assert_eq!(pkg.package_name, "hello");
        assert_eq!(pkg.version, "2.12");
        assert_eq!(pkg.system, "x86_64-linux");
        assert!(pkg.available);
        assert_eq!(pkg.platforms.len(), 2);
        match pkg.license.unwrap() {
            License::Object(detail) => {
                assert_eq!(detail.short_name, "gpl3Plus");
                assert_eq!(detail.spdx_id, "GPL-3.0-or-later");
            }
            other => panic!("unexpected license shape: {other:?}"),
        }
    }

    #[test]
    fn heterogeneous_license_list_preserves_order() {
        let raw = raw_from(json!({
            "attrPath": ["foo"],
            "name": "foo-1.0",
            "drvPath": "",
            "inputDrvs": {},
            "meta": {"license": ["mit", {"shortName": "bsd3"}]}
        }));
        let pkg = normalize_record(&raw, "x86_64-linux", "").unwrap();
        match pkg.license.unwrap() {
            License::Array { licenses } => {
                assert_eq!(licenses[0].short_name, "mit");
                assert_eq!(licenses[1].short_name, "bsd3");
            }
            other => panic!("unexpected license shape: {other:?}"),
        }
    }

    #[test]
    fn error_records_are_skipped() {
        let raw = raw_from(json!({
            "attrPath": ["broken"],
            "name": "broken-1.0",
            "drvPath": "",
            "inputDrvs": {},
            "error": "evaluation aborted"
        }));
        assert!(normalize_record(&raw, "x86_64-linux", "").is_none());
    }

    #[test]
    fn maintainers_are_coerced_and_capped() {
        let many: Vec<serde_json::Value> = (0..15)
            .map(|i| json!({"name": format!("m{i}"), "email": "", "github": ""}))
            .collect();
        let raw = raw_from(json!({
            "attrPath": ["foo"],
            "name": "foo-1.0",
            "drvPath": "",
            "inputDrvs": {},
            "meta": {"maintainers": many}
        }));
        let pkg = normalize_record(&raw, "x86_64-linux", "").unwrap();
        assert_eq!(pkg.maintainers.len(), 10);

        let raw = raw_from(json!({
            "attrPath": ["bar"],
            "name": "bar-1.0",
            "drvPath": "",
            "inputDrvs": {},
            "meta": {"maintainers": ["alice", {"name": "", "email": "", "github": ""}]}
        }));
        let pkg = normalize_record(&raw, "x86_64-linux", "").unwrap();
        // Scalar entries kept, fully empty sets dropped
        assert_eq!(pkg.maintainers.len(), 1);
        assert_eq!(pkg.maintainers[0].name, "alice");
    }

    #[test]
    fn platforms_reject_non_list_shapes() {
        let raw = raw_from(json!({
            "attrPath": ["foo"],
            "name": "foo-1.0",
            "drvPath": "",
            "inputDrvs": {},
            "meta": {"platforms": "x86_64-linux"}
        }));
        let pkg = normalize_record(&raw, "x86_64-linux", "").unwrap();
        assert!(pkg.platforms.is_empty());
    }
}
