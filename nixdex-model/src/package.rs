// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! The canonical, system-independent package and its architecture
//! variants.

use serde::{Deserialize, Serialize};

use crate::raw::{License, Maintainer};

/// A canonical package: the merge of all architecture variants sharing a
/// `package_id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Package {
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
    pub content_hash: i64,
}

impl Package {
    /// Graph node id, `<pname>-<version>`.
    pub fn node_id(&self) -> String {
        format!("{}-{}", self.package_name, self.version)
    }
}

/// A `(package, system)` specialization preserving the per-system
/// derivation information that canonicalization strips.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub package_id: String,
    pub system: String,
    pub drv_path: String,
    /// Output name/store path pairs, serialized as a JSON object downstream
    pub outputs: Vec<(String, String)>,
}

impl Variant {
    /// Row id in the variations table: `<package_id>.<system>`.
    pub fn variation_id(&self) -> String {
        format!("{}.{}", self.package_id, self.system)
    }
}

const SYSTEM_MARKERS: [&str; 3] = ["linux", "darwin", "windows"];

/// True for segments shaped like a system double, e.g. `x86_64-linux` or
/// `aarch64-darwin`.
fn is_system_double(segment: &str) -> bool {
    match segment.rsplit_once('-') {
        Some((arch, os)) => !arch.is_empty() && SYSTEM_MARKERS.contains(&os),
        None => false,
    }
}

/// Index of the architecture segment within an attribute path, if any.
///
/// A trailing segment qualifies whenever it merely contains a system
/// marker (Hydra-style `hello.x86_64-linux` job names). Interior segments
/// qualify only when they are a full system double, so attribute names
/// like `util-linux` are never mistaken for one.
fn system_segment_index(segments: &[&str]) -> Option<usize> {
    if segments.len() < 2 {
        return None;
    }
    let last = segments.len() - 1;
    if SYSTEM_MARKERS.iter().any(|m| segments[last].contains(m)) {
        return Some(last);
    }
    segments[..last]
        .iter()
        .position(|segment| is_system_double(segment))
}

/// Extract the architecture segment of an attribute path, if present.
///
/// `legacyPackages.x86_64-linux.hello` and `hello.x86_64-linux` both yield
/// `x86_64-linux`.
pub fn system_from_attribute_path(attribute_path: &str) -> Option<&str> {
    let segments: Vec<&str> = attribute_path.split('.').collect();
    system_segment_index(&segments).map(|i| segments[i])
}

/// Derive the canonical package id.
///
/// The architecture segment of the attribute path is stripped so that
/// per-system records collapse onto one id. Records without an attribute
/// path fall back to `<name>@<version>`.
pub fn package_id(attribute_path: &str, package_name: &str, version: &str) -> String {
    let attribute_path = attribute_path.trim();
    if !attribute_path.is_empty() {
        let mut segments: Vec<&str> = attribute_path.split('.').collect();
        if let Some(i) = system_segment_index(&segments) {
            segments.remove(i);
        }
        return segments.join(".");
    }
    let name = package_name.trim();
    let version = version.trim();
    if name.is_empty() && version.is_empty() {
        "unknown".to_string()
    } else {
        format!("{name}@{version}")
    }
}

/// Split an evaluator `name` field into package name and version.
///
/// The name is scanned left to right for the first `-`-separated segment
/// that starts with a digit or `v`; everything before it is the package
/// name and everything from it onward the version. Names without such a
/// segment keep the full string with version `unknown`.
pub fn parse_name_version(name: &str) -> (String, String) {
    if name.is_empty() {
        return ("unknown".to_string(), "unknown".to_string());
    }
    let parts: Vec<&str> = name.split('-').collect();
    if parts.len() < 2 {
        return (name.to_string(), "unknown".to_string());
    }
    for (i, part) in parts.iter().enumerate() {
        let starts_version = part
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit() || c == 'v');
        if starts_version {
            let pkg = parts[..i].join("-");
            let version = parts[i..].join("-");
            let pkg = if pkg.is_empty() { name.to_string() } else { pkg };
            return (pkg, version);
        }
    }
    (name.to_string(), "unknown".to_string())
}

/// Concatenated text mirrored into the FTS index.
pub fn search_text(pkg: &Package) -> String {
    [
        pkg.package_name.as_str(),
        pkg.description.as_str(),
        pkg.long_description.as_str(),
        pkg.attribute_path.as_str(),
        pkg.main_program.as_str(),
    ]
    .iter()
    .filter(|part| !part.is_empty())
    .copied()
    .collect::<Vec<_>>()
    .join(" ")
}

const MAX_EMBEDDING_TEXT: usize = 2000;

/// Fixed-order textual representation of a package for embedding.
///
/// The field order is part of the artifact contract: the content hash is
/// computed over this text, and any reordering would invalidate every
/// cached embedding.
pub fn embedding_text(pkg: &Package) -> String {
    let mut parts: Vec<String> = Vec::new();
    parts.push(format!("Package: {}", pkg.package_name));
    if !pkg.version.is_empty() {
        parts.push(format!("Version: {}", pkg.version));
    }
    if !pkg.main_program.is_empty() {
        parts.push(format!("Main Program: {}", pkg.main_program));
    }
    let description = pkg.description.trim();
    let long_description = pkg.long_description.trim();
    let mut description_parts: Vec<&str> = Vec::new();
    if !description.is_empty() {
        description_parts.push(description);
    }
    if !long_description.is_empty() && long_description != description {
        description_parts.push(long_description);
    }
    if !description_parts.is_empty() {
        parts.push(format!("Description: {}", description_parts.join(". ")));
    }
    if !pkg.homepage.is_empty() {
        parts.push(format!("Homepage: {}", pkg.homepage));
    }
    if let Some(license) = &pkg.license {
        let names: Vec<&str> = license
            .display_names()
            .into_iter()
            .filter(|n| !n.is_empty())
            .take(3)
            .collect();
        if !names.is_empty() {
            parts.push(format!("License: {}", names.join(", ")));
        }
    }
    let maintainer_names: Vec<&str> = pkg
        .maintainers
        .iter()
        .take(3)
        .map(|m| {
            if !m.name.is_empty() {
                m.name.as_str()
            } else if !m.email.is_empty() {
                m.email.as_str()
            } else {
                m.github.as_str()
            }
        })
        .filter(|n| !n.is_empty())
        .collect();
    if !maintainer_names.is_empty() {
        parts.push(format!("Maintainers: {}", maintainer_names.join(", ")));
    }
    if !pkg.platforms.is_empty() {
        let platforms: Vec<&str> = pkg.platforms.iter().take(5).map(String::as_str).collect();
        parts.push(format!("Platforms: {}", platforms.join(", ")));
    }
    if !pkg.attribute_path.is_empty() {
        parts.push(format!("Attribute: {}", pkg.attribute_path));
    }

    let mut text = parts.join(". ");
    if text.chars().count() > MAX_EMBEDDING_TEXT {
        text = text.chars().take(MAX_EMBEDDING_TEXT - 3).collect();
        text.push_str("...");
    }
    text
}

/// Stable content hash used to decide whether a prior embedding may be
/// reused: the first eight bytes of blake3 over the embedding text,
/// little endian.
pub fn package_content_hash(pkg: &Package) -> i64 {
    let digest = blake3::hash(embedding_text(pkg).as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest.as_bytes()[..8]);
    i64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_name_version_basic() {
        assert_eq!(
            parse_name_version("hello-2.12"),
            ("hello".into(), "2.12".into())
        );
        assert_eq!(
            parse_name_version("gnome-terminal-3.48.1"),
            ("gnome-terminal".into(), "3.48.1".into())
        );
        assert_eq!(
            parse_name_version("libfoo"),
            ("libfoo".into(), "unknown".into())
        );
        assert_eq!(
            parse_name_version(""),
            ("unknown".into(), "unknown".into())
        );
    }

    #[test]
    fn parse_name_version_without_numeric_segment() {
        assert_eq!(
            parse_name_version("fonts-misc"),
            ("fonts-misc".into(), "unknown".into())
        );
    }

    #[test]
    fn package_id_strips_system_segment() {
        assert_eq!(package_id("hello.x86_64-linux", "hello", "2.12"), "hello");
        assert_eq!(package_id("pkgs.aarch64-darwin", "p", "1"), "pkgs");
        assert_eq!(
            package_id("legacyPackages.x86_64-linux.hello", "hello", "2.12"),
            "legacyPackages.hello"
        );
        // A lone attribute is never treated as a system segment
        assert_eq!(package_id("util-linux", "util-linux", "2.39"), "util-linux");
    }

    #[test]
    fn system_extraction() {
        assert_eq!(
            system_from_attribute_path("legacyPackages.x86_64-linux.hello"),
            Some("x86_64-linux")
        );
        assert_eq!(
            system_from_attribute_path("hello.aarch64-darwin"),
            Some("aarch64-darwin")
        );
        assert_eq!(system_from_attribute_path("hello"), None);
        assert_eq!(system_from_attribute_path("util-linux"), None);
    }

    #[test]
    fn package_id_falls_back_to_name_version() {
        assert_eq!(package_id("", "hello", "2.12"), "hello@2.12");
        assert_eq!(package_id("  ", "", ""), "unknown");
    }

    #[test]
    fn embedding_text_is_ordered_and_truncated() {
        let pkg = Package {
            package_name: "hello".into(),
            version: "2.12".into(),
            description: "GNU Hello".into(),
            long_description: "GNU Hello".into(),
            homepage: "https://gnu.org/hello".into(),
            attribute_path: "hello".into(),
            ..Package::default()
        };
        let text = embedding_text(&pkg);
        assert!(text.starts_with("Package: hello. Version: 2.12"));
        // longDescription identical to description is not repeated
        assert_eq!(text.matches("GNU Hello").count(), 1);

        let long = Package {
            package_name: "x".into(),
            description: "d".repeat(4000),
            ..Package::default()
        };
        let text = embedding_text(&long);
        assert_eq!(text.chars().count(), 2000);
        assert!(text.ends_with("..."));
    }

    #[test]
    fn content_hash_tracks_embedding_inputs() {
        let mut a = Package {
            package_name: "hello".into(),
            version: "2.12".into(),
            description: "GNU Hello".into(),
            ..Package::default()
        };
        let h1 = package_content_hash(&a);
        assert_eq!(h1, package_content_hash(&a.clone()));
        a.description = "changed".into();
        assert_ne!(h1, package_content_hash(&a));
    }
}
