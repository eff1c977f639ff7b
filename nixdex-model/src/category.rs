// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Package category classification.
//!
//! An explicit `meta.category` wins and is normalized through a fixed
//! mapping table; otherwise the attribute path is classified by substring
//! heuristics into roughly thirty buckets, defaulting to `misc`.

/// Nixpkgs category identifiers mapped to user-facing bucket names.
const CATEGORY_MAP: [(&str, &str); 33] = [
    ("applications.editors", "editors"),
    ("applications.graphics", "graphics"),
    ("applications.networking", "networking"),
    ("applications.science", "science"),
    ("applications.system", "system"),
    ("applications.virtualization", "virtualization"),
    ("applications.audio", "audio"),
    ("applications.video", "video"),
    ("applications.office", "office"),
    ("applications.misc", "applications"),
    ("development.tools", "development"),
    ("development.libraries", "libraries"),
    ("development.compilers", "compilers"),
    ("development.interpreters", "interpreters"),
    ("development.haskell-modules", "haskell"),
    ("development.python-modules", "python"),
    ("development.node-packages", "javascript"),
    ("development.r-modules", "r"),
    ("development.ocaml-modules", "ocaml"),
    ("development.perl-modules", "perl"),
    ("development.ruby-modules", "ruby"),
    ("games", "games"),
    ("servers", "servers"),
    ("tools.system", "system-tools"),
    ("tools.networking", "networking-tools"),
    ("tools.text", "text-tools"),
    ("tools.misc", "tools"),
    ("tools.security", "security"),
    ("tools.filesystems", "filesystems"),
    ("tools.backup", "backup"),
    ("data", "data"),
    ("fonts", "fonts"),
    ("themes", "themes"),
];

/// Attribute-path substring heuristics, checked in order. Language
/// ecosystems come first so `python311Packages.requests` lands in
/// `python` rather than a generic bucket.
const PATH_HEURISTICS: &[(&[&str], &str)] = &[
    (&["python", "python3packages", "python2packages"], "python"),
    (&["haskellpackages", "haskell.packages"], "haskell"),
    (&["nodepackages", "node_"], "javascript"),
    (&["rpackages"], "r"),
    (&["perlpackages", "perl5", "perl."], "perl"),
    (&["rubypackages", "rubygems"], "ruby"),
    (&["ocamlpackages", "ocaml-"], "ocaml"),
    (&["lua", "luapackages"], "lua"),
    (&["go-modules", "buildgomodule"], "go"),
    (&["rustpackages", "cargo"], "rust"),
    (&["editor", "vim", "emacs", "nano", "helix"], "editors"),
    (&["browser", "firefox", "chrome", "webkit"], "browsers"),
    (&["game", "steam", "lutris"], "games"),
    (
        &["server", "nginx", "apache", "httpd", "postgresql", "mysql"],
        "servers",
    ),
    (&["font", "fonts", "ttf", "otf"], "fonts"),
    (&["theme", "gtk", "qt", "icon"], "themes"),
    (&["media", "video", "audio", "vlc", "ffmpeg"], "multimedia"),
    (&["office", "libreoffice", "document"], "office"),
    (&["science", "math", "research", "latex"], "science"),
    (
        &["graphic", "image", "gimp", "inkscape", "photo"],
        "graphics",
    ),
    (&["network", "curl", "wget", "ssh", "tcp"], "networking"),
    (&["system", "systemd", "util", "coreutils"], "system"),
    (
        &["security", "crypto", "ssl", "gpg", "password"],
        "security",
    ),
    (&["backup", "rsync", "sync"], "backup"),
    (&["filesystem", "fuse", "mount"], "filesystems"),
    (&["compiler", "gcc", "clang", "llvm"], "compilers"),
    (&["interpreter", "runtime"], "interpreters"),
    (&["lib", "library", "shared"], "libraries"),
    (&["tool", "util", "cli"], "tools"),
    (&["devel", "dev", "build", "make", "cmake"], "development"),
];

/// Classify a package into a category bucket.
pub fn classify_category(meta_category: Option<&str>, attribute_path: &str) -> String {
    if let Some(category) = meta_category
        && !category.is_empty()
    {
        let lowered = category.to_lowercase();
        return CATEGORY_MAP
            .iter()
            .find(|(key, _)| *key == lowered)
            .map(|(_, bucket)| (*bucket).to_string())
            .unwrap_or(lowered);
    }

    let path = attribute_path.to_lowercase();
    for (needles, bucket) in PATH_HEURISTICS {
        if needles.iter().any(|needle| path.contains(needle)) {
            return (*bucket).to_string();
        }
    }
    "misc".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_category_is_mapped() {
        assert_eq!(
            classify_category(Some("applications.editors"), "whatever"),
            "editors"
        );
        assert_eq!(
            classify_category(Some("development.python-modules"), ""),
            "python"
        );
        // Unknown categories pass through lowercased
        assert_eq!(classify_category(Some("Odd.Thing"), ""), "odd.thing");
    }

    #[test]
    fn attribute_path_heuristics() {
        assert_eq!(
            classify_category(None, "python311Packages.requests"),
            "python"
        );
        assert_eq!(classify_category(None, "firefox-esr"), "browsers");
        assert_eq!(classify_category(None, "zzz"), "misc");
        // Language buckets take precedence over generic ones
        assert_eq!(
            classify_category(None, "haskellPackages.servant-server"),
            "haskell"
        );
    }

    #[test]
    fn themes_is_a_mapped_bucket() {
        assert_eq!(classify_category(Some("themes"), ""), "themes");
    }
}
