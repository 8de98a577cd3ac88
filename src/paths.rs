//! Case-insensitive name handling.
//!
//! Installer media mixes cases freely (`PAK0.PAK`, `Id1/pak0.pak`), so every
//! comparison happens on a normalized form: lowercase, forward slashes, no
//! leading or trailing separators.

use std::path::{Component, Path, PathBuf};

/// Normalize a path for lookups and comparisons (lowercase, forward slashes, trimmed)
pub fn normalize_for_lookup(path: &str) -> String {
    path.to_lowercase()
        .replace('\\', "/")
        .trim_matches('/')
        .to_string()
}

/// Last component of a `/`-separated name
pub fn basename(name: &str) -> &str {
    let trimmed = name.trim_end_matches(['/', '\\']);
    trimmed
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(trimmed)
}

/// Every trailing sub-path of `path`, shortest first.
///
/// `/media/CD/Quake/ID1/PAK0.PAK` yields `pak0.pak`, `id1/pak0.pak`,
/// `quake/id1/pak0.pak`, and so on. These are the keys a look-for pattern
/// can match.
pub fn lookup_suffixes(path: &str) -> Vec<String> {
    let normalized = normalize_for_lookup(path);
    let components: Vec<&str> = normalized.split('/').filter(|c| !c.is_empty()).collect();

    (0..components.len())
        .rev()
        .map(|start| components[start..].join("/"))
        .collect()
}

/// Does `path` end with the look-for `pattern` on a component boundary?
pub fn matches_look_for(path: &str, pattern: &str) -> bool {
    let path = normalize_for_lookup(path);
    let pattern = normalize_for_lookup(pattern);
    if pattern.is_empty() {
        return false;
    }
    path == pattern || path.ends_with(&format!("/{}", pattern))
}

/// Turn an archive entry name into a relative path that cannot escape
/// the extraction root.
pub fn sanitize_entry_path(name: &str) -> PathBuf {
    let unified = name.replace('\\', "/");
    let mut clean = PathBuf::new();
    for component in Path::new(&unified).components() {
        if let Component::Normal(part) = component {
            clean.push(part);
        }
    }
    if clean.as_os_str().is_empty() {
        clean.push("unnamed");
    }
    clean
}
