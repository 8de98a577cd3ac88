//! Candidate discovery.
//!
//! Turns operator-supplied paths and well-known install locations into a
//! flat list of candidate files for identification.

use crate::cancel::CancelToken;
use crate::hash::{self, HashOptions, HashedFile};
use crate::model::GameData;

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// A file that might satisfy a wanted file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidatePath {
    pub path: PathBuf,
    /// Named by the operator rather than found by walking a directory.
    /// Explicit candidates are hashed eagerly.
    pub explicit: bool,
}

/// Expand one operator path into candidate files.
///
/// A file is returned as an explicit candidate; a directory is walked
/// (following symlinks, sorted by name) and every regular file under it is
/// a discovered candidate.
pub fn iterate(path: &Path) -> Result<Vec<CandidatePath>> {
    let metadata =
        fs::metadata(path).with_context(|| format!("Cannot access {}", path.display()))?;

    if metadata.is_file() {
        return Ok(vec![CandidatePath {
            path: path.to_path_buf(),
            explicit: true,
        }]);
    }

    let mut out = Vec::new();
    for entry in WalkDir::new(path).follow_links(true).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable path under {}: {}", path.display(), e);
                continue;
            }
        };
        if entry.file_type().is_file() {
            out.push(CandidatePath {
                path: entry.into_path(),
                explicit: false,
            });
        }
    }

    debug!("{}: {} candidate files", path.display(), out.len());
    Ok(out)
}

/// Steam installation roots that exist on this machine, including extra
/// library folders listed in `libraryfolders.vdf`.
pub fn steam_library_roots() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };

    let candidates = [
        home.join(".local/share/Steam"),
        home.join(".steam/debian-installation"),
        home.join(".steam/steam"),
        home.join(".var/app/com.valvesoftware.Steam/data/Steam"),
        home.join(".var/app/com.valvesoftware.Steam/.local/share/Steam"),
        home.join("snap/steam/common/.local/share/Steam"),
    ];

    let mut roots: Vec<PathBuf> = Vec::new();
    for root in candidates.into_iter().filter(|p| p.join("steamapps").exists()) {
        let vdf = root.join("steamapps/libraryfolders.vdf");
        let extra = fs::read_to_string(&vdf)
            .map(|text| parse_library_folders(&text))
            .unwrap_or_default();

        for path in std::iter::once(root).chain(extra) {
            let canonical = fs::canonicalize(&path).unwrap_or(path);
            if !roots.contains(&canonical) {
                roots.push(canonical);
            }
        }
    }
    roots
}

/// `"path"  "/mnt/games/SteamLibrary"` lines of a libraryfolders.vdf
fn parse_library_folders(text: &str) -> Vec<PathBuf> {
    text.lines()
        .filter_map(|line| {
            let mut quoted = line.split('"').skip(1).step_by(2);
            match (quoted.next(), quoted.next()) {
                (Some("path"), Some(value)) => Some(PathBuf::from(value.replace("\\\\", "\\"))),
                _ => None,
            }
        })
        .filter(|p| p.join("steamapps").exists())
        .collect()
}

/// Locations where the game may already be installed.
///
/// Steam libraries joined with the game's Steam directory, plus each
/// package's own install directory (a previously installed package can be
/// repackaged).
pub fn default_search_paths(game: &GameData) -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(steam) = &game.steam {
        for root in steam_library_roots() {
            paths.push(root.join("steamapps/common").join(&steam.path));
        }
    }

    for package in game.packages.values() {
        paths.push(Path::new("/").join(package.install_dir(&game.shortname)));
    }

    paths.sort();
    paths.dedup();
    paths.retain(|p| p.is_dir());
    paths
}

/// Hash explicit candidates in parallel before serial identification.
///
/// Files that fail to hash are left out and logged; identification will
/// retry and report them.
pub fn prehash(candidates: &[CandidatePath], cancel: &CancelToken) -> HashMap<PathBuf, HashedFile> {
    candidates
        .par_iter()
        .filter(|c| c.explicit)
        .filter_map(|candidate| {
            if cancel.is_cancelled() {
                return None;
            }
            let options = HashOptions {
                cancel: Some(cancel),
                ..Default::default()
            };
            match hash::hash_file(&candidate.path, options) {
                Ok(hashes) => Some((candidate.path.clone(), hashes)),
                Err(e) => {
                    warn!("Failed to hash {}: {:#}", candidate.path.display(), e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_iterate_file_is_explicit() -> Result<()> {
        let dir = tempdir()?;
        let file = dir.path().join("pak0.pak");
        fs::write(&file, b"PACK")?;

        let candidates = iterate(&file)?;
        assert_eq!(candidates, vec![CandidatePath { path: file, explicit: true }]);
        Ok(())
    }

    #[test]
    fn test_iterate_directory_is_discovered() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("id1"))?;
        fs::write(dir.path().join("id1/pak0.pak"), b"PACK")?;
        fs::write(dir.path().join("readme.txt"), b"hi")?;

        let candidates = iterate(dir.path())?;
        assert_eq!(candidates.len(), 2);
        assert!(candidates.iter().all(|c| !c.explicit));
        assert!(candidates[0].path.ends_with("id1/pak0.pak"));
        Ok(())
    }

    #[test]
    fn test_iterate_missing_path_errors() {
        assert!(iterate(Path::new("/definitely/not/here/gdpack")).is_err());
    }

    #[test]
    fn test_parse_library_folders() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("steamapps"))?;
        let vdf = format!(
            "\"libraryfolders\"\n{{\n\t\"0\"\n\t{{\n\t\t\"path\"\t\t\"{}\"\n\t\t\"label\"\t\t\"\"\n\t}}\n\t\"1\"\n\t{{\n\t\t\"path\"\t\t\"/nonexistent/lib\"\n\t}}\n}}\n",
            dir.path().display()
        );
        assert_eq!(parse_library_folders(&vdf), vec![dir.path().to_path_buf()]);
        Ok(())
    }

    #[test]
    fn test_prehash_only_explicit() -> Result<()> {
        let dir = tempdir()?;
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"test")?;
        fs::write(&b, b"test")?;

        let candidates = vec![
            CandidatePath { path: a.clone(), explicit: true },
            CandidatePath { path: b.clone(), explicit: false },
        ];
        let hashes = prehash(&candidates, &CancelToken::new());
        assert_eq!(hashes.len(), 1);
        assert_eq!(
            hashes[&a].md5.as_deref(),
            Some("098f6bcd4621d373cade4e832627b4f6")
        );
        Ok(())
    }
}
