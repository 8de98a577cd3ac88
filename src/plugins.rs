//! Per-game customizations.
//!
//! A closed set of plugins selected by the `plugin` key of a game
//! description. Each one may adjust packages at load time and check the
//! staged tree after assembly.

use crate::model::Package;

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use walkdir::WalkDir;

/// Hooks a game plugin can implement.
pub trait GameCustomization {
    /// Adjust a package after load. `installs` holds every file name the
    /// package may install. Must be idempotent.
    fn customize_package(&self, package: &mut Package, installs: &BTreeSet<String>);

    /// Name a file gets inside the staging tree.
    fn staged_name(&self, name: &str) -> String {
        name.to_string()
    }

    /// Check or fix up a staged package tree.
    fn post_assemble(&self, package: &Package, root: &Path) -> anyhow::Result<()>;
}

/// Supported game plugins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Plugin {
    #[default]
    Generic,
    /// Quake and its mission packs
    Quake,
    /// Doom engine games shipping IWADs
    Doom,
}

impl Plugin {
    pub const ALL: [Plugin; 3] = [Plugin::Generic, Plugin::Quake, Plugin::Doom];

    pub fn name(&self) -> &'static str {
        match self {
            Plugin::Generic => "generic",
            Plugin::Quake => "quake",
            Plugin::Doom => "doom",
        }
    }

    /// Parses a plugin from its configuration name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|plugin| plugin.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Virtual package every IWAD-carrying package provides
pub const DOOM_WAD_VIRTUAL: &str = "doom-wad";

const QUAKE_INSTALL_TO: &str = "usr/share/games/quake";

fn is_wad(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".wad")
}

impl GameCustomization for Plugin {
    fn customize_package(&self, package: &mut Package, installs: &BTreeSet<String>) {
        match self {
            Plugin::Generic => {}
            Plugin::Quake => {
                if package.install_to.is_none() {
                    package.install_to = Some(QUAKE_INSTALL_TO.to_string());
                }
            }
            Plugin::Doom => {
                if installs.iter().any(|name| is_wad(name)) {
                    package.provides.insert(DOOM_WAD_VIRTUAL.to_string());
                }
            }
        }
    }

    fn staged_name(&self, name: &str) -> String {
        match self {
            Plugin::Quake => name.to_lowercase(),
            _ => name.to_string(),
        }
    }

    fn post_assemble(&self, package: &Package, root: &Path) -> anyhow::Result<()> {
        match self {
            Plugin::Generic | Plugin::Quake => Ok(()),
            Plugin::Doom => {
                let has_wad = WalkDir::new(root)
                    .into_iter()
                    .filter_map(|e| e.ok())
                    .any(|e| e.file_type().is_file() && is_wad(&e.file_name().to_string_lossy()));

                if !has_wad && !package.empty {
                    anyhow::bail!(
                        "{} staged no .wad file under {}",
                        package.name,
                        root.display()
                    );
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_from_name() {
        assert_eq!(Plugin::from_name("Quake"), Some(Plugin::Quake));
        assert_eq!(Plugin::from_name("doom"), Some(Plugin::Doom));
        assert_eq!(Plugin::from_name("heretic"), None);
    }

    #[test]
    fn test_doom_adds_virtual_provide_once() {
        let mut package = Package::new("doom2-data");
        let installs: BTreeSet<String> = ["doom2.wad".to_string()].into_iter().collect();

        Plugin::Doom.customize_package(&mut package, &installs);
        Plugin::Doom.customize_package(&mut package, &installs);
        assert_eq!(package.provides.len(), 1);
        assert!(package.provides.contains(DOOM_WAD_VIRTUAL));

        let mut music = Package::new("doom2-music");
        Plugin::Doom.customize_package(&mut music, &["track01.ogg".to_string()].into_iter().collect());
        assert!(music.provides.is_empty());
    }

    #[test]
    fn test_quake_keeps_explicit_install_dir() {
        let mut package = Package::new("quake-music");
        package.install_to = Some("usr/share/games/quake/id1/music".into());
        Plugin::Quake.customize_package(&mut package, &BTreeSet::new());
        assert_eq!(package.install_to.as_deref(), Some("usr/share/games/quake/id1/music"));

        let mut package = Package::new("quake-registered");
        Plugin::Quake.customize_package(&mut package, &BTreeSet::new());
        assert_eq!(package.install_dir("quake"), "usr/share/games/quake");
        assert_eq!(Plugin::Quake.staged_name("ID1/PAK0.PAK"), "id1/pak0.pak");
    }

    #[test]
    fn test_doom_post_assemble_requires_wad() -> anyhow::Result<()> {
        let temp = TempDir::new()?;
        let package = Package::new("doom2-data");
        assert!(Plugin::Doom.post_assemble(&package, temp.path()).is_err());

        fs::write(temp.path().join("DOOM2.WAD"), b"IWAD")?;
        Plugin::Doom.post_assemble(&package, temp.path())?;
        Ok(())
    }
}
