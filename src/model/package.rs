//! Installable packages.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Install directory used when neither package nor plugin picks one
pub const DEFAULT_INSTALL_TO: &str = "usr/share/games/$package";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    #[default]
    Full,
    Demo,
    Expansion,
}

/// Archive area the built package belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Component {
    Main,
    Contrib,
    NonFree,
    #[default]
    Local,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Component::Main => "main",
            Component::Contrib => "contrib",
            Component::NonFree => "non-free",
            Component::Local => "local",
        })
    }
}

/// A named installable unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub kind: PackageKind,
    pub component: Component,
    pub description: Option<String>,
    /// Required file and group names
    pub install: BTreeSet<String>,
    /// Installed when found, including docs and licenses
    pub optional: BTreeSet<String>,
    pub install_to: Option<String>,
    pub demo_for: Vec<String>,
    pub expansion_for: Option<String>,
    pub conflicts: Vec<String>,
    /// Virtual package names
    pub provides: BTreeSet<String>,
    /// Allowed to install nothing
    pub empty: bool,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: PackageKind::Full,
            component: Component::Local,
            description: None,
            install: BTreeSet::new(),
            optional: BTreeSet::new(),
            install_to: None,
            demo_for: Vec::new(),
            expansion_for: None,
            conflicts: Vec::new(),
            provides: BTreeSet::new(),
            empty: false,
        }
    }

    /// Expanded install directory, relative to the filesystem root
    pub fn install_dir(&self, game: &str) -> String {
        let template = self.install_to.as_deref().unwrap_or(DEFAULT_INSTALL_TO);
        expand_template(template, game, &self.name)
    }
}

/// Expand `$game` and `$package` in an install location.
pub fn expand_template(template: &str, game: &str, package: &str) -> String {
    template
        .replace("$package", package)
        .replace("$game", game)
        .trim_matches('/')
        .to_string()
}
