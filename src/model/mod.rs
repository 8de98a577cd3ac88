//! Game data model
//!
//! In-memory description of one game: the files it may need, the groups
//! that share attributes, and the packages that install them. Built once
//! from a [`GameDocument`] and read-only for the rest of the run.

pub mod document;
pub mod file;
pub mod index;
pub mod listing;
mod load;
pub mod package;

pub use document::{GameDocument, SteamDoc};
pub use file::{Download, FileGroup, GroupAttributes, UnpackDirective, WantedFile};
pub use index::IdentificationIndex;
pub use package::{expand_template, Component, Package, PackageKind};

use crate::hash::DigestAlgorithm;
use crate::plugins::Plugin;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Defect in the game description. Always fatal at load time.
#[derive(Debug, thiserror::Error)]
pub enum GameDataError {
    #[error("failed to parse game description: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("'{name}' is declared both as a file and as a group")]
    NameCollision { name: String },

    #[error("{algorithm} of '{name}' declared twice: {existing} vs {new}")]
    DigestConflict {
        name: String,
        algorithm: DigestAlgorithm,
        existing: String,
        new: String,
    },

    #[error("size of '{name}' declared twice: {existing} vs {new}")]
    SizeConflict { name: String, existing: u64, new: u64 },

    #[error("malformed {algorithm} digest for '{name}': {value}")]
    InvalidDigest {
        name: String,
        algorithm: DigestAlgorithm,
        value: String,
    },

    #[error("'{name}' has alternatives and must not carry its own size or digests")]
    AlternativeWithContent { name: String },

    #[error("{owner}: {field} references unknown '{name}'")]
    UnknownReference {
        owner: String,
        field: &'static str,
        name: String,
    },

    #[error("'{name}' skips into a {format} container, which that format cannot do")]
    UnsupportedSkip { name: String, format: String },

    #[error("'{name}' lists itself as something it provides")]
    SelfProvider { name: String },

    #[error("group '{name}' contains itself")]
    GroupCycle { name: String },

    #[error("package '{name}' installs nothing and is not marked empty")]
    EmptyPackage { name: String },

    #[error("non-free package '{name}' ships no license file")]
    MissingLicense { name: String },

    #[error("package '{package}': {relation} target '{target}' is neither a package nor a provided name")]
    UnknownRelation {
        package: String,
        relation: &'static str,
        target: String,
    },

    #[error("unknown game plugin '{0}'")]
    UnknownPlugin(String),

    #[error("malformed line in {block}: '{line}'")]
    MalformedListing { block: String, line: String },
}

/// Validated description of one game
#[derive(Debug, Clone, PartialEq)]
pub struct GameData {
    pub shortname: String,
    pub longname: Option<String>,
    pub plugin: Plugin,
    pub steam: Option<SteamDoc>,
    pub files: BTreeMap<String, WantedFile>,
    pub groups: BTreeMap<String, FileGroup>,
    pub packages: BTreeMap<String, Package>,
    pub mirror_lists: BTreeMap<String, Vec<String>>,
    /// Virtual packages that exist outside this description
    pub external_packages: BTreeSet<String>,
}

impl GameData {
    /// Load and validate a JSON game description.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read game description: {}", path.display()))?;
        Self::from_json(&text)
            .with_context(|| format!("Invalid game description: {}", path.display()))
    }

    pub fn from_json(text: &str) -> Result<Self, GameDataError> {
        let document: GameDocument = serde_json::from_str(text)?;
        Self::from_document(document)
    }

    /// Canonical JSON; reloading it yields an equal model.
    pub fn to_json(&self) -> Result<String, GameDataError> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }

    pub fn longname(&self) -> &str {
        self.longname.as_deref().unwrap_or(&self.shortname)
    }

    pub fn is_group(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    /// Expand file and group names into the set of file names they cover.
    ///
    /// Names that are neither are dropped; nested groups are expanded
    /// recursively and each group is visited once.
    pub fn expand<'a, I>(&self, names: I) -> BTreeSet<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut out = BTreeSet::new();
        let mut seen_groups = BTreeSet::new();
        let mut stack: Vec<&str> = names.into_iter().map(String::as_str).collect();

        while let Some(name) = stack.pop() {
            if let Some(group) = self.groups.get(name) {
                if seen_groups.insert(name) {
                    stack.extend(group.members.iter().map(String::as_str));
                }
            } else if self.files.contains_key(name) {
                out.insert(name.to_string());
            }
        }

        out
    }

    /// Files a package requires
    pub fn required_files(&self, package: &Package) -> BTreeSet<String> {
        self.expand(&package.install)
    }

    /// Files a package installs when available
    pub fn optional_files(&self, package: &Package) -> BTreeSet<String> {
        let required = self.required_files(package);
        self.expand(&package.optional)
            .into_iter()
            .filter(|name| !required.contains(name))
            .collect()
    }

    /// Every name some package or external source provides as a virtual package
    pub fn virtual_packages(&self) -> BTreeSet<&str> {
        self.packages
            .values()
            .flat_map(|p| p.provides.iter().map(String::as_str))
            .chain(self.external_packages.iter().map(String::as_str))
            .collect()
    }

    /// Resolve a package name or a virtual name to concrete packages.
    pub fn packages_for(&self, name: &str) -> Vec<&Package> {
        match self.packages.get(name) {
            Some(package) => vec![package],
            None => self
                .packages
                .values()
                .filter(|p| p.provides.contains(name))
                .collect(),
        }
    }
}
