//! Game description JSON types
//!
//! Serde definitions for the per-game document. These mirror the on-disk
//! layout one to one; `load.rs` turns them into the validated model and
//! `GameData::to_document` turns the model back into them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::file::{Download, GroupAttributes, UnpackDirective};
use super::package::{Component, PackageKind};

/// Root game document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GameDocument {
    pub shortname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub steam: Option<SteamDoc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, FileDoc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub groups: BTreeMap<String, GroupDoc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub packages: BTreeMap<String, PackageDoc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mirror_lists: BTreeMap<String, Vec<String>>,
    /// Virtual packages provided outside this document
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_packages: Vec<String>,
    /// `size md5 name` per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_and_md5: Option<String>,
    /// `digest name` per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5sums: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1sums: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256sums: Option<String>,
}

/// Where the game lives inside a Steam library
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SteamDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,
    /// Directory under `steamapps/common`
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileDoc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub look_for: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinctive_name: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpack: Option<UnpackDirective>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<Download>,
    /// Reason this exact file must not be used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsuitable: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupDoc {
    #[serde(flatten)]
    pub attributes: GroupAttributes,
    #[serde(default)]
    pub group_members: Members,
}

/// Group members, either a list or a newline-separated block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Members {
    List(Vec<String>),
    Text(String),
}

impl Default for Members {
    fn default() -> Self {
        Members::List(Vec::new())
    }
}

impl Members {
    /// Non-empty, non-comment lines
    pub fn lines(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            Members::List(items) => items.iter().map(String::as_str).collect(),
            Members::Text(text) => text.lines().collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageDoc {
    #[serde(default, rename = "type")]
    pub kind: PackageKind,
    #[serde(default)]
    pub component: Component,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub install: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional: Vec<String>,
    /// Optional documentation, flagged `doc`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doc: Vec<String>,
    /// Optional license files, flagged `license`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub license: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_to: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub demo_for: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expansion_for: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provides: Vec<String>,
    /// Package deliberately installs nothing
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub empty: bool,
}
