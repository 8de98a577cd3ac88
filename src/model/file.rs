//! Wanted files and groups.

use crate::hash::{DigestAlgorithm, HashedFile};
use crate::paths;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::GameDataError;

/// How to turn a provider file into the files it provides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnpackDirective {
    /// Decoder name, e.g. `zip`, `tar.gz`, `7z`, `cat`
    pub format: String,
    /// Bytes to skip before the container starts (self-extracting stubs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    /// Further wanted files the decoder consumes alongside the provider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub other_parts: Vec<String>,
}

/// Where a file can be fetched from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Download {
    Url(String),
    Urls(Vec<String>),
    Mirror { mirror_list: String, path: String },
}

/// Attributes a group pushes down to its members.
///
/// Member values win over group values; for nested groups the innermost
/// group wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAttributes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_to: Option<String>,
}

impl GroupAttributes {
    /// Fill every attribute the file has not set itself.
    pub fn apply(&self, file: &mut WantedFile) {
        file.doc = file.doc.or(self.doc);
        file.license = file.license.or(self.license);
        file.executable = file.executable.or(self.executable);
        if file.install_to.is_none() {
            file.install_to = self.install_to.clone();
        }
    }
}

/// A named file the game may need to install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WantedFile {
    pub name: String,
    size: Option<u64>,
    digests: HashedFile,
    /// Lowercase name patterns this file is recognized by
    pub look_for: BTreeSet<String>,
    /// False when the name alone must never identify the file
    pub distinctive_name: bool,
    pub alternatives: Vec<String>,
    pub unpack: Option<UnpackDirective>,
    pub provides: BTreeSet<String>,
    pub download: Option<Download>,
    pub unsuitable: Option<String>,
    pub install_as: Option<String>,
    pub install_to: Option<String>,
    pub doc: Option<bool>,
    pub license: Option<bool>,
    pub executable: Option<bool>,
}

impl WantedFile {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let mut look_for = BTreeSet::new();
        look_for.insert(paths::normalize_for_lookup(paths::basename(&name)));

        Self {
            name,
            size: None,
            digests: HashedFile::default(),
            look_for,
            distinctive_name: true,
            alternatives: Vec::new(),
            unpack: None,
            provides: BTreeSet::new(),
            download: None,
            unsuitable: None,
            install_as: None,
            install_to: None,
            doc: None,
            license: None,
            executable: None,
        }
    }

    pub fn size(&self) -> Option<u64> {
        self.size
    }

    pub fn digests(&self) -> &HashedFile {
        &self.digests
    }

    /// Set the size once; a different second value is a conflict.
    pub fn set_size(&mut self, size: u64) -> Result<(), GameDataError> {
        match self.size {
            Some(existing) if existing != size => Err(GameDataError::SizeConflict {
                name: self.name.clone(),
                existing,
                new: size,
            }),
            _ => {
                self.size = Some(size);
                Ok(())
            }
        }
    }

    /// Set one digest once; a different second value is a conflict.
    pub fn set_digest(&mut self, algorithm: DigestAlgorithm, value: &str) -> Result<(), GameDataError> {
        if !algorithm.is_valid_hex(value) {
            return Err(GameDataError::InvalidDigest {
                name: self.name.clone(),
                algorithm,
                value: value.to_string(),
            });
        }

        let value = value.to_ascii_lowercase();
        if let Some(existing) = self.digests.get(algorithm) {
            if existing != value {
                return Err(GameDataError::DigestConflict {
                    name: self.name.clone(),
                    algorithm,
                    existing: existing.to_string(),
                    new: value,
                });
            }
        }

        *self.digests.slot_mut(algorithm) = Some(value);
        Ok(())
    }

    /// Pure placeholder over alternatives
    pub fn is_placeholder(&self) -> bool {
        !self.alternatives.is_empty()
    }

    /// Whether the file carries anything a candidate can be checked against
    pub fn has_content_data(&self) -> bool {
        self.size.is_some() || !self.digests.is_empty()
    }

    pub fn is_doc(&self) -> bool {
        self.doc.unwrap_or(false)
    }

    pub fn is_license(&self) -> bool {
        self.license.unwrap_or(false)
    }

    pub fn is_executable(&self) -> bool {
        self.executable.unwrap_or(false)
    }

    /// File name inside the install directory
    pub fn install_name(&self) -> &str {
        self.install_as.as_deref().unwrap_or(&self.name)
    }
}

/// Named set of files and nested groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileGroup {
    pub name: String,
    pub members: BTreeSet<String>,
    pub attributes: GroupAttributes,
}

#[cfg(test)]
mod tests {
    use super::*;

    const MD5_A: &str = "098f6bcd4621d373cade4e832627b4f6";
    const MD5_B: &str = "d41d8cd98f00b204e9800998ecf8427e";

    #[test]
    fn test_default_look_for_is_lowercase_basename() {
        let file = WantedFile::new("id1/PAK0.PAK");
        assert!(file.look_for.contains("pak0.pak"));
        assert!(file.distinctive_name);
    }

    #[test]
    fn test_digest_is_set_once() {
        let mut file = WantedFile::new("a.bin");
        file.set_digest(DigestAlgorithm::Md5, MD5_A).unwrap();
        file.set_digest(DigestAlgorithm::Md5, &MD5_A.to_uppercase()).unwrap();

        let err = file.set_digest(DigestAlgorithm::Md5, MD5_B).unwrap_err();
        assert!(matches!(err, GameDataError::DigestConflict { .. }));
    }

    #[test]
    fn test_invalid_digest_rejected() {
        let mut file = WantedFile::new("a.bin");
        let err = file.set_digest(DigestAlgorithm::Sha1, MD5_A).unwrap_err();
        assert!(matches!(err, GameDataError::InvalidDigest { .. }));
    }

    #[test]
    fn test_size_is_set_once() {
        let mut file = WantedFile::new("a.bin");
        file.set_size(10).unwrap();
        file.set_size(10).unwrap();
        assert!(matches!(
            file.set_size(11),
            Err(GameDataError::SizeConflict { existing: 10, new: 11, .. })
        ));
    }

    #[test]
    fn test_group_attributes_do_not_override_member() {
        let mut file = WantedFile::new("readme.txt");
        file.doc = Some(false);

        let attrs = GroupAttributes {
            doc: Some(true),
            license: Some(true),
            executable: None,
            install_to: Some("usr/share/doc/$package".into()),
        };
        attrs.apply(&mut file);

        assert!(!file.is_doc());
        assert!(file.is_license());
        assert!(!file.is_executable());
        assert_eq!(file.install_to.as_deref(), Some("usr/share/doc/$package"));
    }
}
