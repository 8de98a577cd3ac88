//! Identification index
//!
//! Lookup tables from size, look-for pattern and digest to the wanted files
//! that could match. Collisions are expected; they are settled by digest
//! comparison at identification time, not here.

use super::GameData;
use crate::hash::DigestAlgorithm;
use crate::paths;

use std::collections::{BTreeMap, BTreeSet};

static EMPTY: BTreeSet<String> = BTreeSet::new();

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentificationIndex {
    by_size: BTreeMap<u64, BTreeSet<String>>,
    by_name: BTreeMap<String, BTreeSet<String>>,
    by_digest: BTreeMap<(DigestAlgorithm, String), BTreeSet<String>>,
    /// target file -> files whose decoded contents yield it
    providers: BTreeMap<String, BTreeSet<String>>,
}

impl IdentificationIndex {
    pub fn build(game: &GameData) -> Self {
        let mut index = Self::default();

        for file in game.files.values() {
            // Placeholders are satisfied through their alternatives
            if file.is_placeholder() {
                continue;
            }

            if let Some(size) = file.size() {
                index
                    .by_size
                    .entry(size)
                    .or_default()
                    .insert(file.name.clone());
            }

            for pattern in &file.look_for {
                index
                    .by_name
                    .entry(pattern.clone())
                    .or_default()
                    .insert(file.name.clone());
            }

            for (algorithm, value) in file.digests().iter() {
                index
                    .by_digest
                    .entry((algorithm, value.to_string()))
                    .or_default()
                    .insert(file.name.clone());
            }

            for target in game.expand(&file.provides) {
                index
                    .providers
                    .entry(target)
                    .or_default()
                    .insert(file.name.clone());
            }
        }

        index
    }

    pub fn candidates_by_size(&self, size: u64) -> &BTreeSet<String> {
        self.by_size.get(&size).unwrap_or(&EMPTY)
    }

    /// Exact lookup of a normalized look-for key
    pub fn candidates_by_name(&self, key: &str) -> &BTreeSet<String> {
        self.by_name
            .get(&paths::normalize_for_lookup(key))
            .unwrap_or(&EMPTY)
    }

    /// Files whose look-for patterns match any trailing sub-path of `path`
    pub fn candidates_for_path(&self, path: &str) -> BTreeSet<String> {
        paths::lookup_suffixes(path)
            .iter()
            .flat_map(|suffix| self.candidates_by_name(suffix).iter().cloned())
            .collect()
    }

    pub fn candidates_by_digest(&self, algorithm: DigestAlgorithm, value: &str) -> &BTreeSet<String> {
        self.by_digest
            .get(&(algorithm, value.to_ascii_lowercase()))
            .unwrap_or(&EMPTY)
    }

    pub fn providers_of(&self, name: &str) -> &BTreeSet<String> {
        self.providers.get(name).unwrap_or(&EMPTY)
    }

    pub fn is_empty(&self) -> bool {
        self.by_size.is_empty() && self.by_name.is_empty() && self.by_digest.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "shortname": "demo",
        "files": {
            "data.bin": { "size": 100, "md5": "098F6BCD4621D373CADE4E832627B4F6", "look_for": ["DATA/DATA.BIN"] },
            "other.bin": { "size": 100 },
            "msg.txt": { "alternatives": ["msg_en.txt"] },
            "msg_en.txt": { "size": 5 },
            "bundle.zip": { "unpack": { "format": "zip" }, "provides": ["payload"] }
        },
        "groups": {
            "payload": { "group_members": ["data.bin", "msg_en.txt"] }
        },
        "packages": { "demo-data": { "install": ["data.bin"] } }
    }"#;

    #[test]
    fn test_size_collisions_are_kept() {
        let game = GameData::from_json(DOC).unwrap();
        let index = IdentificationIndex::build(&game);

        let by_size: Vec<_> = index.candidates_by_size(100).iter().cloned().collect();
        assert_eq!(by_size, vec!["data.bin", "other.bin"]);
        assert!(index.candidates_by_size(7).is_empty());
    }

    #[test]
    fn test_name_and_digest_lookup() {
        let game = GameData::from_json(DOC).unwrap();
        let index = IdentificationIndex::build(&game);

        assert!(index.candidates_by_name("data/data.bin").contains("data.bin"));
        assert!(index.candidates_for_path("/media/cd/Data/DATA.BIN").contains("data.bin"));
        assert!(index.candidates_for_path("/media/cd/other/DATA.BIN").is_empty());
        assert!(index
            .candidates_by_digest(DigestAlgorithm::Md5, "098f6bcd4621d373cade4e832627b4f6")
            .contains("data.bin"));
    }

    #[test]
    fn test_placeholders_not_indexed() {
        let game = GameData::from_json(DOC).unwrap();
        let index = IdentificationIndex::build(&game);
        assert!(index.candidates_by_name("msg.txt").is_empty());
        assert!(index.candidates_by_name("msg_en.txt").contains("msg_en.txt"));
    }

    #[test]
    fn test_group_provides_expand_to_members() {
        let game = GameData::from_json(DOC).unwrap();
        let index = IdentificationIndex::build(&game);
        assert!(index.providers_of("data.bin").contains("bundle.zip"));
        assert!(index.providers_of("msg_en.txt").contains("bundle.zip"));
        assert!(index.providers_of("bundle.zip").is_empty());
    }
}
