//! Document to model conversion, validation and the reverse direction.

use super::document::{FileDoc, GameDocument, GroupDoc, Members, PackageDoc};
use super::file::{Download, FileGroup, WantedFile};
use super::listing::{self, ListingRecord};
use super::package::Package;
use super::{GameData, GameDataError};

use crate::archive;
use crate::hash::DigestAlgorithm;
use crate::paths;
use crate::plugins::{GameCustomization, Plugin};

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

impl GameData {
    /// Build the validated model from a parsed document.
    pub fn from_document(doc: GameDocument) -> Result<Self, GameDataError> {
        let plugin = match doc.plugin.as_deref() {
            None => Plugin::Generic,
            Some(name) => {
                Plugin::from_name(name).ok_or_else(|| GameDataError::UnknownPlugin(name.to_string()))?
            }
        };

        for name in doc.groups.keys() {
            if doc.files.contains_key(name) {
                return Err(GameDataError::NameCollision { name: name.clone() });
            }
        }

        let mut builder = Builder {
            files: BTreeMap::new(),
            group_names: doc.groups.keys().cloned().collect(),
        };

        for (name, file_doc) in &doc.files {
            let file = wanted_file_from_doc(name, file_doc)?;
            builder.files.insert(name.clone(), file);
        }

        if let Some(block) = &doc.size_and_md5 {
            builder.merge_records(listing::parse_size_and_md5(block)?)?;
        }
        for (block, algorithm) in [
            (&doc.md5sums, DigestAlgorithm::Md5),
            (&doc.sha1sums, DigestAlgorithm::Sha1),
            (&doc.sha256sums, DigestAlgorithm::Sha256),
        ] {
            if let Some(block) = block {
                builder.merge_records(listing::parse_digest_list(block, algorithm)?)?;
            }
        }

        let mut groups = BTreeMap::new();
        for (name, group_doc) in &doc.groups {
            let group = builder.group_from_doc(name, group_doc)?;
            groups.insert(name.clone(), group);
        }

        let mut packages = BTreeMap::new();
        for (name, package_doc) in &doc.packages {
            let package = builder.package_from_doc(name, package_doc)?;
            packages.insert(name.clone(), package);
        }

        let mut game = GameData {
            shortname: doc.shortname,
            longname: doc.longname,
            plugin,
            steam: doc.steam,
            files: builder.files,
            groups,
            packages,
            mirror_lists: doc.mirror_lists,
            external_packages: doc.external_packages.into_iter().collect(),
        };

        game.propagate_group_attributes()?;
        game.apply_package_flags(&doc.packages);

        let names: Vec<String> = game.packages.keys().cloned().collect();
        for name in names {
            let installs = game.expand(
                game.packages[&name]
                    .install
                    .iter()
                    .chain(game.packages[&name].optional.iter()),
            );
            if let Some(package) = game.packages.get_mut(&name) {
                game.plugin.customize_package(package, &installs);
            }
        }

        game.validate()?;

        debug!(
            "Loaded {}: {} files, {} groups, {} packages",
            game.shortname,
            game.files.len(),
            game.groups.len(),
            game.packages.len()
        );

        Ok(game)
    }

    /// Canonical document: listing data folded into `files`, group
    /// attributes already pushed down, doc/license lists folded into
    /// `optional`.
    pub fn to_document(&self) -> GameDocument {
        let files = self
            .files
            .values()
            .map(|file| (file.name.clone(), file_to_doc(file)))
            .collect();

        let groups = self
            .groups
            .values()
            .map(|group| {
                (
                    group.name.clone(),
                    GroupDoc {
                        attributes: group.attributes.clone(),
                        group_members: Members::List(group.members.iter().cloned().collect()),
                    },
                )
            })
            .collect();

        let packages = self
            .packages
            .values()
            .map(|package| (package.name.clone(), package_to_doc(package)))
            .collect();

        GameDocument {
            shortname: self.shortname.clone(),
            longname: self.longname.clone(),
            plugin: match self.plugin {
                Plugin::Generic => None,
                other => Some(other.name().to_string()),
            },
            steam: self.steam.clone(),
            files,
            groups,
            packages,
            mirror_lists: self.mirror_lists.clone(),
            external_packages: self.external_packages.iter().cloned().collect(),
            size_and_md5: None,
            md5sums: None,
            sha1sums: None,
            sha256sums: None,
        }
    }

    /// Push group attributes down to files, innermost group first so its
    /// values win over enclosing groups.
    fn propagate_group_attributes(&mut self) -> Result<(), GameDataError> {
        let mut order = Vec::new();
        let mut done = BTreeSet::new();
        for name in self.groups.keys() {
            let mut on_stack = BTreeSet::new();
            self.post_order(name, &mut on_stack, &mut done, &mut order)?;
        }

        for group_name in order {
            let group = &self.groups[&group_name];
            let attributes = group.attributes.clone();
            let members = self.expand(std::iter::once(&group_name));
            for member in members {
                if let Some(file) = self.files.get_mut(&member) {
                    attributes.apply(file);
                }
            }
        }

        Ok(())
    }

    fn post_order(
        &self,
        name: &str,
        on_stack: &mut BTreeSet<String>,
        done: &mut BTreeSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), GameDataError> {
        if done.contains(name) {
            return Ok(());
        }
        if !on_stack.insert(name.to_string()) {
            return Err(GameDataError::GroupCycle {
                name: name.to_string(),
            });
        }

        if let Some(group) = self.groups.get(name) {
            for member in &group.members {
                if self.groups.contains_key(member) {
                    self.post_order(member, on_stack, done, order)?;
                }
            }
        }

        on_stack.remove(name);
        done.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    /// Files listed under a package's `doc`/`license` keys get the flag.
    fn apply_package_flags(&mut self, docs: &BTreeMap<String, PackageDoc>) {
        for package_doc in docs.values() {
            let doc_files = self.expand(&package_doc.doc);
            let license_files = self.expand(&package_doc.license);

            for name in doc_files {
                if let Some(file) = self.files.get_mut(&name) {
                    file.doc = file.doc.or(Some(true));
                }
            }
            for name in license_files {
                if let Some(file) = self.files.get_mut(&name) {
                    file.license = file.license.or(Some(true));
                }
            }
        }
    }

    fn validate(&self) -> Result<(), GameDataError> {
        for file in self.files.values() {
            self.validate_file(file)?;
        }

        let virtuals = self.virtual_packages();
        for package in self.packages.values() {
            let required = self.required_files(package);
            if required.is_empty() && !package.empty {
                return Err(GameDataError::EmptyPackage {
                    name: package.name.clone(),
                });
            }

            if package.component == super::Component::NonFree {
                let everything = self.expand(package.install.iter().chain(&package.optional));
                if !everything.iter().any(|name| self.files[name].is_license()) {
                    return Err(GameDataError::MissingLicense {
                        name: package.name.clone(),
                    });
                }
            }

            let relations = package
                .demo_for
                .iter()
                .map(|target| ("demo_for", target))
                .chain(package.expansion_for.iter().map(|target| ("expansion_for", target)));
            for (relation, target) in relations {
                if !self.packages.contains_key(target) && !virtuals.contains(target.as_str()) {
                    return Err(GameDataError::UnknownRelation {
                        package: package.name.clone(),
                        relation,
                        target: target.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    fn validate_file(&self, file: &WantedFile) -> Result<(), GameDataError> {
        let unknown = |field: &'static str, name: &str| GameDataError::UnknownReference {
            owner: file.name.clone(),
            field,
            name: name.to_string(),
        };

        if file.is_placeholder() && file.has_content_data() {
            return Err(GameDataError::AlternativeWithContent {
                name: file.name.clone(),
            });
        }

        for alternative in &file.alternatives {
            if !self.files.contains_key(alternative) {
                return Err(unknown("alternatives", alternative));
            }
        }

        for provided in &file.provides {
            if provided == &file.name {
                return Err(GameDataError::SelfProvider {
                    name: file.name.clone(),
                });
            }
            if !self.files.contains_key(provided) && !self.groups.contains_key(provided) {
                return Err(unknown("provides", provided));
            }
        }

        if let Some(unpack) = &file.unpack {
            if unpack.skip.unwrap_or(0) > 0 && !archive::supports_skip(&unpack.format) {
                return Err(GameDataError::UnsupportedSkip {
                    name: file.name.clone(),
                    format: unpack.format.clone(),
                });
            }
            for part in &unpack.other_parts {
                if !self.files.contains_key(part) {
                    return Err(unknown("unpack.other_parts", part));
                }
            }
        }

        if let Some(Download::Mirror { mirror_list, .. }) = &file.download {
            if !self.mirror_lists.contains_key(mirror_list) {
                return Err(unknown("download.mirror_list", mirror_list));
            }
        }

        Ok(())
    }
}

/// Accumulates files while groups and packages may still add implicit ones.
struct Builder {
    files: BTreeMap<String, WantedFile>,
    group_names: BTreeSet<String>,
}

impl Builder {
    /// Get the named file, creating a name-only entry if needed.
    fn ensure_file(&mut self, name: &str) -> Result<&mut WantedFile, GameDataError> {
        if self.group_names.contains(name) {
            return Err(GameDataError::NameCollision {
                name: name.to_string(),
            });
        }
        Ok(self
            .files
            .entry(name.to_string())
            .or_insert_with(|| WantedFile::new(name)))
    }

    fn merge_records(&mut self, records: Vec<ListingRecord>) -> Result<(), GameDataError> {
        for record in records {
            let file = self.ensure_file(&record.name)?;
            if let Some(size) = record.size {
                file.set_size(size)?;
            }
            if let Some((algorithm, value)) = &record.digest {
                file.set_digest(*algorithm, value)?;
            }
        }
        Ok(())
    }

    /// Member names resolve to groups first, then to (possibly implicit) files.
    fn add_member(&mut self, name: &str) -> Result<(), GameDataError> {
        if !self.group_names.contains(name) {
            self.ensure_file(name)?;
        }
        Ok(())
    }

    fn group_from_doc(&mut self, name: &str, doc: &GroupDoc) -> Result<FileGroup, GameDataError> {
        let mut members = BTreeSet::new();

        for line in doc.group_members.lines() {
            let member = match listing::parse_size_record(&line) {
                Some(record) => {
                    let member = record.name.clone();
                    self.merge_records(vec![record])?;
                    member
                }
                None => {
                    self.add_member(&line)?;
                    line
                }
            };
            if member == name {
                return Err(GameDataError::GroupCycle {
                    name: name.to_string(),
                });
            }
            members.insert(member);
        }

        Ok(FileGroup {
            name: name.to_string(),
            members,
            attributes: doc.attributes.clone(),
        })
    }

    fn package_from_doc(&mut self, name: &str, doc: &PackageDoc) -> Result<Package, GameDataError> {
        let mut package = Package::new(name);
        package.kind = doc.kind;
        package.component = doc.component;
        package.description = doc.description.clone();
        package.install_to = doc.install_to.clone();
        package.demo_for = doc.demo_for.clone();
        package.expansion_for = doc.expansion_for.clone();
        package.conflicts = doc.conflicts.clone();
        package.provides = doc.provides.iter().cloned().collect();
        package.empty = doc.empty;

        for member in &doc.install {
            self.add_member(member)?;
            package.install.insert(member.clone());
        }
        for member in doc.optional.iter().chain(&doc.doc).chain(&doc.license) {
            self.add_member(member)?;
            package.optional.insert(member.clone());
        }

        Ok(package)
    }
}

fn wanted_file_from_doc(name: &str, doc: &FileDoc) -> Result<WantedFile, GameDataError> {
    let mut file = WantedFile::new(name);

    if let Some(size) = doc.size {
        file.set_size(size)?;
    }
    for (algorithm, value) in [
        (DigestAlgorithm::Md5, &doc.md5),
        (DigestAlgorithm::Sha1, &doc.sha1),
        (DigestAlgorithm::Sha256, &doc.sha256),
    ] {
        if let Some(value) = value {
            file.set_digest(algorithm, value)?;
        }
    }

    if !doc.look_for.is_empty() {
        file.look_for = doc
            .look_for
            .iter()
            .map(|pattern| paths::normalize_for_lookup(pattern))
            .filter(|pattern| !pattern.is_empty())
            .collect();
    }

    file.distinctive_name = doc.distinctive_name.unwrap_or(true);
    file.alternatives = doc.alternatives.clone();
    file.unpack = doc.unpack.clone();
    file.provides = doc.provides.iter().cloned().collect();
    file.download = doc.download.clone();
    file.unsuitable = doc.unsuitable.clone();
    file.install_as = doc.install_as.clone();
    file.install_to = doc.install_to.clone();
    file.doc = doc.doc;
    file.license = doc.license;
    file.executable = doc.executable;

    Ok(file)
}

fn file_to_doc(file: &WantedFile) -> FileDoc {
    let digests = file.digests();
    FileDoc {
        size: file.size(),
        md5: digests.md5.clone(),
        sha1: digests.sha1.clone(),
        sha256: digests.sha256.clone(),
        look_for: file.look_for.iter().cloned().collect(),
        distinctive_name: (!file.distinctive_name).then_some(false),
        alternatives: file.alternatives.clone(),
        unpack: file.unpack.clone(),
        provides: file.provides.iter().cloned().collect(),
        download: file.download.clone(),
        unsuitable: file.unsuitable.clone(),
        install_as: file.install_as.clone(),
        install_to: file.install_to.clone(),
        doc: file.doc,
        license: file.license,
        executable: file.executable,
    }
}

fn package_to_doc(package: &Package) -> PackageDoc {
    PackageDoc {
        kind: package.kind,
        component: package.component,
        description: package.description.clone(),
        install: package.install.iter().cloned().collect(),
        optional: package.optional.iter().cloned().collect(),
        doc: Vec::new(),
        license: Vec::new(),
        install_to: package.install_to.clone(),
        demo_for: package.demo_for.clone(),
        expansion_for: package.expansion_for.clone(),
        conflicts: package.conflicts.clone(),
        provides: package.provides.iter().cloned().collect(),
        empty: package.empty,
    }
}
