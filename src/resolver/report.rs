//! Package verdicts and the hand-off to package assembly.

use super::session::Diagnostic;
use super::{FillResult, Resolver};
use crate::model::{expand_template, Package};
use crate::plugins::{GameCustomization, Plugin};

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome for one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageVerdict {
    pub package: String,
    pub result: FillResult,
    /// Required files that were not located
    pub missing: Vec<String>,
    pub optional_found: usize,
}

/// Everything an operator needs after a run
#[derive(Debug, Clone)]
pub struct ResolutionReport {
    pub verdicts: Vec<PackageVerdict>,
    pub diagnostics: Vec<Diagnostic>,
    /// (format, tool) pairs that were needed but not installed
    pub missing_tools: Vec<(String, String)>,
}

impl ResolutionReport {
    /// The run succeeds when at least one package can be built
    pub fn any_complete(&self) -> bool {
        self.verdicts.iter().any(|v| v.result.is_complete())
    }

    pub fn complete(&self) -> impl Iterator<Item = &PackageVerdict> + '_ {
        self.verdicts.iter().filter(|v| v.result.is_complete())
    }
}

/// One file of an assembly plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFile {
    pub name: String,
    pub source: PathBuf,
    /// Relative to the package root
    pub dest: PathBuf,
    pub executable: bool,
    pub doc: bool,
    pub license: bool,
}

/// Files of a complete package and where they go
#[derive(Debug, Clone)]
pub struct AssemblyPlan {
    pub package: Package,
    pub plugin: Plugin,
    pub files: Vec<PlannedFile>,
}

impl AssemblyPlan {
    /// Copy every planned file under `root`, then let the game plugin
    /// check the tree.
    pub fn stage(&self, root: &Path) -> Result<()> {
        for file in &self.files {
            let dest = root.join(&file.dest);
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
            fs::copy(&file.source, &dest).with_context(|| {
                format!("Failed to copy {} to {}", file.source.display(), dest.display())
            })?;
            set_mode(&dest, file.executable)?;
            debug!("Staged {} as {}", file.name, file.dest.display());
        }

        self.plugin.post_assemble(&self.package, root)
    }
}

#[cfg(unix)]
fn set_mode(path: &Path, executable: bool) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = if executable { 0o755 } else { 0o644 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("Failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _executable: bool) -> Result<()> {
    Ok(())
}

impl Resolver {
    /// Fill every file of one package.
    ///
    /// The verdict is the meet of its required files. Optional files are
    /// looked for too but never affect it.
    pub fn resolve_package(&mut self, name: &str, allow_download: bool) -> Result<PackageVerdict> {
        let Some(package) = self.game.packages.get(name) else {
            bail!("Unknown package: {}", name);
        };
        let empty = package.empty;
        let required = self.game.required_files(package);
        let optional = self.game.optional_files(package);

        let mut result = FillResult::Undetermined;
        for file in &required {
            result = result.meet(self.fill_gap(file, allow_download)?);
        }
        for file in &optional {
            self.fill_gap(file, allow_download)?;
        }

        if result == FillResult::Undetermined {
            result = if empty {
                FillResult::Complete
            } else {
                FillResult::Impossible
            };
        }

        let verdict = PackageVerdict {
            package: name.to_string(),
            result,
            missing: required
                .iter()
                .filter(|f| !self.session.found.contains_key(*f))
                .cloned()
                .collect(),
            optional_found: optional
                .iter()
                .filter(|f| self.session.found.contains_key(*f))
                .count(),
        };
        info!("{}: {}", name, result);
        Ok(verdict)
    }

    /// Resolve the requested packages (all of them when none are named).
    /// A requested name may also be a virtual package.
    pub fn resolve(&mut self, requested: &[String], allow_download: bool) -> Result<ResolutionReport> {
        let mut names = BTreeSet::new();
        if requested.is_empty() {
            names.extend(self.game.packages.keys().cloned());
        }
        for name in requested {
            let packages = self.game.packages_for(name);
            if packages.is_empty() {
                bail!("{} has no package named or providing {}", self.game.shortname, name);
            }
            names.extend(packages.into_iter().map(|p| p.name.clone()));
        }

        let mut verdicts = Vec::new();
        for name in &names {
            verdicts.push(self.resolve_package(name, allow_download)?);
        }

        Ok(ResolutionReport {
            verdicts,
            diagnostics: self.session.diagnostics.clone(),
            missing_tools: self.session.missing_tools.iter().cloned().collect(),
        })
    }

    /// Install layout of a package whose required files are all found.
    ///
    /// Anything less than complete is refused.
    pub fn plan_package(&self, name: &str) -> Result<AssemblyPlan> {
        let Some(package) = self.game.packages.get(name) else {
            bail!("Unknown package: {}", name);
        };

        let required = self.game.required_files(package);
        let missing: Vec<&str> = required
            .iter()
            .filter(|f| !self.session.found.contains_key(*f))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            bail!(
                "{} is not complete, missing: {}",
                name,
                missing.join(", ")
            );
        }
        if required.is_empty() && !package.empty {
            bail!("{} installs nothing", name);
        }

        let plugin = self.game.plugin;
        let mut names = required;
        names.extend(self.game.optional_files(package));

        let mut files = Vec::new();
        for file_name in names {
            let (Some(file), Some(source)) = (
                self.game.files.get(&file_name),
                self.session.found.get(&file_name),
            ) else {
                continue;
            };

            let dir = match &file.install_to {
                Some(template) => expand_template(template, &self.game.shortname, &package.name),
                None if file.is_doc() || file.is_license() => format!("usr/share/doc/{}", package.name),
                None => package.install_dir(&self.game.shortname),
            };

            files.push(PlannedFile {
                name: file_name.clone(),
                source: source.clone(),
                dest: PathBuf::from(dir).join(plugin.staged_name(file.install_name())),
                executable: file.is_executable(),
                doc: file.is_doc(),
                license: file.is_license(),
            });
        }

        Ok(AssemblyPlan {
            package: package.clone(),
            plugin,
            files,
        })
    }
}
