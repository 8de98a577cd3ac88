//! Mutable state of one resolution run.

use super::FillResult;
use crate::cancel::CancelToken;
use crate::hash::HashedFile;
use crate::model::WantedFile;

use anyhow::{Context, Result};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Expected content of one wanted file, for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expected {
    pub name: String,
    pub size: Option<u64>,
    pub digests: HashedFile,
}

impl Expected {
    pub fn of(file: &WantedFile) -> Self {
        Self {
            name: file.name.clone(),
            size: file.size(),
            digests: file.digests().clone(),
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.size {
            Some(size) => write!(f, "{} (size {}, {})", self.name, size, self.digests),
            None => write!(f, "{} (size unknown, {})", self.name, self.digests),
        }
    }
}

/// Something an operator may need to act on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// A file fit several wanted files, or contradicted all it could have been
    Ambiguous {
        path: PathBuf,
        size: u64,
        observed: Option<HashedFile>,
        candidates: Vec<Expected>,
    },
    /// A file looked like exactly one wanted file but its content disagrees
    Mismatch {
        path: PathBuf,
        size: u64,
        observed: Option<HashedFile>,
        expected: Expected,
    },
    /// A known-bad file was found
    Unsuitable {
        path: PathBuf,
        name: String,
        reason: String,
    },
    /// No alternative of a placeholder could be located
    NoAlternative {
        name: String,
        alternatives: Vec<String>,
    },
    /// A required file could not be located, downloaded or unpacked
    Unresolved { expected: Expected },
    DownloadFailed { name: String, url: String, error: String },
    UnpackFailed { provider: String, error: String },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::Ambiguous {
                path,
                size,
                observed,
                candidates,
            } => {
                write!(f, "{} (size {}", path.display(), size)?;
                if let Some(observed) = observed {
                    write!(f, ", {}", observed)?;
                }
                write!(f, ") matches none or several of:")?;
                for candidate in candidates {
                    write!(f, "\n    {}", candidate)?;
                }
                Ok(())
            }
            Diagnostic::Mismatch {
                path,
                size,
                observed,
                expected,
            } => {
                write!(f, "{} (size {}", path.display(), size)?;
                if let Some(observed) = observed {
                    write!(f, ", {}", observed)?;
                }
                write!(f, ") does not match {}", expected)
            }
            Diagnostic::Unsuitable { path, name, reason } => {
                write!(f, "{} is {}, which is unsuitable: {}", path.display(), name, reason)
            }
            Diagnostic::NoAlternative { name, alternatives } => {
                write!(f, "none of the alternatives for {} were found: {}", name, alternatives.join(", "))
            }
            Diagnostic::Unresolved { expected } => write!(f, "could not find {}", expected),
            Diagnostic::DownloadFailed { name, url, error } => {
                write!(f, "download of {} from {} failed: {}", name, url, error)
            }
            Diagnostic::UnpackFailed { provider, error } => {
                write!(f, "could not unpack {}: {}", provider, error)
            }
        }
    }
}

/// State owned by one resolution run.
///
/// The scratch directory is removed when the session is dropped.
pub struct Session {
    /// name -> located file
    pub found: BTreeMap<String, PathBuf>,
    pub status: BTreeMap<String, FillResult>,
    /// URLs never retried within this session
    pub download_failed: HashSet<String>,
    /// Providers already handed to their decoder
    pub unpack_tried: HashSet<String>,
    /// Unsuitable wanted files that were identified: name -> path
    pub unsuitable: BTreeMap<String, PathBuf>,
    pub diagnostics: Vec<Diagnostic>,
    /// (format, tool) pairs that were needed but not installed
    pub missing_tools: BTreeSet<(String, String)>,
    pub cancel: CancelToken,
    /// Names currently being filled, to break provider cycles
    pub(crate) resolving: BTreeSet<String>,
    pub(crate) hashes: HashMap<PathBuf, HashedFile>,
    scratch: TempDir,
    download_dir: Option<PathBuf>,
}

impl Session {
    /// New session with its scratch directory under `scratch_parent`
    /// (the system temp directory when `None`).
    pub fn new(scratch_parent: Option<&Path>, download_dir: Option<PathBuf>) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("gdpack-");
        let scratch = match scratch_parent {
            Some(parent) => {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
        .context("Failed to create session scratch directory")?;

        Ok(Self {
            found: BTreeMap::new(),
            status: BTreeMap::new(),
            download_failed: HashSet::new(),
            unpack_tried: HashSet::new(),
            unsuitable: BTreeMap::new(),
            diagnostics: Vec::new(),
            missing_tools: BTreeSet::new(),
            cancel: CancelToken::new(),
            resolving: BTreeSet::new(),
            hashes: HashMap::new(),
            scratch,
            download_dir,
        })
    }

    pub fn scratch(&self) -> &Path {
        self.scratch.path()
    }

    /// Where downloads land: the configured directory, else inside scratch
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .unwrap_or_else(|| self.scratch.path().join("downloads"))
    }

    /// Private extraction directory for one provider
    pub fn unpack_dir(&self, provider: &str) -> PathBuf {
        self.scratch
            .path()
            .join("unpack")
            .join(crate::paths::sanitize_entry_path(provider))
    }

    pub fn status_of(&self, name: &str) -> FillResult {
        self.status.get(name).copied().unwrap_or_default()
    }

    /// Remember digests computed elsewhere (e.g. by a parallel pre-hash)
    pub fn remember_hashes(&mut self, hashes: impl IntoIterator<Item = (PathBuf, HashedFile)>) {
        self.hashes.extend(hashes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scratch_removed_on_drop() -> Result<()> {
        let parent = tempfile::tempdir()?;
        let session = Session::new(Some(parent.path()), None)?;
        let scratch = session.scratch().to_path_buf();
        fs::write(scratch.join("partial"), b"x")?;
        assert!(session.download_dir().starts_with(&scratch));
        assert!(session.unpack_dir("../../evil.zip").starts_with(scratch.join("unpack")));

        drop(session);
        assert!(!scratch.exists());
        Ok(())
    }

    #[test]
    fn test_diagnostic_display_names_expected_values() {
        let diag = Diagnostic::Unresolved {
            expected: Expected {
                name: "pak1.pak".into(),
                size: Some(34257856),
                digests: HashedFile {
                    md5: Some("d76b3e5678f0b64ac74ce5e340e6a685".into()),
                    ..Default::default()
                },
            },
        };
        let text = diag.to_string();
        assert!(text.contains("pak1.pak"));
        assert!(text.contains("34257856"));
        assert!(text.contains("md5=d76b3e5678f0b64ac74ce5e340e6a685"));
    }
}
