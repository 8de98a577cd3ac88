//! Installer formats that can only be unpacked wholesale by an external tool.
//!
//! The tool extracts everything into a private directory under the session
//! scratch area; the decoder then walks that directory.

use super::{find_tool, DecodeRequest, Decoder, Entry, Flow, Visit};

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::UNIX_EPOCH;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTool {
    Unrar,
    Innoextract,
    Cabextract,
    Unshield,
    Lha,
    Arj,
}

impl ExternalTool {
    pub fn for_format(format: &str) -> Option<Self> {
        match format {
            "rar" | "unrar" => Some(Self::Unrar),
            "innoextract" => Some(Self::Innoextract),
            "cab" | "cabextract" => Some(Self::Cabextract),
            "unshield" => Some(Self::Unshield),
            "lha" | "lzh" => Some(Self::Lha),
            "arj" => Some(Self::Arj),
            _ => None,
        }
    }

    pub fn format(&self) -> &'static str {
        match self {
            Self::Unrar => "rar",
            Self::Innoextract => "innoextract",
            Self::Cabextract => "cab",
            Self::Unshield => "unshield",
            Self::Lha => "lha",
            Self::Arj => "arj",
        }
    }

    fn binaries(&self) -> &'static [&'static str] {
        match self {
            Self::Unrar => &["unrar"],
            Self::Innoextract => &["innoextract"],
            Self::Cabextract => &["cabextract"],
            Self::Unshield => &["unshield"],
            Self::Lha => &["lha", "jlha"],
            Self::Arj => &["arj"],
        }
    }

    /// Full command line extracting `archive` into `dest`
    fn command(&self, binary: &Path, archive: &Path, dest: &Path) -> Command {
        let mut cmd = Command::new(binary);
        match self {
            Self::Unrar => {
                // Trailing separator marks the destination as a directory
                cmd.args(["x", "-y", "-o+", "-idq"])
                    .arg(archive)
                    .arg(format!("{}/", dest.display()));
            }
            Self::Innoextract => {
                cmd.args(["--silent", "--output-dir"]).arg(dest).arg(archive);
            }
            Self::Cabextract => {
                cmd.arg("-q").arg("-d").arg(dest).arg(archive);
            }
            Self::Unshield => {
                cmd.arg("-d").arg(dest).arg("x").arg(archive);
            }
            Self::Lha => {
                cmd.arg(format!("xqw={}", dest.display())).arg(archive);
            }
            Self::Arj => {
                cmd.args(["x", "-y"])
                    .arg(archive)
                    .arg(format!("{}/", dest.display()));
            }
        }
        cmd
    }
}

pub struct ExtractAll {
    tool: ExternalTool,
    binary: PathBuf,
    archive: PathBuf,
    scratch: PathBuf,
    extracted: Option<TempDir>,
}

impl ExtractAll {
    pub fn new(tool: ExternalTool, request: &DecodeRequest) -> Result<Self> {
        let binary = find_tool(tool.format(), tool.binaries())?;
        Ok(Self {
            tool,
            binary,
            archive: request.path.clone(),
            scratch: request.scratch.clone(),
            extracted: None,
        })
    }

    fn extract(&mut self) -> Result<PathBuf> {
        if let Some(dir) = &self.extracted {
            return Ok(dir.path().to_path_buf());
        }

        fs::create_dir_all(&self.scratch)?;
        let dir = tempfile::Builder::new()
            .prefix(self.tool.format())
            .tempdir_in(&self.scratch)
            .context("Failed to create extraction directory")?;

        let output = self
            .tool
            .command(&self.binary, &self.archive, dir.path())
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} failed on {}: {}",
                self.binary.display(),
                self.archive.display(),
                stderr.lines().next().unwrap_or("unknown error")
            );
        }

        // Windows archives may extract with restrictive permissions
        fix_permissions_recursive(dir.path())?;
        debug!("Extracted {} with {}", self.archive.display(), self.binary.display());

        let path = dir.path().to_path_buf();
        self.extracted = Some(dir);
        Ok(path)
    }
}

impl Decoder for ExtractAll {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()> {
        let root = self.extract()?;
        walk_directory(&root, visit)
    }
}

/// Present an extracted directory tree as container entries.
pub fn walk_directory(root: &Path, visit: &mut Visit<'_>) -> Result<()> {
    for dir_entry in WalkDir::new(root).sort_by_file_name().min_depth(1) {
        let dir_entry = dir_entry?;
        let rel = dir_entry.path().strip_prefix(root).unwrap_or(dir_entry.path());
        let metadata = dir_entry.metadata()?;

        let entry = Entry {
            name: rel.to_string_lossy().replace('\\', "/"),
            size: metadata.is_file().then(|| metadata.len()),
            is_regular: metadata.is_file(),
            extractable: metadata.is_file(),
            mtime: metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64),
        };

        let flow = if metadata.is_file() {
            let file = File::open(dir_entry.path())
                .with_context(|| format!("Failed to open {}", dir_entry.path().display()))?;
            visit(&entry, &mut BufReader::new(file))?
        } else {
            visit(&entry, &mut std::io::empty())?
        };

        if flow == Flow::Stop {
            break;
        }
    }
    Ok(())
}

/// Ensure extracted files are readable and directories are traversable.
#[cfg(unix)]
fn fix_permissions_recursive(dir: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        let path = entry.path();
        if let Ok(metadata) = fs::metadata(path) {
            let mut perms = metadata.permissions();
            let mode = perms.mode();
            let wanted = if metadata.is_dir() { 0o700 } else { 0o600 };
            if mode & wanted != wanted {
                perms.set_mode(mode | wanted);
                fs::set_permissions(path, perms).ok();
            }
        }
    }

    Ok(())
}

#[cfg(not(unix))]
fn fix_permissions_recursive(_dir: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::tempdir;

    #[test]
    fn test_format_names() {
        assert_eq!(ExternalTool::for_format("rar"), Some(ExternalTool::Unrar));
        assert_eq!(ExternalTool::for_format("lzh"), Some(ExternalTool::Lha));
        assert_eq!(ExternalTool::for_format("zip"), None);
    }

    #[test]
    fn test_command_lines() {
        let cmd = ExternalTool::Unshield.command(Path::new("unshield"), Path::new("data1.cab"), Path::new("/tmp/out"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["-d", "/tmp/out", "x", "data1.cab"]);

        let cmd = ExternalTool::Lha.command(Path::new("lha"), Path::new("a.lha"), Path::new("/tmp/out"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(args, vec!["xqw=/tmp/out", "a.lha"]);
    }

    #[test]
    fn test_walk_directory() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("app/DATA"))?;
        fs::write(dir.path().join("app/DATA/MAIN.DAT"), b"main")?;
        fs::write(dir.path().join("app/setup.exe"), b"MZ")?;

        let mut seen = Vec::new();
        walk_directory(dir.path(), &mut |entry, reader| {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            seen.push((entry.name.clone(), entry.is_regular, entry.size, data));
            Ok(Flow::Continue)
        })?;

        assert_eq!(seen.len(), 4);
        assert_eq!(seen[0].0, "app");
        assert!(!seen[0].1);
        assert_eq!(seen[2], ("app/DATA/MAIN.DAT".to_string(), true, Some(4), b"main".to_vec()));
        assert_eq!(seen[3].0, "app/setup.exe");
        Ok(())
    }
}
