//! 7z binary integration.
//!
//! 7z archives (and the many installer formats 7-Zip also understands) are
//! listed once and then streamed member by member with `7zz e -so`, so
//! nothing is unpacked that the resolver does not ask for.
//!
//! # 7z Commands Reference
//!
//! - List files: `7zz l -slt -ba archive.7z`
//!   - `-slt`: Technical listing (key=value format)
//!   - `-ba`: Bare output (no headers)
//!
//! - Extract single file to stdout: `7zz e -so -spd archive.7z "path/in/archive"`
//!   - `-so`: Write to stdout
//!   - `-spd`: Disable wildcard matching

use super::{find_tool, DecodeError, Decoder, Entry, Flow, Visit};

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

/// Get the path to the 7z binary (`7zz`, `7z` or `7za` on `PATH`).
pub fn get_7z_path() -> Result<PathBuf, DecodeError> {
    find_tool("7z", &["7zz", "7z", "7za"])
}

pub struct SevenZipDecoder {
    binary: PathBuf,
    path: PathBuf,
    entries: Vec<Entry>,
}

impl SevenZipDecoder {
    pub fn open(path: &Path) -> Result<Self> {
        let binary = get_7z_path()?;
        let entries = list_archive(&binary, path)?;
        Ok(Self {
            binary,
            path: path.to_path_buf(),
            entries,
        })
    }
}

impl Decoder for SevenZipDecoder {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()> {
        for entry in &self.entries {
            let mut reader = LazyMember::new(&self.binary, &self.path, &entry.name);
            let flow = visit(entry, &mut reader)?;
            reader.finish()?;
            if flow == Flow::Stop {
                break;
            }
        }
        Ok(())
    }

    fn entries(&mut self) -> Result<Vec<Entry>> {
        Ok(self.entries.clone())
    }
}

/// List all members of an archive.
pub fn list_archive(binary: &Path, archive_path: &Path) -> Result<Vec<Entry>> {
    let output = Command::new(binary)
        .arg("l") // List
        .arg("-slt") // Technical listing format (key=value)
        .arg("-ba") // Bare output (no headers)
        .arg("-scsUTF-8") // Force UTF-8 charset for filenames
        .arg(archive_path)
        .output()
        .with_context(|| format!("Failed to run 7z list on {}", archive_path.display()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("7z list failed for {}: {}", archive_path.display(), stderr.trim());
    }

    parse_7z_list(&output.stdout)
}

fn entry_from_fields(fields: &HashMap<String, String>) -> Option<Entry> {
    let path = fields.get("Path").filter(|p| !p.is_empty())?;
    let is_dir = fields.get("Folder").map(|v| v == "+").unwrap_or(false);
    let size = fields.get("Size").and_then(|s| s.parse::<u64>().ok());
    let mtime = fields
        .get("Modified")
        .and_then(|m| NaiveDateTime::parse_from_str(m.split('.').next()?, "%Y-%m-%d %H:%M:%S").ok())
        .map(|dt| dt.and_utc().timestamp());

    Some(Entry {
        name: path.replace('\\', "/"),
        size,
        is_regular: !is_dir,
        // Encrypted members cannot be streamed without a password
        extractable: !is_dir && fields.get("Encrypted").map(|v| v != "+").unwrap_or(true),
        mtime,
    })
}

/// Parse 7z technical listing output into entries.
fn parse_7z_list(output: &[u8]) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    let mut current: HashMap<String, String> = HashMap::new();

    for line in BufReader::new(output).lines() {
        let line = line?;
        let line = line.trim();

        if line.is_empty() {
            entries.extend(entry_from_fields(&current));
            current.clear();
        } else if let Some((key, value)) = line.split_once(" = ") {
            current.insert(key.to_string(), value.to_string());
        }
    }

    // Last entry if no trailing newline
    entries.extend(entry_from_fields(&current));

    Ok(entries)
}

/// One member streamed from `7z e -so`, started on first read.
struct LazyMember<'a> {
    binary: &'a Path,
    archive: &'a Path,
    member: &'a str,
    child: Option<(Child, ChildStdout)>,
    eof: bool,
}

impl<'a> LazyMember<'a> {
    fn new(binary: &'a Path, archive: &'a Path, member: &'a str) -> Self {
        Self {
            binary,
            archive,
            member,
            child: None,
            eof: false,
        }
    }

    fn spawn(&mut self) -> io::Result<()> {
        let mut child = Command::new(self.binary)
            .arg("e")
            .arg("-so") // Write to stdout
            .arg("-bd") // Disable progress indicator
            .arg("-y") // Yes to all
            .arg("-spd") // Disable wildcard matching
            .arg("-scsUTF-8")
            .arg(self.archive)
            .arg(self.member)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("7z stdout not captured"))?;
        self.child = Some((child, stdout));
        Ok(())
    }

    /// Reap the process. A member that was read to the end must have
    /// exited cleanly.
    fn finish(mut self) -> Result<()> {
        let Some((mut child, stdout)) = self.child.take() else {
            return Ok(());
        };
        drop(stdout);

        if !self.eof {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(());
        }

        let status = child.wait()?;
        if !status.success() {
            bail!(
                "7z extraction failed for '{}' in {}",
                self.member,
                self.archive.display()
            );
        }
        Ok(())
    }
}

impl Read for LazyMember<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.child.is_none() {
            self.spawn()?;
        }
        let Some((_, stdout)) = self.child.as_mut() else {
            return Ok(0);
        };

        let n = stdout.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.eof = true;
        }
        Ok(n)
    }
}

impl Drop for LazyMember<'_> {
    fn drop(&mut self) {
        if let Some((mut child, _)) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_parse_7z_list() {
        let sample = b"\
Path = test.txt
Folder = -
Size = 1234
Modified = 2001-02-03 04:05:06.1234567
Attributes = ....A

Path = subdir\\file.bin
Folder = -
Size = 5678
Encrypted = +
Attributes = ....A

Path = subdir
Folder = +
Size = 0
Attributes = D....
";
        let entries = parse_7z_list(sample).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].name, "test.txt");
        assert_eq!(entries[0].size, Some(1234));
        assert_eq!(entries[0].mtime, Some(981_173_106));
        assert!(entries[0].extractable);

        assert_eq!(entries[1].name, "subdir/file.bin");
        assert!(!entries[1].extractable);

        assert!(!entries[2].is_regular);
    }

    #[test]
    fn test_walk_zip_with_7z() -> Result<()> {
        // Skip if 7z not available
        if get_7z_path().is_err() {
            return Ok(());
        }

        let dir = tempdir()?;
        let zip_path = dir.path().join("test.zip");
        {
            let file = std::fs::File::create(&zip_path)?;
            let mut zip = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();

            zip.start_file("Data/test.txt", options)?;
            zip.write_all(b"test content")?;
            zip.start_file("other.txt", options)?;
            zip.write_all(b"unread")?;
            zip.finish()?;
        }

        let mut decoder = SevenZipDecoder::open(&zip_path)?;
        let mut content = String::new();
        decoder.walk(&mut |entry, reader| {
            if entry.name == "Data/test.txt" {
                reader.read_to_string(&mut content)?;
            }
            Ok(Flow::Continue)
        })?;
        assert_eq!(content, "test content");
        Ok(())
    }
}
