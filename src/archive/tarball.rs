//! Tarballs, plain or compressed, optionally behind a shell stub.
//!
//! gzip is decoded in-process with flate2; bzip2 and xz are piped through
//! the system decompressor.

use super::{Decoder, Entry, Flow, OffsetFile, Visit};

use anyhow::{bail, Context, Result};
use flate2::read::MultiGzDecoder;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone)]
pub enum Compression {
    None,
    Gzip,
    /// Decompressor invoked as `<tool> -dc` with the container on stdin
    External { format: &'static str, tool: PathBuf },
}

pub struct TarDecoder {
    path: PathBuf,
    skip: u64,
    compression: Compression,
}

impl TarDecoder {
    pub fn new(path: &Path, skip: u64, compression: Compression) -> Self {
        Self {
            path: path.to_path_buf(),
            skip,
            compression,
        }
    }

    fn walk_archive<R: Read>(&self, reader: R, visit: &mut Visit<'_>) -> Result<Flow> {
        let mut archive = tar::Archive::new(reader);
        let entries = archive
            .entries()
            .with_context(|| format!("Failed to read tar: {}", self.path.display()))?;

        for member in entries {
            let mut member =
                member.with_context(|| format!("Corrupt tar entry in {}", self.path.display()))?;
            let header = member.header();
            let entry = Entry {
                name: member.path()?.to_string_lossy().into_owned(),
                size: header.size().ok(),
                is_regular: header.entry_type().is_file(),
                extractable: header.entry_type().is_file(),
                mtime: header.mtime().ok().map(|t| t as i64),
            };

            if visit(&entry, &mut member)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        Ok(Flow::Continue)
    }

    fn spawn_decompressor(&self, tool: &Path) -> Result<Child> {
        let file = OffsetFile::open(&self.path, self.skip)?.into_inner();
        Command::new(tool)
            .arg("-dc")
            .stdin(Stdio::from(file))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", tool.display()))
    }
}

impl Decoder for TarDecoder {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()> {
        match &self.compression {
            Compression::None => {
                let file = OffsetFile::open(&self.path, self.skip)?;
                self.walk_archive(BufReader::new(file), visit)?;
            }
            Compression::Gzip => {
                let file = OffsetFile::open(&self.path, self.skip)?;
                self.walk_archive(MultiGzDecoder::new(BufReader::new(file)), visit)?;
            }
            Compression::External { format, tool } => {
                let mut child = self.spawn_decompressor(tool)?;
                let stdout = child.stdout.take().context("Failed to get decompressor stdout")?;
                let result = self.walk_archive(BufReader::new(stdout), visit);

                if matches!(result, Ok(Flow::Stop) | Err(_)) {
                    // Reader gone; the decompressor would block on a full pipe
                    let _ = child.kill();
                    let _ = child.wait();
                    result?;
                    return Ok(());
                }

                let output = child.wait_with_output()?;
                if !output.status.success() {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    bail!(
                        "{} failed to decompress {} ({}): {}",
                        tool.display(),
                        self.path.display(),
                        format,
                        stderr.trim()
                    );
                }
                debug!("Decompressed {} with {}", self.path.display(), tool.display());
            }
        }
        Ok(())
    }
}
