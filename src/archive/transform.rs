//! Single-output transforms.
//!
//! These turn a provider (plus its `other_parts`) into exactly one file:
//! concatenation of split archives, CRLF to LF conversion of text files, and
//! xdelta patches against a basis file.

use super::{find_tool, DecodeError, DecodeRequest, Decoder, Entry, Visit};
use crate::hash::ConcatReader;

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Name of the single file a transform produces
fn single_output(request: &DecodeRequest) -> Result<String, DecodeError> {
    match request.provides.as_slice() {
        [only] => Ok(only.clone()),
        other => Err(DecodeError::SingleOutput {
            format: request.format.clone(),
            provider: request.display_name(),
            count: other.len(),
        }),
    }
}

/// Provider followed by each of its other parts, back to back.
pub struct Concatenate {
    output: String,
    parts: Vec<PathBuf>,
}

impl Concatenate {
    pub fn new(request: &DecodeRequest) -> Result<Self> {
        let output = single_output(request)?;
        let parts = std::iter::once(request.path.clone())
            .chain(request.other_parts.iter().cloned())
            .collect();
        Ok(Self { output, parts })
    }
}

impl Decoder for Concatenate {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()> {
        let mut total = 0;
        for part in &self.parts {
            total += fs::metadata(part)
                .with_context(|| format!("Missing part: {}", part.display()))?
                .len();
        }

        let mut reader = ConcatReader::open(&self.parts)?;
        visit(&Entry::file(self.output.clone(), Some(total)), &mut reader)?;
        Ok(())
    }
}

/// DOS line endings converted to Unix ones.
pub struct Dos2Unix {
    output: String,
    path: PathBuf,
}

impl Dos2Unix {
    pub fn new(request: &DecodeRequest) -> Result<Self> {
        Ok(Self {
            output: single_output(request)?,
            path: request.path.clone(),
        })
    }
}

impl Decoder for Dos2Unix {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open {}", self.path.display()))?;
        let mut reader = CrlfToLf::new(BufReader::new(file));
        visit(&Entry::file(self.output.clone(), None), &mut reader)?;
        Ok(())
    }
}

/// Drops every CR that is directly followed by LF.
pub struct CrlfToLf<R> {
    inner: R,
    /// CR seen at the end of the previous chunk
    pending_cr: bool,
    out: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> CrlfToLf<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending_cr: false,
            out: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 8192];
        self.out.clear();
        self.pos = 0;

        while self.out.is_empty() && !self.eof {
            let n = self.inner.read(&mut chunk)?;
            if n == 0 {
                self.eof = true;
                if std::mem::take(&mut self.pending_cr) {
                    self.out.push(b'\r');
                }
                break;
            }

            for &b in &chunk[..n] {
                if std::mem::take(&mut self.pending_cr) && b != b'\n' {
                    self.out.push(b'\r');
                }
                if b == b'\r' {
                    self.pending_cr = true;
                } else {
                    self.out.push(b);
                }
            }
        }
        Ok(())
    }
}

impl<R: Read> Read for CrlfToLf<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.out.len() {
            if self.eof {
                return Ok(0);
            }
            self.fill()?;
        }

        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Target rebuilt from a basis file and a VCDIFF patch with `xdelta3`.
pub struct Xdelta {
    output: String,
    binary: PathBuf,
    patch: PathBuf,
    basis: PathBuf,
}

impl Xdelta {
    pub fn new(request: &DecodeRequest) -> Result<Self> {
        let output = single_output(request)?;
        let binary = find_tool("xdelta", &["xdelta3"])?;
        let Some(basis) = request.other_parts.first() else {
            bail!(
                "xdelta patch {} names no basis file in other_parts",
                request.path.display()
            );
        };
        Ok(Self {
            output,
            binary,
            patch: request.path.clone(),
            basis: basis.clone(),
        })
    }
}

impl Decoder for Xdelta {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .arg("-d") // Decode
            .arg("-c") // To stdout
            .arg("-s")
            .arg(&self.basis)
            .arg(&self.patch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        let stdout = child.stdout.take().context("Failed to get xdelta3 stdout")?;
        let mut reader = BufReader::new(stdout);
        let result = visit(&Entry::file(self.output.clone(), None), &mut reader)
            // Unread output would make xdelta3 fail on a closed pipe
            .and_then(|_| Ok(io::copy(&mut reader, &mut io::sink())?));
        drop(reader);

        if result.is_err() {
            let _ = child.kill();
        }
        let output = child.wait_with_output()?;
        result?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "xdelta3 could not apply {} to {}: {}",
                self.patch.display(),
                self.basis.display(),
                stderr.trim()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Flow;
    use tempfile::tempdir;

    fn convert(input: &[u8], chunk: usize) -> Vec<u8> {
        // Force small reads to exercise CRs split across chunk boundaries
        struct Chunked<'a>(&'a [u8], usize);
        impl Read for Chunked<'_> {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let n = self.0.len().min(self.1).min(buf.len());
                buf[..n].copy_from_slice(&self.0[..n]);
                self.0 = &self.0[n..];
                Ok(n)
            }
        }

        let mut out = Vec::new();
        CrlfToLf::new(Chunked(input, chunk)).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_crlf_to_lf() {
        let input = b"line one\r\nline two\r\nbare\rcr\r\n\r";
        for chunk in [1, 2, 3, 7, 1024] {
            assert_eq!(convert(input, chunk), b"line one\nline two\nbare\rcr\n\r", "chunk {}", chunk);
        }
    }

    #[test]
    fn test_single_output_enforced() {
        let dir = tempdir().unwrap();
        let mut request = DecodeRequest::new("cat", dir.path().join("a"), dir.path());
        request.provides = vec!["x".into(), "y".into()];

        let err = Concatenate::new(&request).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::SingleOutput { count: 2, .. })
        ));
    }

    #[test]
    fn test_concatenate_parts() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("game.z01"), b"first-")?;
        fs::write(dir.path().join("game.z02"), b"second")?;

        let mut request = DecodeRequest::new("cat", dir.path().join("game.z01"), dir.path());
        request.other_parts = vec![dir.path().join("game.z02")];
        request.provides = vec!["game.zip".into()];

        let mut decoder = Concatenate::new(&request)?;
        let mut seen = Vec::new();
        decoder.walk(&mut |entry, reader| {
            let mut data = Vec::new();
            reader.read_to_end(&mut data)?;
            seen.push((entry.name.clone(), entry.size, data));
            Ok(Flow::Continue)
        })?;

        assert_eq!(seen, vec![("game.zip".to_string(), Some(12), b"first-second".to_vec())]);
        Ok(())
    }
}
