//! Archive decoders.
//!
//! Every container format the game descriptions mention is exposed through
//! one contract: walk the entries in order and get a byte stream for each.
//! Natively supported:
//!
//! - ZIP (zip crate)
//! - tar, tar.gz (tar + flate2)
//! - Unreal `.umod` packages (binrw footer)
//!
//! Everything else goes through external tools found on `PATH`: `7zz`/`7z`
//! (listed, then streamed one entry at a time), `bzip2`/`xz` feeding the tar
//! reader, and installers that can only extract everything at once
//! (`unrar`, `innoextract`, `cabextract`, `unshield`, `lha`, `arj`).
//!
//! Single-output transforms (`cat`, `dos2unix`, `xdelta`) are decoders that
//! yield exactly one entry named after the file they provide.
//!
//! A missing external tool is reported as [`DecodeError::MissingTool`] so
//! callers can skip that provider instead of failing the run.

pub mod external;
pub mod sevenzip;
pub mod tarball;
pub mod transform;
pub mod umod;
pub mod zipfile;

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// One member of a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// Path inside the container, as stored
    pub name: String,
    /// Uncompressed size when the container records it
    pub size: Option<u64>,
    pub is_regular: bool,
    /// False for members the decoder can list but not produce
    pub extractable: bool,
    /// Unix modification time
    pub mtime: Option<i64>,
}

impl Entry {
    pub fn file(name: impl Into<String>, size: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size,
            is_regular: true,
            extractable: true,
            mtime: None,
        }
    }
}

/// Whether a walk should keep going after the current entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// Visitor receiving each entry together with its content stream.
///
/// The stream is only valid during the call. Decoders that have to spawn a
/// process per member do so lazily, on the first read.
pub type Visit<'a> = dyn FnMut(&Entry, &mut dyn Read) -> Result<Flow> + 'a;

/// A container opened for reading
pub trait Decoder {
    fn walk(&mut self, visit: &mut Visit<'_>) -> Result<()>;

    /// Entry listing without reading any content
    fn entries(&mut self) -> Result<Vec<Entry>> {
        let mut out = Vec::new();
        self.walk(&mut |entry, _| {
            out.push(entry.clone());
            Ok(Flow::Continue)
        })?;
        Ok(out)
    }
}

/// Recoverable decoder failures
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("'{tool}' is required to unpack {format} archives but was not found")]
    MissingTool { format: String, tool: String },

    #[error("unknown unpack format '{0}'")]
    UnknownFormat(String),

    #[error("{format} cannot start {skip} bytes into the file")]
    SkipUnsupported { format: String, skip: u64 },

    #[error("{format} produces exactly one file, but {provider} provides {count}")]
    SingleOutput {
        format: String,
        provider: String,
        count: usize,
    },
}

/// Everything a decoder needs to open one provider
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub format: String,
    pub path: PathBuf,
    /// Bytes of shell/installer stub before the container
    pub skip: u64,
    /// Located paths of the directive's `other_parts`, in order
    pub other_parts: Vec<PathBuf>,
    /// Names the provider provides, expanded to files
    pub provides: Vec<String>,
    /// Session-owned directory decoders may extract into
    pub scratch: PathBuf,
}

impl DecodeRequest {
    pub fn new(format: impl Into<String>, path: impl Into<PathBuf>, scratch: impl Into<PathBuf>) -> Self {
        Self {
            format: format.into(),
            path: path.into(),
            skip: 0,
            other_parts: Vec::new(),
            provides: Vec::new(),
            scratch: scratch.into(),
        }
    }

    fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Formats that can read a container placed behind an installer stub
pub fn supports_skip(format: &str) -> bool {
    matches!(
        format.to_ascii_lowercase().as_str(),
        "zip" | "tar" | "tar.gz" | "tgz" | "tar.bz2" | "tbz2" | "tar.xz" | "txz"
    )
}

/// Opens decoders by format name. Tests substitute instrumented registries.
pub trait DecoderRegistry {
    fn open(&self, request: &DecodeRequest) -> Result<Box<dyn Decoder>>;
}

/// The decoders shipped with the crate
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinDecoders;

impl DecoderRegistry for BuiltinDecoders {
    fn open(&self, request: &DecodeRequest) -> Result<Box<dyn Decoder>> {
        let format = request.format.to_ascii_lowercase();
        if request.skip > 0 && !supports_skip(&format) {
            return Err(DecodeError::SkipUnsupported {
                format: request.format.clone(),
                skip: request.skip,
            }
            .into());
        }

        let decoder: Box<dyn Decoder> = match format.as_str() {
            "zip" => Box::new(zipfile::ZipDecoder::open(&request.path, request.skip)?),
            "tar" => Box::new(tarball::TarDecoder::new(&request.path, request.skip, tarball::Compression::None)),
            "tar.gz" | "tgz" => {
                Box::new(tarball::TarDecoder::new(&request.path, request.skip, tarball::Compression::Gzip))
            }
            "tar.bz2" | "tbz2" => Box::new(tarball::TarDecoder::new(
                &request.path,
                request.skip,
                tarball::Compression::External { format: "tar.bz2", tool: find_tool("tar.bz2", &["bzip2"])? },
            )),
            "tar.xz" | "txz" => Box::new(tarball::TarDecoder::new(
                &request.path,
                request.skip,
                tarball::Compression::External { format: "tar.xz", tool: find_tool("tar.xz", &["xz"])? },
            )),
            "umod" => Box::new(umod::UmodDecoder::open(&request.path)?),
            "7z" => Box::new(sevenzip::SevenZipDecoder::open(&request.path)?),
            "cat" => Box::new(transform::Concatenate::new(request)?),
            "dos2unix" => Box::new(transform::Dos2Unix::new(request)?),
            "xdelta" => Box::new(transform::Xdelta::new(request)?),
            other => match external::ExternalTool::for_format(other) {
                Some(tool) => Box::new(external::ExtractAll::new(tool, request)?),
                None => return Err(DecodeError::UnknownFormat(request.format.clone()).into()),
            },
        };
        Ok(decoder)
    }
}

/// First of `candidates` found on `PATH`
pub fn find_tool(format: &str, candidates: &[&str]) -> Result<PathBuf, DecodeError> {
    candidates
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| DecodeError::MissingTool {
            format: format.to_string(),
            tool: candidates.join("/"),
        })
}

/// Is `error` (or anything in its chain) a missing decoder tool?
pub fn missing_tool(error: &anyhow::Error) -> Option<&DecodeError> {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<DecodeError>())
        .find(|e| matches!(e, DecodeError::MissingTool { .. }))
}

/// A file viewed from `offset` onwards, for containers behind a stub.
pub struct OffsetFile {
    inner: File,
    offset: u64,
}

impl OffsetFile {
    pub fn open(path: &Path, offset: u64) -> Result<Self> {
        let mut inner =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        inner
            .seek(SeekFrom::Start(offset))
            .with_context(|| format!("Failed to skip {} bytes of {}", offset, path.display()))?;
        Ok(Self { inner, offset })
    }

    pub fn into_inner(self) -> File {
        self.inner
    }
}

impl Read for OffsetFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Seek for OffsetFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let absolute = match pos {
            SeekFrom::Start(n) => self.inner.seek(SeekFrom::Start(self.offset + n))?,
            other => self.inner.seek(other)?,
        };
        absolute.checked_sub(self.offset).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of container")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn test_unknown_format() {
        let dir = tempdir().unwrap();
        let request = DecodeRequest::new("floppy", dir.path().join("x"), dir.path());
        let err = BuiltinDecoders.open(&request).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::UnknownFormat(_))
        ));
        assert!(missing_tool(&err).is_none());
    }

    #[test]
    fn test_skip_refused_where_unsupported() {
        let dir = tempdir().unwrap();
        let mut request = DecodeRequest::new("7z", dir.path().join("setup.sh"), dir.path());
        request.skip = 512;
        let err = BuiltinDecoders.open(&request).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<DecodeError>(),
            Some(DecodeError::SkipUnsupported { skip: 512, .. })
        ));

        assert!(supports_skip("TAR.GZ"));
        assert!(!supports_skip("umod"));
    }

    #[test]
    fn test_missing_tool_is_detectable_through_context() {
        let err = find_tool("lha", &["definitely-not-a-real-tool-gdpack"]).unwrap_err();
        let err = anyhow::Error::from(err).context("opening provider");
        assert!(matches!(
            missing_tool(&err),
            Some(DecodeError::MissingTool { tool, .. }) if tool == "definitely-not-a-real-tool-gdpack"
        ));
    }

    #[test]
    fn test_offset_file_hides_stub() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("stub.sh");
        let mut file = File::create(&path)?;
        file.write_all(b"#!/bin/sh\nexit 0\nPAYLOAD")?;
        drop(file);

        let mut reader = OffsetFile::open(&path, 17)?;
        let mut rest = String::new();
        reader.read_to_string(&mut rest)?;
        assert_eq!(rest, "PAYLOAD");

        assert_eq!(reader.seek(SeekFrom::Start(3))?, 3);
        assert_eq!(reader.seek(SeekFrom::End(-1))?, 6);
        Ok(())
    }
}
