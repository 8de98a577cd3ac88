//! Multi-digest hashing engine.
//!
//! Streams bytes through MD5, SHA1 and SHA256 in a single pass, optionally
//! teeing them into a destination and reporting progress. Everything that
//! reads file content (identification, extraction, downloads) goes through
//! [`hash_stream`] so a file is never read twice.

use crate::cancel::CancelToken;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Read buffer size for streaming
const BUFFER_SIZE: usize = 1024 * 1024;

/// Minimum delay between two progress callbacks
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Progress callback: (bytes done, total bytes if known)
pub type ProgressCallback = dyn Fn(u64, Option<u64>) + Send + Sync;

/// Digest algorithms the engine computes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub const ALL: [DigestAlgorithm; 3] = [Self::Md5, Self::Sha1, Self::Sha256];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }

    /// Length of the lowercase hex encoding
    pub fn hex_len(&self) -> usize {
        match self {
            Self::Md5 => 32,
            Self::Sha1 => 40,
            Self::Sha256 => 64,
        }
    }

    /// Whether `value` is a well-formed hex digest for this algorithm.
    pub fn is_valid_hex(&self, value: &str) -> bool {
        value.len() == self.hex_len() && value.chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Matching two digest sets that share no algorithm is undefined.
#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error("cannot compare digests: no algorithm in common ({left} vs {right})")]
    NoCommonAlgorithm { left: String, right: String },
}

/// A set of hex digests, each optional.
///
/// Observed files always carry all three. Wanted files may carry
/// any subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashedFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

impl HashedFile {
    pub fn get(&self, algorithm: DigestAlgorithm) -> Option<&str> {
        match algorithm {
            DigestAlgorithm::Md5 => self.md5.as_deref(),
            DigestAlgorithm::Sha1 => self.sha1.as_deref(),
            DigestAlgorithm::Sha256 => self.sha256.as_deref(),
        }
    }

    pub(crate) fn slot_mut(&mut self, algorithm: DigestAlgorithm) -> &mut Option<String> {
        match algorithm {
            DigestAlgorithm::Md5 => &mut self.md5,
            DigestAlgorithm::Sha1 => &mut self.sha1,
            DigestAlgorithm::Sha256 => &mut self.sha256,
        }
    }

    pub fn is_empty(&self) -> bool {
        DigestAlgorithm::ALL.iter().all(|alg| self.get(*alg).is_none())
    }

    /// Present (algorithm, digest) pairs
    pub fn iter(&self) -> impl Iterator<Item = (DigestAlgorithm, &str)> + '_ {
        DigestAlgorithm::ALL
            .into_iter()
            .filter_map(move |alg| self.get(alg).map(|value| (alg, value)))
    }

    /// Compare every digest present on both sides.
    ///
    /// Returns `Ok(true)` when all shared digests agree, `Ok(false)` on any
    /// disagreement, and an error when the two sets share no algorithm.
    pub fn matches(&self, other: &HashedFile) -> Result<bool, MatchError> {
        let mut compared = false;

        for alg in DigestAlgorithm::ALL {
            if let (Some(ours), Some(theirs)) = (self.get(alg), other.get(alg)) {
                compared = true;
                if !ours.eq_ignore_ascii_case(theirs) {
                    return Ok(false);
                }
            }
        }

        if compared {
            Ok(true)
        } else {
            Err(MatchError::NoCommonAlgorithm {
                left: self.to_string(),
                right: other.to_string(),
            })
        }
    }
}

impl fmt::Display for HashedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(no digests)");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(alg, value)| format!("{}={}", alg, value))
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Incremental hasher feeding all algorithms at once.
pub struct StreamHasher {
    md5: md5::Context,
    sha1: Sha1,
    sha256: Sha256,
    bytes: u64,
}

impl StreamHasher {
    pub fn new() -> Self {
        Self {
            md5: md5::Context::new(),
            sha1: Sha1::new(),
            sha256: Sha256::new(),
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.md5.consume(data);
        self.sha1.update(data);
        self.sha256.update(data);
        self.bytes += data.len() as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn finish(self) -> HashedFile {
        HashedFile {
            md5: Some(format!("{:x}", self.md5.compute())),
            sha1: Some(format!("{:x}", self.sha1.finalize())),
            sha256: Some(format!("{:x}", self.sha256.finalize())),
        }
    }
}

impl Default for StreamHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Optional knobs for a hashing pass
#[derive(Default, Clone, Copy)]
pub struct HashOptions<'a> {
    /// Expected total, passed through to the progress callback
    pub total: Option<u64>,
    pub progress: Option<&'a (dyn Fn(u64, Option<u64>) + Send + Sync + 'a)>,
    pub cancel: Option<&'a CancelToken>,
}

/// Hash a stream, optionally copying every byte into `sink`.
///
/// Returns the digest set and the number of bytes read.
pub fn hash_stream<R: Read>(
    mut reader: R,
    mut sink: Option<&mut dyn Write>,
    options: HashOptions<'_>,
) -> Result<(HashedFile, u64)> {
    let mut hasher = StreamHasher::new();
    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut last_report = Instant::now();

    loop {
        if let Some(cancel) = options.cancel {
            cancel.check()?;
        }

        let bytes_read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("Failed to read stream for hashing"),
        };

        let chunk = &buf[..bytes_read];
        hasher.update(chunk);
        if let Some(sink) = sink.as_mut() {
            sink.write_all(chunk).context("Failed to write hashed stream")?;
        }

        if let Some(progress) = options.progress {
            if last_report.elapsed() >= PROGRESS_INTERVAL {
                progress(hasher.bytes(), options.total);
                last_report = Instant::now();
            }
        }
    }

    if let Some(sink) = sink.as_mut() {
        sink.flush().context("Failed to flush hashed stream")?;
    }

    let bytes = hasher.bytes();
    if let Some(progress) = options.progress {
        progress(bytes, options.total);
    }

    Ok((hasher.finish(), bytes))
}

/// Hash a file on disk.
pub fn hash_file(path: &Path, options: HashOptions<'_>) -> Result<HashedFile> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;
    let reader = BufReader::with_capacity(BUFFER_SIZE, file);

    let (hashes, _) = hash_stream(reader, None, options)
        .with_context(|| format!("Failed to hash {}", path.display()))?;
    Ok(hashes)
}

/// Stream `reader` into a new file at `dest` while hashing it.
///
/// A partially written destination is removed on any failure, cancellation
/// included.
pub fn copy_hashed<R: Read>(
    reader: R,
    dest: &Path,
    options: HashOptions<'_>,
) -> Result<(HashedFile, u64)> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let result = (|| {
        let file = File::create(dest)
            .with_context(|| format!("Failed to create {}", dest.display()))?;
        let mut writer = BufWriter::new(file);
        hash_stream(reader, Some(&mut writer), options)
    })();

    if result.is_err() && dest.exists() {
        let _ = fs::remove_file(dest);
    }

    result
}

/// Reads several files back to back as one stream.
pub struct ConcatReader {
    parts: VecDeque<BufReader<File>>,
}

impl ConcatReader {
    pub fn open(paths: &[PathBuf]) -> Result<Self> {
        let parts = paths
            .iter()
            .map(|path| {
                File::open(path)
                    .map(BufReader::new)
                    .with_context(|| format!("Failed to open part: {}", path.display()))
            })
            .collect::<Result<VecDeque<_>>>()?;
        Ok(Self { parts })
    }
}

impl Read for ConcatReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(current) = self.parts.front_mut() {
            let n = current.read(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }
            self.parts.pop_front();
        }
        Ok(0)
    }
}
