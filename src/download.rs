//! Downloads of freely redistributable files (patches, demos, updates).
//!
//! A wanted file's `download` either names URLs directly or a path under a
//! named mirror list. Candidates are ranked (operator-preferred mirror
//! first, then declared URLs, then mirror-list URLs) and shuffled within a
//! rank so load spreads across equivalent mirrors.

use crate::hash::{self, HashOptions, HashedFile};
use crate::model::Download;

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Connection timeout: time to establish TCP connection
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub const DEFAULT_USER_AGENT: &str = concat!("gdpack/", env!("CARGO_PKG_VERSION"));

/// Per-URL failures; the URL is not retried in the same session.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("{url} answered HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("{url} is {actual} bytes, expected {expected}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },
}

/// Fetches one URL into a local file.
pub trait Downloader {
    /// Download `url` to `dest`, hashing on the way.
    ///
    /// When `expected_size` is known, a response announcing or delivering a
    /// different length is rejected and `dest` is removed.
    fn fetch(
        &self,
        url: &str,
        expected_size: Option<u64>,
        dest: &Path,
        options: HashOptions<'_>,
    ) -> Result<HashedFile>;
}

/// Blocking HTTP(S) downloader
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
}

impl HttpDownloader {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }
}

impl Downloader for HttpDownloader {
    fn fetch(
        &self,
        url: &str,
        expected_size: Option<u64>,
        dest: &Path,
        options: HashOptions<'_>,
    ) -> Result<HashedFile> {
        let response = self
            .client
            .get(url)
            .send()
            .with_context(|| format!("Request failed: {}", url))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        if let (Some(expected), Some(announced)) = (expected_size, response.content_length()) {
            if expected != announced {
                return Err(DownloadError::SizeMismatch {
                    url: url.to_string(),
                    expected,
                    actual: announced,
                }
                .into());
            }
        }

        let options = HashOptions {
            total: options.total.or(expected_size).or(response.content_length()),
            ..options
        };
        let (hashes, bytes) = hash::copy_hashed(response, dest, options)
            .with_context(|| format!("Download interrupted: {}", url))?;

        if let Some(expected) = expected_size {
            if bytes != expected {
                let _ = fs::remove_file(dest);
                return Err(DownloadError::SizeMismatch {
                    url: url.to_string(),
                    expected,
                    actual: bytes,
                }
                .into());
            }
        }

        debug!("Downloaded {} ({} bytes)", url, bytes);
        Ok(hashes)
    }
}

/// Preference class of a candidate URL, best first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MirrorRank {
    Preferred,
    Declared,
    MirrorList,
}

/// Orders download candidates.
#[derive(Debug, Clone, Default)]
pub struct MirrorSelector {
    /// Fixed seed for a reproducible order within a rank
    pub seed: Option<u64>,
    /// Operator's mirror: a URL prefix, also used as a base for mirror-list paths
    pub preferred: Option<String>,
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

impl MirrorSelector {
    pub fn new(seed: Option<u64>, preferred: Option<String>) -> Self {
        Self { seed, preferred }
    }

    /// Every candidate URL with its rank, unordered within a rank.
    pub fn candidates(
        &self,
        download: &Download,
        mirror_lists: &BTreeMap<String, Vec<String>>,
    ) -> Vec<(MirrorRank, String)> {
        let preferred = self.preferred.as_deref().filter(|p| !p.is_empty());
        let declared = |url: &String| {
            let rank = match preferred {
                Some(prefix) if url.starts_with(prefix) => MirrorRank::Preferred,
                _ => MirrorRank::Declared,
            };
            (rank, url.clone())
        };

        let mut out: Vec<(MirrorRank, String)> = match download {
            Download::Url(url) => vec![declared(url)],
            Download::Urls(urls) => urls.iter().map(declared).collect(),
            Download::Mirror { mirror_list, path } => {
                let mut urls: Vec<_> = preferred
                    .map(|base| (MirrorRank::Preferred, join_url(base, path)))
                    .into_iter()
                    .collect();
                urls.extend(
                    mirror_lists
                        .get(mirror_list)
                        .into_iter()
                        .flatten()
                        .map(|base| (MirrorRank::MirrorList, join_url(base, path))),
                );
                urls
            }
        };

        let mut seen = std::collections::HashSet::new();
        out.retain(|(_, url)| seen.insert(url.clone()));
        out
    }

    /// Candidate URLs best first, shuffled within each rank.
    pub fn order(
        &self,
        download: &Download,
        mirror_lists: &BTreeMap<String, Vec<String>>,
    ) -> Vec<String> {
        let mut by_rank: BTreeMap<MirrorRank, Vec<String>> = BTreeMap::new();
        for (rank, url) in self.candidates(download, mirror_lists) {
            by_rank.entry(rank).or_default().push(url);
        }

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        by_rank
            .into_values()
            .flat_map(|mut urls| {
                urls.shuffle(&mut rng);
                urls
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;
    use tempfile::tempdir;

    /// Answer a single request on a local port with `response`, then close.
    fn serve_once(response: Vec<u8>) -> Result<(String, thread::JoinHandle<()>)> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/file.bin", listener.local_addr()?);
        let handle = thread::spawn(move || {
            let Ok((mut stream, _)) = listener.accept() else {
                return;
            };
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = stream.write_all(&response);
        });
        Ok((url, handle))
    }

    fn downloader() -> Result<HttpDownloader> {
        HttpDownloader::new(DEFAULT_USER_AGENT, Duration::from_secs(10))
    }

    #[test]
    fn test_fetch_hashes_body() -> Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("file.bin");
        let (url, server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\nConnection: close\r\n\r\nhello".to_vec())?;

        let hashes = downloader()?.fetch(&url, Some(5), &dest, HashOptions::default())?;
        let _ = server.join();

        assert_eq!(fs::read(&dest)?, b"hello");
        assert_eq!(hashes.md5.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        Ok(())
    }

    #[test]
    fn test_fetch_rejects_announced_length() -> Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("file.bin");
        let (url, server) =
            serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nshrt".to_vec())?;

        let err = downloader()?
            .fetch(&url, Some(10), &dest, HashOptions::default())
            .unwrap_err();
        let _ = server.join();

        assert!(matches!(
            err.downcast_ref::<DownloadError>(),
            Some(DownloadError::SizeMismatch { expected: 10, actual: 4, .. })
        ));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn test_fetch_removes_short_body() -> Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("file.bin");
        // No length header: the body ends when the connection closes
        let (url, server) = serve_once(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\nshrt".to_vec())?;

        let err = downloader()?
            .fetch(&url, Some(10), &dest, HashOptions::default())
            .unwrap_err();
        let _ = server.join();

        assert!(matches!(
            err.downcast_ref::<DownloadError>(),
            Some(DownloadError::SizeMismatch { expected: 10, actual: 4, .. })
        ));
        assert!(!dest.exists());
        Ok(())
    }

    #[test]
    fn test_fetch_reports_http_status() -> Result<()> {
        let dir = tempdir()?;
        let dest = dir.path().join("file.bin");
        let (url, server) =
            serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec())?;

        let err = downloader()?
            .fetch(&url, None, &dest, HashOptions::default())
            .unwrap_err();
        let _ = server.join();

        assert!(matches!(
            err.downcast_ref::<DownloadError>(),
            Some(DownloadError::HttpStatus { status: 404, .. })
        ));
        assert!(!dest.exists());
        Ok(())
    }

    fn lists() -> BTreeMap<String, Vec<String>> {
        let mut lists = BTreeMap::new();
        lists.insert(
            "idgames".to_string(),
            vec![
                "https://a.example/idgames".to_string(),
                "https://b.example/idgames/".to_string(),
                "https://c.example/pub/idgames".to_string(),
            ],
        );
        lists
    }

    #[test]
    fn test_mirror_list_expansion() {
        let selector = MirrorSelector::default();
        let download = Download::Mirror {
            mirror_list: "idgames".into(),
            path: "/levels/doom2/a-c/av.zip".into(),
        };
        let candidates = selector.candidates(&download, &lists());
        assert_eq!(candidates.len(), 3);
        assert!(candidates
            .iter()
            .any(|(_, url)| url == "https://b.example/idgames/levels/doom2/a-c/av.zip"));
    }

    #[test]
    fn test_preferred_mirror_first() {
        let selector = MirrorSelector::new(Some(7), Some("https://local.mirror/".into()));
        let download = Download::Mirror {
            mirror_list: "idgames".into(),
            path: "levels/av.zip".into(),
        };
        let order = selector.order(&download, &lists());
        assert_eq!(order[0], "https://local.mirror/levels/av.zip");
        assert_eq!(order.len(), 4);

        let download = Download::Urls(vec![
            "https://x.example/f.zip".into(),
            "https://local.mirror/f.zip".into(),
        ]);
        let order = selector.order(&download, &lists());
        assert_eq!(order[0], "https://local.mirror/f.zip");
    }

    #[test]
    fn test_seeded_order_is_reproducible() {
        let download = Download::Mirror {
            mirror_list: "idgames".into(),
            path: "av.zip".into(),
        };
        let first = MirrorSelector::new(Some(42), None).order(&download, &lists());
        for _ in 0..5 {
            assert_eq!(MirrorSelector::new(Some(42), None).order(&download, &lists()), first);
        }

        let mut sorted = first.clone();
        sorted.sort();
        let mut expected: Vec<_> = MirrorSelector::default()
            .candidates(&download, &lists())
            .into_iter()
            .map(|(_, url)| url)
            .collect();
        expected.sort();
        assert_eq!(sorted, expected);
    }

    #[test]
    fn test_unknown_mirror_list_yields_nothing() {
        let download = Download::Mirror {
            mirror_list: "nope".into(),
            path: "av.zip".into(),
        };
        assert!(MirrorSelector::default().order(&download, &lists()).is_empty());
    }
}
