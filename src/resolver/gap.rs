//! Filling gaps: alternatives, downloads and providers.

use super::session::{Diagnostic, Expected};
use super::{FillResult, Resolver};
use crate::cancel::Cancelled;
use crate::hash::HashOptions;
use crate::paths;

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub(crate) fn is_cancelled(error: &anyhow::Error) -> bool {
    error.chain().any(|cause| cause.is::<Cancelled>())
}

impl Resolver {
    /// Try every way of obtaining `name` that has not been ruled out.
    ///
    /// Memoized per session: a found file is `Complete` straight away and an
    /// earlier `Impossible` is returned as is.
    pub fn fill_gap(&mut self, name: &str, allow_download: bool) -> Result<FillResult> {
        if !self.game.files.contains_key(name) {
            bail!("{} is not a file of {}", name, self.game.shortname);
        }
        self.fill(name, allow_download, false)
    }

    /// Like [`fill_gap`](Self::fill_gap) but ignores a cached `Impossible`,
    /// e.g. after more search paths were scanned.
    pub fn fill_gap_recheck(&mut self, name: &str, allow_download: bool) -> Result<FillResult> {
        if !self.game.files.contains_key(name) {
            bail!("{} is not a file of {}", name, self.game.shortname);
        }
        self.fill(name, allow_download, true)
    }

    fn fill(&mut self, name: &str, allow_download: bool, recheck: bool) -> Result<FillResult> {
        self.session.cancel.check()?;

        if self.session.found.contains_key(name) {
            return Ok(FillResult::Complete);
        }
        if !recheck && self.session.status_of(name) == FillResult::Impossible {
            return Ok(FillResult::Impossible);
        }
        if !self.session.resolving.insert(name.to_string()) {
            debug!("{} is already being resolved", name);
            return Ok(FillResult::Impossible);
        }

        let result = self.fill_uncached(name, allow_download, recheck);
        self.session.resolving.remove(name);
        let mut result = result?;

        if result == FillResult::Undetermined {
            result = FillResult::Impossible;
        }
        if result == FillResult::Impossible {
            self.report_unresolved(name);
        }

        self.session.status.insert(name.to_string(), result);
        Ok(result)
    }

    fn fill_uncached(&mut self, name: &str, allow_download: bool, recheck: bool) -> Result<FillResult> {
        let Some(file) = self.game.files.get(name) else {
            return Ok(FillResult::Impossible);
        };
        let alternatives = file.alternatives.clone();
        let download = file.download.clone();
        let expected_size = file.size();

        if !alternatives.is_empty() {
            return self.fill_alternatives(name, &alternatives, allow_download, recheck);
        }

        let mut result = FillResult::Undetermined;

        // Once every mirror has failed, downloading no longer counts
        if let Some(download) = download {
            if !allow_download {
                result = result.join(FillResult::DownloadNeeded);
            } else if self.try_download(name, &download, expected_size)? {
                return Ok(FillResult::Complete);
            }
        }

        result = result.join(self.fill_from_providers(name, allow_download, recheck)?);
        Ok(result)
    }

    fn fill_alternatives(
        &mut self,
        name: &str,
        alternatives: &[String],
        allow_download: bool,
        recheck: bool,
    ) -> Result<FillResult> {
        let use_alternative = |this: &mut Self, alt: &str| {
            if let Some(path) = this.session.found.get(alt).cloned() {
                debug!("{} satisfied by alternative {}", name, alt);
                this.use_file(name, &path);
                true
            } else {
                false
            }
        };

        if alternatives.iter().any(|alt| use_alternative(self, alt)) {
            return Ok(FillResult::Complete);
        }

        // Prefer anything available locally over downloading the first choice
        let mut passes = vec![false];
        if allow_download {
            passes.push(true);
        }

        let mut result = FillResult::Undetermined;
        for download in passes {
            for alt in alternatives {
                let alt_result = self.fill(alt, download, recheck)?;
                result = result.join(alt_result);
                if alt_result.is_complete() && use_alternative(self, alt) {
                    return Ok(FillResult::Complete);
                }
            }
        }

        if result == FillResult::Impossible || result == FillResult::Undetermined {
            for alt in alternatives {
                if let Some(file) = self.game.files.get(alt) {
                    warn!("{}: alternative not found: {}", name, Expected::of(file));
                }
            }
            self.session.diagnostics.push(Diagnostic::NoAlternative {
                name: name.to_string(),
                alternatives: alternatives.to_vec(),
            });
        }
        Ok(result)
    }

    /// Download `name` from the first mirror that delivers the right file.
    fn try_download(
        &mut self,
        name: &str,
        download: &crate::model::Download,
        expected_size: Option<u64>,
    ) -> Result<bool> {
        let urls = self.mirrors.order(download, &self.game.mirror_lists);
        let download_dir = self.session.download_dir();

        let mut attempt = 0;
        for url in urls {
            if self.session.download_failed.contains(&url) {
                continue;
            }
            self.session.cancel.check()?;

            let dest = self.free_download_path(&download_dir, name, &mut attempt);
            info!("Downloading {} from {}", name, url);

            let options = HashOptions {
                total: expected_size,
                progress: self.progress.as_deref(),
                cancel: Some(&self.session.cancel),
            };
            let fetched = self.downloader.fetch(&url, expected_size, &dest, options);

            let error = match fetched {
                Ok(hashes) => {
                    self.session.hashes.insert(dest.clone(), hashes);
                    let identified = self.identify(&dest, true)?;
                    if self.session.found.contains_key(name) {
                        return Ok(true);
                    }
                    if identified.is_none() {
                        let _ = std::fs::remove_file(&dest);
                    }
                    "downloaded file is not the expected one".to_string()
                }
                Err(e) if is_cancelled(&e) => return Err(e),
                Err(e) => format!("{:#}", e),
            };

            warn!("Download of {} from {} failed: {}", name, url, error);
            self.session.download_failed.insert(url.clone());
            self.session.diagnostics.push(Diagnostic::DownloadFailed {
                name: name.to_string(),
                url,
                error,
            });
        }
        Ok(false)
    }

    /// First destination for `name` that no located or rejected file uses.
    /// A rejected earlier attempt may have been identified as something else.
    fn free_download_path(&self, download_dir: &Path, name: &str, attempt: &mut usize) -> PathBuf {
        let relative = paths::sanitize_entry_path(name);
        loop {
            let dest = match *attempt {
                0 => download_dir.join(&relative),
                n => download_dir.join(format!("retry-{}", n)).join(&relative),
            };
            *attempt += 1;

            let in_use = self.session.found.values().any(|p| *p == dest)
                || self.session.unsuitable.values().any(|p| *p == dest);
            if !in_use {
                return dest;
            }
        }
    }

    /// Providers smallest first; the first one that yields `name` wins.
    fn fill_from_providers(&mut self, name: &str, allow_download: bool, recheck: bool) -> Result<FillResult> {
        let mut providers: Vec<(u64, String)> = self
            .index
            .providers_of(name)
            .iter()
            .map(|p| {
                let size = self.game.files.get(p).and_then(|f| f.size()).unwrap_or(u64::MAX);
                (size, p.clone())
            })
            .collect();
        providers.sort();

        let mut result = FillResult::Undetermined;
        for (_, provider) in providers {
            let other_parts = self
                .game
                .files
                .get(&provider)
                .and_then(|f| f.unpack.as_ref())
                .map(|u| u.other_parts.clone())
                .unwrap_or_default();

            let mut available = self.fill(&provider, allow_download, recheck)?;
            for part in &other_parts {
                available = available.meet(self.fill(part, allow_download, recheck)?);
            }

            if available.is_complete() && self.session.unpack_tried.insert(provider.clone()) {
                self.unpack(&provider)?;
            }

            if self.session.found.contains_key(name) {
                return Ok(FillResult::Complete);
            }

            // An available provider that did not yield the file cannot help
            let via_provider = if available.is_complete() {
                FillResult::Impossible
            } else {
                available
            };
            result = result.join(via_provider);
        }
        Ok(result)
    }

    fn report_unresolved(&mut self, name: &str) {
        let Some(file) = self.game.files.get(name) else {
            return;
        };
        // Placeholders already reported their alternatives
        if file.is_placeholder() {
            return;
        }

        let expected = Expected::of(file);
        let already = self
            .session
            .diagnostics
            .iter()
            .any(|d| matches!(d, Diagnostic::Unresolved { expected: e } if e.name == name));
        if !already {
            debug!("Unresolved: {}", expected);
            self.session.diagnostics.push(Diagnostic::Unresolved { expected });
        }
    }
}
