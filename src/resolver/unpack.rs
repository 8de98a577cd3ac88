//! Extracting wanted files from an available provider.

use super::gap::is_cancelled;
use super::session::Diagnostic;
use super::Resolver;
use crate::archive::{missing_tool, DecodeError, DecodeRequest, Decoder, Entry, Flow};
use crate::hash::{self, HashOptions};
use crate::paths;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

impl Resolver {
    /// Hand a located provider to its decoder, once, and identify every
    /// entry that looks like something it provides.
    ///
    /// A missing external tool or a broken container is recorded and
    /// otherwise ignored; only cancellation is an error.
    pub(crate) fn unpack(&mut self, provider: &str) -> Result<()> {
        let Some(file) = self.game.files.get(provider) else {
            return Ok(());
        };
        let Some(directive) = file.unpack.clone() else {
            debug!("{} provides files but has no unpack directive", provider);
            return Ok(());
        };
        let Some(path) = self.session.found.get(provider).cloned() else {
            return Ok(());
        };
        let provides: Vec<String> = self.game.expand(&file.provides).into_iter().collect();

        let other_parts: Vec<_> = directive
            .other_parts
            .iter()
            .filter_map(|part| self.session.found.get(part).cloned())
            .collect();
        if other_parts.len() != directive.other_parts.len() {
            self.session.diagnostics.push(Diagnostic::UnpackFailed {
                provider: provider.to_string(),
                error: format!("missing parts: {}", directive.other_parts.join(", ")),
            });
            return Ok(());
        }

        let mut request =
            DecodeRequest::new(&directive.format, &path, self.session.unpack_dir(provider));
        request.skip = directive.skip.unwrap_or(0);
        request.other_parts = other_parts;
        request.provides = provides;

        info!("Unpacking {} ({})", provider, directive.format);
        let outcome = match self.decoders.open(&request) {
            Ok(mut decoder) => self.walk_provider(provider, &request, decoder.as_mut()),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => Ok(()),
            Err(e) if is_cancelled(&e) => Err(e),
            Err(e) => {
                if let Some(DecodeError::MissingTool { format, tool }) = missing_tool(&e) {
                    warn!("Skipping {}: {}", provider, e);
                    self.session
                        .missing_tools
                        .insert((format.clone(), tool.clone()));
                } else {
                    warn!("Could not unpack {}: {:#}", provider, e);
                    self.session.diagnostics.push(Diagnostic::UnpackFailed {
                        provider: provider.to_string(),
                        error: format!("{:#}", e),
                    });
                }
                Ok(())
            }
        }
    }

    fn walk_provider(
        &mut self,
        provider: &str,
        request: &DecodeRequest,
        decoder: &mut dyn Decoder,
    ) -> Result<()> {
        let root = &request.scratch;

        decoder.walk(&mut |entry, reader| {
            self.session.cancel.check()?;
            if !entry.is_regular || !entry.extractable || !self.wants_entry(&request.provides, entry) {
                return Ok(Flow::Continue);
            }

            let dest = root.join(paths::sanitize_entry_path(&entry.name));
            let options = HashOptions {
                total: entry.size,
                progress: self.progress.as_deref(),
                cancel: Some(&self.session.cancel),
            };
            let (hashes, _) = hash::copy_hashed(reader, &dest, options)
                .with_context(|| format!("Failed to extract {} from {}", entry.name, provider))?;
            self.session.hashes.insert(dest.clone(), hashes);

            if self.identify(&dest, false)?.is_none() {
                debug!("{} in {} is not a wanted file", entry.name, provider);
            }

            let done = request.provides.iter().all(|name| {
                self.session.found.contains_key(name) || self.session.unsuitable.contains_key(name)
            });
            Ok(if done { Flow::Stop } else { Flow::Continue })
        })
    }

    /// Could `entry` be one of the still-missing files in `provides`?
    ///
    /// The name must match a look-for pattern, or the size must match a file
    /// whose digests will settle it. A recorded size must never disagree.
    fn wants_entry(&self, provides: &[String], entry: &Entry) -> bool {
        provides
            .iter()
            .filter(|name| !self.session.found.contains_key(*name))
            .filter_map(|name| self.game.files.get(name))
            .any(|file| {
                let size_ok = match (file.size(), entry.size) {
                    (Some(expected), Some(actual)) => expected == actual,
                    _ => true,
                };
                let name_ok = file
                    .look_for
                    .iter()
                    .any(|pattern| paths::matches_look_for(&entry.name, pattern));
                let digest_ok = file.size().is_some()
                    && file.size() == entry.size
                    && !file.digests().is_empty();

                size_ok && (name_ok || digest_ok)
            })
    }
}
