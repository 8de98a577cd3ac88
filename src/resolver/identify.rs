//! Matching observed files against wanted files.

use super::session::{Diagnostic, Expected};
use super::{FillResult, Resolver};
use crate::hash::HashedFile;

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// How an observed file relates to one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fit {
    /// Digests agree (and size, if declared)
    Confirmed,
    /// Size agrees; the candidate declares no digests
    SizeOnly,
    /// The candidate declares no content data at all
    NameOnly,
    Contradicted,
}

struct Observation {
    path: PathBuf,
    size: u64,
    hashes: Option<HashedFile>,
}

enum RuleOutcome {
    Unique(String),
    Ambiguous(Vec<String>),
    Nothing,
}

impl Resolver {
    /// Work out which wanted file `path` is and record it as found.
    ///
    /// Explicit paths (named by the operator) are hashed straight away;
    /// discovered ones only once some candidate needs a digest comparison.
    /// Returns the identified name. An unsuitable file is identified but
    /// never recorded as found.
    pub fn identify(&mut self, path: &Path, explicit: bool) -> Result<Option<String>> {
        self.session.cancel.check()?;

        let metadata =
            fs::metadata(path).with_context(|| format!("Cannot access {}", path.display()))?;
        if !metadata.is_file() {
            return Ok(None);
        }

        let mut obs = Observation {
            path: path.to_path_buf(),
            size: metadata.len(),
            hashes: None,
        };
        if explicit || self.session.hashes.contains_key(path) {
            obs.hashes = Some(self.observed_hashes(path, obs.size)?);
        }

        let path_text = path.to_string_lossy();
        let by_name = self.index.candidates_for_path(&path_text);
        let by_size = self.index.candidates_by_size(obs.size).clone();

        if by_name.is_empty() && by_size.is_empty() && obs.hashes.is_none() {
            return Ok(None);
        }

        let mut ambiguous: BTreeSet<String> = BTreeSet::new();
        let mut winner = None;

        // Name, then size, then digest
        for rule in 0..3 {
            let outcome = match rule {
                0 => self.name_rule(&by_name, &mut obs)?,
                1 => self.size_rule(&by_size, &mut obs)?,
                _ => self.digest_rule(&mut obs)?,
            };
            match outcome {
                RuleOutcome::Unique(name) => {
                    winner = Some(name);
                    break;
                }
                RuleOutcome::Ambiguous(names) => ambiguous.extend(names),
                RuleOutcome::Nothing => {}
            }
        }

        let Some(winner) = winner else {
            self.report_no_match(&obs, &by_name, &by_size, ambiguous);
            return Ok(None);
        };

        let unsuitable = self
            .game
            .files
            .get(&winner)
            .and_then(|f| f.unsuitable.clone());
        if let Some(reason) = unsuitable {
            warn!(
                "{} is {}, which is unsuitable: {}",
                path.display(),
                winner,
                reason
            );
            self.session.unsuitable.insert(winner.clone(), obs.path.clone());
            self.session.diagnostics.push(Diagnostic::Unsuitable {
                path: obs.path.clone(),
                name: winner.clone(),
                reason,
            });
            return Ok(Some(winner));
        }

        self.use_file(&winner, path);
        self.use_duplicates(&winner, &mut obs)?;
        Ok(Some(winner))
    }

    /// Record `path` as the located copy of `name`. The first copy wins.
    pub fn use_file(&mut self, name: &str, path: &Path) {
        if !self.session.found.contains_key(name) {
            info!("Found {} at {}", name, path.display());
            self.session
                .found
                .insert(name.to_string(), path.to_path_buf());
        }
        self.session
            .status
            .insert(name.to_string(), FillResult::Complete);
    }

    /// Digests of a located file, computed once per path
    pub(crate) fn observed_hashes(&mut self, path: &Path, size: u64) -> Result<HashedFile> {
        if let Some(hashes) = self.session.hashes.get(path) {
            return Ok(hashes.clone());
        }

        let options = crate::hash::HashOptions {
            total: Some(size),
            progress: self.progress.as_deref(),
            cancel: Some(&self.session.cancel),
        };
        let hashes = crate::hash::hash_file(path, options)?;
        self.session
            .hashes
            .insert(path.to_path_buf(), hashes.clone());
        Ok(hashes)
    }

    fn fit(&mut self, name: &str, obs: &mut Observation) -> Result<Fit> {
        let Some(file) = self.game.files.get(name) else {
            return Ok(Fit::Contradicted);
        };
        let size = file.size();
        let digests = file.digests().clone();

        if size.is_some_and(|s| s != obs.size) {
            return Ok(Fit::Contradicted);
        }

        if digests.is_empty() {
            return Ok(if size.is_some() {
                Fit::SizeOnly
            } else {
                Fit::NameOnly
            });
        }

        let observed = match &obs.hashes {
            Some(hashes) => hashes.clone(),
            None => {
                let hashes = self.observed_hashes(&obs.path, obs.size)?;
                obs.hashes = Some(hashes.clone());
                hashes
            }
        };

        match digests.matches(&observed) {
            Ok(true) => Ok(Fit::Confirmed),
            Ok(false) => Ok(Fit::Contradicted),
            Err(e) => {
                warn!("{}: {}", name, e);
                Ok(Fit::Contradicted)
            }
        }
    }

    fn settle(&self, survivors: Vec<(String, Fit)>) -> RuleOutcome {
        match survivors.len() {
            0 => RuleOutcome::Nothing,
            1 => RuleOutcome::Unique(survivors[0].0.clone()),
            // Identical content declared under several names: take the first,
            // the rest are filled as duplicates
            _ if survivors.iter().all(|(_, fit)| *fit == Fit::Confirmed) => {
                RuleOutcome::Unique(survivors[0].0.clone())
            }
            _ => RuleOutcome::Ambiguous(survivors.into_iter().map(|(name, _)| name).collect()),
        }
    }

    fn name_rule(&mut self, by_name: &BTreeSet<String>, obs: &mut Observation) -> Result<RuleOutcome> {
        let mut survivors = Vec::new();
        for name in by_name {
            let fit = self.fit(name, obs)?;
            let distinctive = self
                .game
                .files
                .get(name)
                .is_some_and(|f| f.distinctive_name);

            let accepted = match fit {
                Fit::Confirmed | Fit::SizeOnly => true,
                Fit::NameOnly => distinctive,
                Fit::Contradicted => false,
            };
            if accepted {
                survivors.push((name.clone(), fit));
            }
        }
        Ok(self.settle(survivors))
    }

    fn size_rule(&mut self, by_size: &BTreeSet<String>, obs: &mut Observation) -> Result<RuleOutcome> {
        let mut survivors = Vec::new();
        for name in by_size {
            // A size alone is too weak without a digest to back it
            if self.fit(name, obs)? == Fit::Confirmed {
                survivors.push((name.clone(), Fit::Confirmed));
            }
        }
        Ok(self.settle(survivors))
    }

    fn digest_rule(&mut self, obs: &mut Observation) -> Result<RuleOutcome> {
        let hashes = match &obs.hashes {
            Some(hashes) => hashes.clone(),
            None => {
                let hashes = self.observed_hashes(&obs.path, obs.size)?;
                obs.hashes = Some(hashes.clone());
                hashes
            }
        };

        let mut by_digest = BTreeSet::new();
        for (algorithm, value) in hashes.iter() {
            by_digest.extend(self.index.candidates_by_digest(algorithm, value).iter().cloned());
        }

        let mut survivors = Vec::new();
        for name in by_digest {
            if self.fit(&name, obs)? == Fit::Confirmed {
                survivors.push((name, Fit::Confirmed));
            }
        }
        Ok(self.settle(survivors))
    }

    /// Every other wanted file with exactly this content is satisfied too.
    fn use_duplicates(&mut self, winner: &str, obs: &mut Observation) -> Result<()> {
        let hashes = match &obs.hashes {
            Some(hashes) => hashes.clone(),
            None => {
                let hashes = self.observed_hashes(&obs.path, obs.size)?;
                obs.hashes = Some(hashes.clone());
                hashes
            }
        };

        let mut duplicates = BTreeSet::new();
        for (algorithm, value) in hashes.iter() {
            for name in self.index.candidates_by_digest(algorithm, value) {
                if name != winner && !self.session.found.contains_key(name) {
                    duplicates.insert(name.clone());
                }
            }
        }

        for name in duplicates {
            let suitable = self
                .game
                .files
                .get(&name)
                .is_some_and(|f| f.unsuitable.is_none());
            if suitable && self.fit(&name, obs)? == Fit::Confirmed {
                debug!("{} is also {}", winner, name);
                self.use_file(&name, &obs.path);
            }
        }
        Ok(())
    }

    fn report_no_match(
        &mut self,
        obs: &Observation,
        by_name: &BTreeSet<String>,
        by_size: &BTreeSet<String>,
        ambiguous: BTreeSet<String>,
    ) {
        // Name matches, plus size matches that were actually compared by digest
        let considered: BTreeSet<String> = if ambiguous.is_empty() {
            by_name
                .iter()
                .filter(|name| {
                    self.game
                        .files
                        .get(*name)
                        .is_some_and(|f| f.distinctive_name || f.has_content_data())
                })
                .chain(by_size.iter().filter(|name| {
                    self.game
                        .files
                        .get(*name)
                        .is_some_and(|f| !f.digests().is_empty())
                }))
                .cloned()
                .collect()
        } else {
            ambiguous
        };

        let mut expected: Vec<Expected> = considered
            .iter()
            .filter_map(|name| self.game.files.get(name))
            .map(Expected::of)
            .collect();

        let diagnostic = match expected.len() {
            0 => return,
            1 => Diagnostic::Mismatch {
                path: obs.path.clone(),
                size: obs.size,
                observed: obs.hashes.clone(),
                expected: expected.remove(0),
            },
            _ => Diagnostic::Ambiguous {
                path: obs.path.clone(),
                size: obs.size,
                observed: obs.hashes.clone(),
                candidates: expected,
            },
        };
        warn!("{}", diagnostic);
        self.session.diagnostics.push(diagnostic);
    }
}
