//! Resolver
//!
//! Given a game description and a pile of candidate files, work out which
//! wanted files are present, which can be downloaded, and which can be
//! unpacked from something else that is present.
//!
//! All state lives in a [`Session`]. Every operation takes `&mut self`, so
//! writes to the session are single-writer and a provider's decoder is
//! dispatched at most once (`unpack_tried` is checked and set under that
//! exclusive borrow).

mod fill;
mod gap;
mod identify;
mod report;
mod session;
mod unpack;


pub use fill::FillResult;
pub use report::{AssemblyPlan, PackageVerdict, PlannedFile, ResolutionReport};
pub use session::{Diagnostic, Expected, Session};

use crate::archive::{BuiltinDecoders, DecoderRegistry};
use crate::cancel::CancelToken;
use crate::config::ResolveConfig;
use crate::download::{Downloader, HttpDownloader, MirrorSelector};
use crate::hash::ProgressCallback;
use crate::model::{GameData, IdentificationIndex};
use crate::scan;

use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info, warn};

pub struct Resolver {
    game: GameData,
    index: IdentificationIndex,
    session: Session,
    decoders: Box<dyn DecoderRegistry>,
    downloader: Box<dyn Downloader>,
    mirrors: MirrorSelector,
    progress: Option<Box<ProgressCallback>>,
}

impl Resolver {
    /// Resolver with the built-in decoders and a random mirror order
    pub fn new(game: GameData, session: Session, downloader: Box<dyn Downloader>) -> Self {
        let index = IdentificationIndex::build(&game);
        Self {
            game,
            index,
            session,
            decoders: Box::new(BuiltinDecoders),
            downloader,
            mirrors: MirrorSelector::default(),
            progress: None,
        }
    }

    /// Resolver for a validated run configuration
    pub fn from_config(game: GameData, config: &ResolveConfig) -> Result<Self> {
        let session = Session::new(config.scratch_dir.as_deref(), config.download_dir.clone())?;
        let downloader = HttpDownloader::new(&config.user_agent, config.timeout)?;
        let mirrors = MirrorSelector::new(config.mirror_seed, config.preferred_mirror.clone());
        Ok(Self::new(game, session, Box::new(downloader)).with_mirrors(mirrors))
    }

    pub fn with_decoders(mut self, decoders: Box<dyn DecoderRegistry>) -> Self {
        self.decoders = decoders;
        self
    }

    pub fn with_mirrors(mut self, mirrors: MirrorSelector) -> Self {
        self.mirrors = mirrors;
        self
    }

    /// Report bytes processed while hashing, copying or downloading
    pub fn with_progress(mut self, progress: Box<ProgressCallback>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn game(&self) -> &GameData {
        &self.game
    }

    pub fn index(&self) -> &IdentificationIndex {
        &self.index
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Token that cancels this resolver's work from another thread
    pub fn cancel_token(&self) -> CancelToken {
        self.session.cancel.clone()
    }

    /// Identify every file under `paths`.
    ///
    /// Operator-named files are hashed up front on the rayon pool;
    /// identification itself runs in order on this thread. Returns how many
    /// files were identified.
    pub fn scan(&mut self, paths: &[PathBuf]) -> Result<usize> {
        let mut candidates = Vec::new();
        for path in paths {
            match scan::iterate(path) {
                Ok(found) => candidates.extend(found),
                Err(e) => warn!("{:#}", e),
            }
        }
        debug!("{} candidate files", candidates.len());

        let prehashed = scan::prehash(&candidates, &self.session.cancel);
        self.session.remember_hashes(prehashed);

        let mut identified = 0;
        for candidate in &candidates {
            match self.identify(&candidate.path, candidate.explicit) {
                Ok(Some(_)) => identified += 1,
                Ok(None) => {}
                Err(e) if gap::is_cancelled(&e) => return Err(e),
                Err(e) => warn!("Skipping {}: {:#}", candidate.path.display(), e),
            }
        }

        info!("Identified {} of {} files", identified, candidates.len());
        Ok(identified)
    }
}
