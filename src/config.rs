//! Run configuration
//!
//! Everything one packaging run needs besides the game description itself.

use crate::download::DEFAULT_USER_AGENT;

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

/// Per-URL timeout when neither the caller nor the environment sets one
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 600;

/// Preferred mirror prefix from `GDPACK_MIRROR`
pub fn env_preferred_mirror() -> Option<&'static str> {
    static MIRROR: OnceLock<Option<String>> = OnceLock::new();
    MIRROR
        .get_or_init(|| {
            std::env::var("GDPACK_MIRROR")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        })
        .as_deref()
}

/// Per-URL download timeout, overridable with `GDPACK_DOWNLOAD_TIMEOUT` (seconds)
pub fn default_download_timeout() -> Duration {
    static TIMEOUT: OnceLock<u64> = OnceLock::new();
    Duration::from_secs(*TIMEOUT.get_or_init(|| {
        std::env::var("GDPACK_DOWNLOAD_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|&v| v > 0)
            .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS)
    }))
}

/// Configuration for one resolution run
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    /// Path to the game description (JSON)
    pub game_path: PathBuf,

    /// Files and directories supplied by the operator
    pub search_paths: Vec<PathBuf>,

    /// Also look in Steam libraries and existing install directories
    pub use_default_locations: bool,

    /// Packages (or virtual package names) to resolve; empty means all
    pub packages: Vec<String>,

    /// Fetch freely downloadable files
    pub allow_download: bool,

    /// Where downloads are kept; a session temp directory when unset
    pub download_dir: Option<PathBuf>,

    /// Parent of the session's temporary extraction directory
    pub scratch_dir: Option<PathBuf>,

    /// Per-URL download timeout
    pub timeout: Duration,

    pub user_agent: String,

    /// URL prefix tried before any other mirror
    pub preferred_mirror: Option<String>,

    /// Fixed seed for mirror ordering
    pub mirror_seed: Option<u64>,
}

impl ResolveConfig {
    pub fn new(game_path: impl Into<PathBuf>) -> Self {
        Self {
            game_path: game_path.into(),
            search_paths: Vec::new(),
            use_default_locations: true,
            packages: Vec::new(),
            allow_download: false,
            download_dir: None,
            scratch_dir: None,
            timeout: default_download_timeout(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            preferred_mirror: env_preferred_mirror().map(str::to_string),
            mirror_seed: None,
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.game_path.is_file() {
            return Err(ConfigError::GameNotFound(self.game_path.clone()));
        }

        if let Some(missing) = self.search_paths.iter().find(|p| !p.exists()) {
            return Err(ConfigError::SearchPathNotFound(missing.clone()));
        }

        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        if let Some(mirror) = &self.preferred_mirror {
            if !(mirror.starts_with("http://") || mirror.starts_with("https://")) {
                return Err(ConfigError::InvalidMirror(mirror.clone()));
            }
        }

        if let Some(dir) = self.download_dir.as_ref().filter(|d| d.exists() && !d.is_dir()) {
            return Err(ConfigError::NotADirectory(dir.clone()));
        }

        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Game description not found: {0}")]
    GameNotFound(PathBuf),

    #[error("Search path not found: {0}")]
    SearchPathNotFound(PathBuf),

    #[error("Download timeout must be greater than zero")]
    ZeroTimeout,

    #[error("Preferred mirror must be an http(s) URL: {0}")]
    InvalidMirror(String),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_validate() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let game = dir.path().join("quake.json");

        let config = ResolveConfig::new(&game);
        assert!(matches!(config.validate(), Err(ConfigError::GameNotFound(_))));

        fs::write(&game, "{}")?;
        let mut config = ResolveConfig::new(&game);
        config.preferred_mirror = None;
        config.validate()?;

        config.search_paths.push(dir.path().join("cdrom"));
        assert!(matches!(config.validate(), Err(ConfigError::SearchPathNotFound(_))));
        config.search_paths.clear();

        config.timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));
        config.timeout = Duration::from_secs(5);

        config.preferred_mirror = Some("ftp://mirror".into());
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMirror(_))));
        Ok(())
    }

    #[test]
    fn test_defaults() {
        let config = ResolveConfig::new("game.json");
        assert!(config.use_default_locations);
        assert!(!config.allow_download);
        assert!(config.user_agent.starts_with("gdpack/"));
        assert!(!config.timeout.is_zero());
    }
}
