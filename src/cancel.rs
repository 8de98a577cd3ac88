//! Cooperative cancellation for a resolution session.
//!
//! The token is checked between file-level steps and inside hash/copy loops.
//! Long-running work that observes it bails with [`Cancelled`] so callers can
//! tell a cancelled run apart from a real failure via `anyhow::Error::is`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error marker returned when the session was cancelled.
#[derive(Debug, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(token.check().is_err());
    }

    #[test]
    fn test_cancelled_is_downcastable() {
        let err: anyhow::Error = Cancelled.into();
        assert!(err.is::<Cancelled>());
    }
}
