//! Outcome of trying to fill one gap.

use std::fmt;

/// Four-state result lattice.
///
/// Defined values are ordered `Impossible < DownloadNeeded < Complete`.
/// `join` ("any of these holds") takes the best, `meet` ("all of these must
/// hold") takes the worst, and `Undetermined` is the identity of both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum FillResult {
    #[default]
    Undetermined,
    Impossible,
    DownloadNeeded,
    Complete,
}

impl FillResult {
    pub const ALL: [FillResult; 4] = [
        FillResult::Undetermined,
        FillResult::Impossible,
        FillResult::DownloadNeeded,
        FillResult::Complete,
    ];

    fn rank(self) -> Option<u8> {
        match self {
            FillResult::Undetermined => None,
            FillResult::Impossible => Some(0),
            FillResult::DownloadNeeded => Some(1),
            FillResult::Complete => Some(2),
        }
    }

    pub fn join(self, other: FillResult) -> FillResult {
        match (self.rank(), other.rank()) {
            (None, _) => other,
            (_, None) => self,
            (Some(a), Some(b)) => {
                if a >= b {
                    self
                } else {
                    other
                }
            }
        }
    }

    pub fn meet(self, other: FillResult) -> FillResult {
        match (self.rank(), other.rank()) {
            (None, _) => other,
            (_, None) => self,
            (Some(a), Some(b)) => {
                if a <= b {
                    self
                } else {
                    other
                }
            }
        }
    }

    pub fn is_complete(self) -> bool {
        self == FillResult::Complete
    }
}

impl fmt::Display for FillResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FillResult::Undetermined => "undetermined",
            FillResult::Impossible => "impossible",
            FillResult::DownloadNeeded => "download needed",
            FillResult::Complete => "complete",
        })
    }
}
