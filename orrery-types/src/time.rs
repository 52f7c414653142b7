//! Modify-time stamps from the remote authority.
//!
//! The server stamps every entity with the time of its last change;
//! the cache stores the stamp alongside the value and rejects writes
//! carrying an older stamp. A reserved sentinel value marks a write as
//! locally authoritative, skipping the staleness check entirely.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote-authority modify time.
///
/// Ordering is the raw numeric ordering; the sentinel compares below
/// every real stamp but is never subject to the staleness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifyTime(i64);

impl ModifyTime {
    /// Sentinel stamp meaning "write without version check".
    ///
    /// Used for locally authoritative overwrites: the store accepts the
    /// write regardless of what stamp it currently holds.
    pub const UNCHECKED: ModifyTime = ModifyTime(-1);

    /// Creates a stamp from seconds since the epoch.
    #[must_use]
    pub const fn new(raw: i64) -> Self {
        Self(raw)
    }

    /// Returns the raw stamp value.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns true for the version-check-skipping sentinel.
    #[must_use]
    pub const fn is_unchecked(&self) -> bool {
        self.0 == Self::UNCHECKED.0
    }
}

impl fmt::Display for ModifyTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unchecked() {
            write!(f, "unchecked")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<i64> for ModifyTime {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}
