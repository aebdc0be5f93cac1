use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Ledger time: whole seconds since the UNIX epoch.
///
/// Deadlines, approval and repayment times are all expressed in this unit,
/// matching the block-timestamp resolution of the ledger.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// The zero timestamp (UNIX epoch).
    pub const fn zero() -> Self {
        Self(0)
    }

    /// Wall-clock time, truncated to whole seconds.
    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        Self(secs)
    }

    /// `self + secs`, or `None` on overflow.
    pub fn checked_add_secs(self, secs: u64) -> Option<Self> {
        self.0.checked_add(secs).map(Self)
    }

    pub fn saturating_add_secs(self, secs: u64) -> Self {
        Self(self.0.saturating_add(secs))
    }

    /// Time remaining until `later`, zero if `later` is not in the future.
    pub fn until(self, later: Self) -> Duration {
        Duration::from_secs(later.0.saturating_sub(self.0))
    }

    pub fn is_after(&self, other: &Self) -> bool {
        self > other
    }

    /// RFC 3339 rendering for human-facing output.
    pub fn to_rfc3339(self) -> String {
        i64::try_from(self.0)
            .ok()
            .and_then(|secs| chrono::DateTime::<chrono::Utc>::from_timestamp(secs, 0))
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| format!("@{}", self.0))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}s)", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of ledger time.
///
/// Production code uses [`SystemClock`]; tests and the demo use
/// [`ManualClock`] so deadlines can be crossed without sleeping.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// Manually advanced clock. Clones share the same underlying time.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    secs: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            secs: Arc::new(AtomicU64::new(start.as_secs())),
        }
    }

    pub fn set(&self, to: Timestamp) {
        self.secs.store(to.as_secs(), Ordering::SeqCst);
    }

    /// Move time forward by `secs`, returning the new time.
    pub fn advance(&self, secs: u64) -> Timestamp {
        let prev = self.secs.fetch_add(secs, Ordering::SeqCst);
        Timestamp::from_secs(prev + secs)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_secs(self.secs.load(Ordering::SeqCst))
    }
}
