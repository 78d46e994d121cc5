//! ATIMEFILE - Core Type Definitions
//! Defines fundamental types used across the access-time table.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{AtimeError, Result};

/// Identifier of the external object whose access time is tracked.
pub type Key = u64;

/// Index of a block within a table (`key / entries_per_block`).
pub type BlockId = u64;

/// Identifier of a table inside a block store.
pub type TableId = u64;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A fixed-width timestamp: signed seconds since the Unix epoch
/// plus a sub-second nanosecond field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    secs: i64,
    nanos: u32,
}

impl Timestamp {
    /// The all-zero timestamp. Legacy sentinel-format tables use it
    /// to mean "no value recorded".
    pub const ZERO: Timestamp = Timestamp { secs: 0, nanos: 0 };

    /// Create a timestamp, rejecting a nanosecond field of a second or more.
    pub fn new(secs: i64, nanos: u32) -> Result<Self> {
        if nanos >= NANOS_PER_SEC {
            return Err(AtimeError::InvalidTimestamp(format!(
                "nanosecond field {} out of range",
                nanos
            )));
        }
        Ok(Self { secs, nanos })
    }

    /// Whole-second timestamp.
    pub fn from_secs(secs: i64) -> Self {
        Self { secs, nanos: 0 }
    }

    /// The current wall-clock time.
    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub fn secs(&self) -> i64 {
        self.secs
    }

    pub fn nanos(&self) -> u32 {
        self.nanos
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self {
                secs: d.as_secs() as i64,
                nanos: d.subsec_nanos(),
            },
            Err(e) => {
                // Before the epoch: borrow one second so nanos stays positive.
                let d = e.duration();
                let secs = (d.as_secs() as i64).wrapping_neg();
                match d.subsec_nanos() {
                    0 => Self { secs, nanos: 0 },
                    n => Self {
                        secs: secs.saturating_sub(1),
                        nanos: NANOS_PER_SEC - n,
                    },
                }
            }
        }
    }
}

impl TryFrom<Timestamp> for SystemTime {
    type Error = AtimeError;

    /// Fails when the platform clock cannot represent `ts`.
    fn try_from(ts: Timestamp) -> Result<Self> {
        let time = if ts.secs >= 0 {
            UNIX_EPOCH.checked_add(Duration::new(ts.secs as u64, ts.nanos))
        } else {
            UNIX_EPOCH
                .checked_sub(Duration::from_secs(ts.secs.unsigned_abs()))
                .and_then(|t| t.checked_add(Duration::from_nanos(ts.nanos as u64)))
        };
        time.ok_or_else(|| {
            AtimeError::InvalidTimestamp(format!("{} is out of the system clock's range", ts))
        })
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}
