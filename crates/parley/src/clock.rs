//! Microsecond timestamps for dialogue bookkeeping.
//!
//! Readings combine a wall-clock anchor taken once per process with the
//! monotonic time elapsed since, so consecutive readings never decrease even
//! when the system clock is stepped.

use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

static ANCHOR: Lazy<(i64, Instant)> = Lazy::new(|| {
    let wall = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since| i64::try_from(since.as_micros()).unwrap_or(i64::MAX))
        .unwrap_or_default();
    (wall, Instant::now())
});

/// Microseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Current reading of the process clock.
    #[must_use]
    pub fn now() -> Self {
        let (wall, started) = *ANCHOR;
        let elapsed = i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX);
        Self(wall.saturating_add(elapsed))
    }

    /// Builds a timestamp from a raw microsecond count.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Raw microsecond count.
    #[must_use]
    pub const fn as_micros(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}us", self.0)
    }
}
