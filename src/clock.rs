use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};

/// Time source for the engine.
///
/// Wall-clock readings feed report timestamps; the microsecond reading feeds
/// [`MonitoringVersion`](crate::controller::MonitoringVersion) tokens and is
/// required to never move backwards within one clock instance.
pub trait Clock: Send + Sync + 'static {
    /// Current wall-clock time.
    fn now(&self) -> OffsetDateTime;
    /// Microseconds since the Unix epoch, monotonically non-decreasing.
    fn monotonic_micros(&self) -> u64;
}

/// Production clock: wall time anchored at construction and advanced by a
/// monotonic [`Instant`], so readings never regress even if the system
/// clock is adjusted underneath us.
pub struct SystemClock {
    anchor_wall: OffsetDateTime,
    anchor_instant: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            anchor_wall: OffsetDateTime::now_utc(),
            anchor_instant: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        self.anchor_wall + self.anchor_instant.elapsed()
    }

    fn monotonic_micros(&self) -> u64 {
        let nanos = self.now().unix_timestamp_nanos();
        (nanos / 1_000) as u64
    }
}

/// Manually driven clock for tests. Starts at a fixed instant and only moves
/// when told to.
pub struct ManualClock {
    current: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Starts at 2024-01-01T00:00:00Z.
    pub fn at_default_epoch() -> Self {
        Self::new(time::macros::datetime!(2024-01-01 00:00:00 UTC))
    }

    pub fn advance(&self, by: Duration) {
        *self.current.lock() += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.current.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.current.lock()
    }

    fn monotonic_micros(&self) -> u64 {
        (self.now().unix_timestamp_nanos() / 1_000) as u64
    }
}

/// Identifier of one call record, unique within a process run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(Arc<str>);

impl CallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(Arc::from(value))
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(Arc::from(value.as_str()))
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out process-unique call ids from an atomic counter.
pub struct CallIdSource {
    next: AtomicU64,
}

impl CallIdSource {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> CallId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        CallId::from(format!("call-{n}"))
    }
}

impl Default for CallIdSource {
    fn default() -> Self {
        Self::new()
    }
}
