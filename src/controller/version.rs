use std::fmt;

use crate::clock::Clock;

/// Ordered token identifying one state of the monitoring controller.
///
/// Ordered by timestamp, then by counter; the counter disambiguates
/// versions minted within the same microsecond.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonitoringVersion {
    timestamp_micros: u64,
    counter: u32,
}

impl MonitoringVersion {
    /// Mints a version for the current instant with a zero counter.
    pub fn current(clock: &dyn Clock) -> Self {
        Self {
            timestamp_micros: clock.monotonic_micros(),
            counter: 0,
        }
    }

    /// Mints a version strictly greater than `self`. Bumps the counter when
    /// the clock has not advanced past this version's timestamp.
    pub fn next_after(self, clock: &dyn Clock) -> Self {
        let now = clock.monotonic_micros();
        if now > self.timestamp_micros {
            Self {
                timestamp_micros: now,
                counter: 0,
            }
        } else {
            Self {
                timestamp_micros: self.timestamp_micros,
                counter: self.counter + 1,
            }
        }
    }

    pub fn timestamp_micros(&self) -> u64 {
        self.timestamp_micros
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    #[cfg(test)]
    pub(crate) fn for_test(timestamp_micros: u64, counter: u32) -> Self {
        Self {
            timestamp_micros,
            counter,
        }
    }
}

impl fmt::Display for MonitoringVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.timestamp_micros, self.counter)
    }
}
