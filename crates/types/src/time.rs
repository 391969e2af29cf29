// Copyright (c) 2023 - 2025 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;
use std::fmt::Display;
use std::ops::Add;
use std::time::{Duration, SystemTime};

/// Milliseconds since the unix epoch
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct MillisSinceEpoch(u64);

impl MillisSinceEpoch {
    pub const UNIX_EPOCH: MillisSinceEpoch = MillisSinceEpoch::new(0);
    pub const MAX: MillisSinceEpoch = MillisSinceEpoch::new(u64::MAX);

    pub const fn new(millis_since_epoch: u64) -> Self {
        MillisSinceEpoch(millis_since_epoch)
    }

    pub fn now() -> Self {
        SystemTime::now().into()
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns the time elapsed since this timestamp, zero if it lies in the future.
    pub fn elapsed(&self) -> Duration {
        let now = Self::now();
        Duration::from_millis(now.0.saturating_sub(self.0))
    }

    pub fn saturating_add(self, duration: Duration) -> Self {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        MillisSinceEpoch(self.0.saturating_add(millis))
    }
}

impl Add<Duration> for MillisSinceEpoch {
    type Output = MillisSinceEpoch;

    fn add(self, rhs: Duration) -> Self::Output {
        self.saturating_add(rhs)
    }
}

impl From<u64> for MillisSinceEpoch {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl From<SystemTime> for MillisSinceEpoch {
    fn from(value: SystemTime) -> Self {
        MillisSinceEpoch::new(
            u64::try_from(
                value
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .expect("duration since Unix epoch should be well-defined")
                    .as_millis(),
            )
            .expect("millis since Unix epoch should fit in u64"),
        )
    }
}

impl From<MillisSinceEpoch> for SystemTime {
    fn from(value: MillisSinceEpoch) -> Self {
        SystemTime::UNIX_EPOCH.add(Duration::from_millis(value.as_u64()))
    }
}

impl Display for MillisSinceEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            humantime::format_rfc3339_millis(SystemTime::from(*self))
        )
    }
}

/// Source of the current wall clock time.
///
/// Every component which compares timestamps against "now" (e.g. reservation expiry) reads the
/// time through a [`Clock`] so that tests can control it.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> MillisSinceEpoch;
}

/// Production implementation of [`Clock`] backed by system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> MillisSinceEpoch {
        MillisSinceEpoch::now()
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use mock::MockClock;

#[cfg(any(test, feature = "test-util"))]
mod mock {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{Clock, MillisSinceEpoch};

    /// Manually driven clock. Clones share the same time.
    #[derive(Debug, Clone)]
    pub struct MockClock {
        storage: Arc<AtomicU64>,
    }

    impl Default for MockClock {
        fn default() -> Self {
            Self::with_timestamp(MillisSinceEpoch::now())
        }
    }

    impl MockClock {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_timestamp(timestamp: MillisSinceEpoch) -> Self {
            Self {
                storage: Arc::new(AtomicU64::new(timestamp.as_u64())),
            }
        }

        pub fn advance_ms(&self, ms: u64) {
            self.storage.fetch_add(ms, Ordering::SeqCst);
        }

        pub fn advance(&self, duration: Duration) {
            self.advance_ms(u64::try_from(duration.as_millis()).expect("duration fits into u64"));
        }

        pub fn set(&self, timestamp: MillisSinceEpoch) {
            self.storage.store(timestamp.as_u64(), Ordering::SeqCst);
        }
    }

    impl Clock for MockClock {
        fn now(&self) -> MillisSinceEpoch {
            MillisSinceEpoch::new(self.storage.load(Ordering::SeqCst))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saturating_add() {
        assert_eq!(
            MillisSinceEpoch::new(1_000) + Duration::from_secs(20),
            MillisSinceEpoch::new(21_000)
        );
        assert_eq!(
            MillisSinceEpoch::new(u64::MAX - 1) + Duration::from_millis(10),
            MillisSinceEpoch::MAX
        );
    }

    #[test]
    fn mock_clock_is_shared_between_clones() {
        let clock = MockClock::with_timestamp(MillisSinceEpoch::new(1_000));
        let other = clock.clone();
        clock.advance_ms(500);
        assert_eq!(other.now(), MillisSinceEpoch::new(1_500));
        other.set(MillisSinceEpoch::new(42));
        assert_eq!(clock.now(), MillisSinceEpoch::new(42));
    }

    #[test]
    fn display_as_rfc3339() {
        assert_eq!(
            MillisSinceEpoch::new(1_500).to_string(),
            "1970-01-01T00:00:01.500Z"
        );
    }
}
