use std::fmt::{self, Display};
use std::ops::Sub;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Milliseconds since the UNIX epoch.
///
/// A value of `0` means "unset" (mirrors the original's `uint64_t` epoch
/// fields such as `ReplicaInfo::verifyTime` or `Request::controllerStartTime`,
/// where `0` stands for "this timestamp has not been recorded yet").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const UNSET: Timestamp = Timestamp(0);

    pub fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self.0 != 0
    }

    /// Real wall-clock reading. Only `rplc-services` and `rplc-worker`
    /// should call this directly; `rplc-job` and `rplc-request` take a
    /// `Clock` so tests can control time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64;
        Self(millis)
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl Sub for Timestamp {
    type Output = i64;

    fn sub(self, rhs: Self) -> i64 {
        self.0 as i64 - rhs.0 as i64
    }
}

/// Server-observed timing for a request, carried back on every worker
/// reply and persisted alongside the request's own controller-side
/// timestamps (spec.md §3, §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerPerformance {
    pub receive_time: Timestamp,
    pub start_time: Timestamp,
    pub finish_time: Timestamp,
}

/// Injectable source of time, following the kernel-has-no-clocks
/// principle: `Job`/`Request` state machines accept a `Clock` instead of
/// calling `Timestamp::now()` so that tests can drive deterministic time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// The real wall clock, used outside of tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only advances when told to. Used by job/request unit
/// tests that assert ordering of timestamps without sleeping.
#[derive(Debug, Clone)]
pub struct FakeClock {
    millis: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl FakeClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(start_millis)),
        }
    }

    pub fn advance(&self, delta_millis: u64) {
        self.millis
            .fetch_add(delta_millis, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(std::sync::atomic::Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_is_zero() {
        assert!(!Timestamp::UNSET.is_set());
        assert!(Timestamp::from_millis(1).is_set());
    }

    #[test]
    fn fake_clock_advances_monotonically() {
        let clock = FakeClock::new(100);
        let t0 = clock.now();
        clock.advance(50);
        let t1 = clock.now();
        assert_eq!(t1 - t0, 50);
    }
}
