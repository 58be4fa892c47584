//! Physical time sources.
//!
//! The engine reads physical time in two places: to tag events scheduled
//! through a [`PhysicalAction`](crate::PhysicalAction), and to measure the lag
//! of a reaction against its deadline. Production code uses [`SystemClock`];
//! tests drive a [`ManualClock`] so that every run is reproducible.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::LogicalTime;

/// Trait for physical time sources.
///
/// Implementations must be `Send + Sync`: physical actions read the clock
/// from middleware threads.
pub trait PhysicalClock: Send + Sync {
    /// Returns the current physical time on the logical time line.
    fn now(&self) -> LogicalTime;
}

// ============================================================================
// System Clock
// ============================================================================

/// Wall-clock time since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl PhysicalClock for SystemClock {
    fn now(&self) -> LogicalTime {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX));
        LogicalTime::from_nanos(nanos)
    }
}

// ============================================================================
// Manual Clock
// ============================================================================

/// Clock that only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// give another to the environment.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now_ns: Arc<AtomicI64>,
}

impl ManualClock {
    /// Creates a clock reading `start`.
    pub fn new(start: LogicalTime) -> Self {
        Self {
            now_ns: Arc::new(AtomicI64::new(start.as_nanos())),
        }
    }

    /// Sets the clock to `time`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `time` is earlier than the current reading.
    pub fn set(&self, time: LogicalTime) {
        let previous = self.now_ns.swap(time.as_nanos(), Ordering::SeqCst);
        debug_assert!(
            previous <= time.as_nanos(),
            "physical time cannot go backwards: current={previous}, target={time}"
        );
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let delta = i64::try_from(delta.as_nanos()).unwrap_or(i64::MAX);
        self.now_ns.fetch_add(delta, Ordering::SeqCst);
    }
}

impl PhysicalClock for ManualClock {
    fn now(&self) -> LogicalTime {
        LogicalTime::from_nanos(self.now_ns.load(Ordering::SeqCst))
    }
}
