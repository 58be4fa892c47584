//! Timing budgets and the safe-delivery rule.
//!
//! A message stamped with logical time `t` by a remote sender may be treated
//! deterministically only once every message stamped earlier could have
//! arrived, i.e. at `t + max_network_delay + max_sync_error`. If that point
//! is already in the logical past when the message is drained, delivering it
//! would break ordering, so it is rejected as a timing violation.

use std::time::Duration;

use timebridge_reactor::LogicalTime;

use crate::ConfigError;

/// Per-transactor timing assumptions. Immutable once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingBudget {
    /// Deadline attached to messages the transactor sends (requests, responses or events).
    pub request_deadline: Duration,
    /// Upper bound on network latency.
    pub max_network_delay: Duration,
    /// Upper bound on the clock offset between nodes.
    pub max_sync_error: Duration,
}

/// Outcome of [`TimingBudget::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Deliver `delay` after now, at `target`.
    Deliver { target: LogicalTime, delay: Duration },
    /// `target` is not in the future.
    Late { target: LogicalTime },
}

impl TimingBudget {
    /// Builds a budget, rejecting a zero lookahead.
    pub fn new(
        request_deadline: Duration,
        max_network_delay: Duration,
        max_sync_error: Duration,
    ) -> Result<Self, ConfigError> {
        let budget = Self {
            request_deadline,
            max_network_delay,
            max_sync_error,
        };
        budget.validate()?;
        Ok(budget)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lookahead().is_zero() {
            return Err(ConfigError::Invalid(
                "max_network_delay + max_sync_error must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Minimum safe delay before a remotely stamped message is deterministic.
    pub fn lookahead(&self) -> Duration {
        self.max_network_delay.saturating_add(self.max_sync_error)
    }

    /// Applies the safe-delivery rule to a message stamped `timestamp`,
    /// drained at logical time `now`.
    pub fn admit(&self, timestamp: LogicalTime, now: LogicalTime) -> Admission {
        let target = timestamp.saturating_add(self.lookahead());
        match target.checked_duration_since(now) {
            Some(delay) if !delay.is_zero() => Admission::Deliver { target, delay },
            _ => Admission::Late { target },
        }
    }

    /// Timestamp to attach to an outbound message sent at `now`.
    pub fn outbound_deadline(&self, now: LogicalTime) -> LogicalTime {
        now.saturating_add(self.request_deadline)
    }
}

impl Default for TimingBudget {
    fn default() -> Self {
        Self {
            request_deadline: Duration::from_millis(10),
            max_network_delay: Duration::from_millis(5),
            max_sync_error: Duration::from_millis(1),
        }
    }
}
