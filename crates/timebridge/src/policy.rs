//! Policies and counters shared by the transactors.

use serde::{Deserialize, Serialize};

/// How a batch of inbound samples is laid out in logical time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryOrdering {
    /// Within one drained batch, never schedule a sample earlier than the
    /// one before it.
    #[default]
    Monotonic,
    /// Schedule every sample at its own safe-delivery time.
    Independent,
}

/// How a local reply is matched to a pending remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationPolicy {
    /// Match on the request identifier echoed in the reply.
    #[default]
    ByRequestId,
    /// Resolve the oldest pending request. Only valid for services that
    /// answer strictly in arrival order.
    ArrivalOrder,
}

/// What happens to a pending request whose arrival was a timing violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Remove it and fail the caller with a timing violation.
    #[default]
    FailFast,
    /// Keep it pending; a later reply may still resolve it.
    Retain,
}

/// Counters kept by every transactor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactorStats {
    /// Values emitted into the deterministic domain or forwarded to the middleware.
    pub delivered: u64,
    pub timing_violations: u64,
    pub unbound_drops: u64,
    pub deadline_misses: u64,
    /// Calls whose completion carried an error.
    pub call_errors: u64,
    /// Pending requests failed by the eviction policy or by expiry.
    pub evicted: u64,
    /// Replies that matched no pending request.
    pub unmatched_replies: u64,
}
