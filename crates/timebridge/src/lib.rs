//! # timebridge: Logical-Time Bridge for Service Middleware
//!
//! Connects a deterministic, logical-time reactor environment to a
//! physically timed, asynchronous event/method middleware. Messages arriving
//! from the network are re-injected into logical time at a bounded,
//! computable delay; messages leaving carry their logical deadline.
//!
//! ```text
//!            physical domain                   │          deterministic domain
//!                                              │
//!  remote event ──▶ ProxyEvent ───────────────┼──▶ ProxyEventTransactor ──▶ notify
//!  remote sink  ◀── EventDispatcher ◀─────────┼─── SkeletonEventTransactor ◀── notify
//!  remote method ◀─▶ ProxyMethod ◀────────────┼──▶ ProxyMethodTransactor ◀──▶ request/response
//!  remote caller ──▶ RequestGateway ──────────┼──▶ SkeletonMethodTransactor ◀──▶ local service
//!                                              │
//!                   PhysicalAction::schedule is the only way in
//! ```
//!
//! ## Timing Rule
//!
//! A message stamped `t` is delivered at exactly
//! `t + max_network_delay + max_sync_error` if that point is still in the
//! logical future when the message is drained. Otherwise it is a timing
//! violation: logged and dropped, never delivered out of order.
//!
//! ## Timestamps on the Wire
//!
//! Payloads optionally end in a big-endian `i64` deadline (see [`wire`]).
//! Transactors pass timestamps explicitly in [`Stamped`] envelopes and also
//! stage them in the thread-local [`TimestampContext`] around middleware
//! calls, for marshallers that only see the thread-local.

pub mod binding;
mod budget;
pub mod config;
mod error;
mod policy;
mod stamped;
pub mod telemetry;
mod time_context;
pub mod transactor;
pub mod wire;

pub use budget::{Admission, TimingBudget};
pub use config::{BridgeConfig, ConfigLoader};
pub use error::{ConfigError, ContractViolation, WireError};
pub use policy::{CorrelationPolicy, DeliveryOrdering, EvictionPolicy, TransactorStats};
pub use stamped::Stamped;
pub use time_context::TimestampContext;
pub use transactor::{
    ProxyEventOptions, ProxyEventTransactor, ProxyMethodTransactor, Reply, Request, RequestGateway, RequestId,
    SkeletonEventTransactor, SkeletonMethodOptions, SkeletonMethodTransactor,
};

pub use timebridge_com as com;
pub use timebridge_reactor as reactor;

#[cfg(test)]
mod tests;
