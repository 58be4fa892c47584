//! # timebridge-com: Service Middleware Interfaces
//!
//! The event/method surface of a SOME/IP-style service middleware, as seen
//! by the timebridge transactors, plus an in-memory loopback implementation.
//!
//! ```text
//!   service side                         client side
//! ┌──────────────────┐   samples    ┌──────────────────┐
//! │ EventDispatcher  │─────────────▶│ ProxyEvent       │ cache + receive handler
//! └──────────────────┘              └──────────────────┘
//! ┌──────────────────┐   request    ┌──────────────────┐
//! │ method handler   │◀─────────────│ ProxyMethod      │ call() -> Completion
//! └──────────────────┘   response   └──────────────────┘
//! ```
//!
//! Middleware callbacks run on middleware threads. Nothing in this crate
//! knows about logical time.

mod error;
mod event;
mod loopback;
mod method;
pub mod promise;

pub use error::CallError;
pub use event::{CacheUpdatePolicy, EventDispatcher, ProxyEvent, ReceiveHandler};
pub use loopback::{LoopbackEvent, LoopbackMethod, LoopbackProxyEvent};
pub use method::ProxyMethod;
pub use promise::{Completion, Promise};
