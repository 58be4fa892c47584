//! The four transactors.
//!
//! Each transactor is a reactor: it declares its ports and reactions through
//! an [`Assembler`](timebridge_reactor::Assembler) and is added to an
//! environment like any other reactor.
//!
//! | transactor | direction | crossing into logical time |
//! |---|---|---|
//! | [`ProxyEventTransactor`] | remote event → local | receive handler → physical action |
//! | [`SkeletonEventTransactor`] | local → remote event | none (synchronous send) |
//! | [`ProxyMethodTransactor`] | local call → remote → local | completion → physical action |
//! | [`SkeletonMethodTransactor`] | remote call → local → remote | [`RequestGateway`] → physical action |

mod proxy_event;
mod proxy_method;
mod skeleton_event;
mod skeleton_method;

pub use proxy_event::{DEFAULT_CACHE_DEPTH, EventSource, ProxyEventOptions, ProxyEventTransactor};
pub use proxy_method::{MethodTarget, ProxyMethodTransactor};
pub use skeleton_event::{EventSink, SkeletonEventTransactor};
pub use skeleton_method::{
    Reply, Request, RequestGateway, RequestId, SkeletonMethodOptions, SkeletonMethodTransactor,
};
