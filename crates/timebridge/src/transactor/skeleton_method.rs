//! Inbound call bridge.
//!
//! Remote requests enter through a [`RequestGateway`] on a middleware
//! thread. Inside logical time each request gets a [`RequestId`], a slot in
//! the correlation table, and is forwarded to the local service at its
//! safe-delivery time. The service answers with a [`Reply`] echoing the id;
//! the reply resolves the caller's completion stamped `now + deadline`.
//!
//! ```text
//!   process_request ──▶ arrive ──▶ r_arrive ──(stamp + lookahead)──▶ r_forward ──▶ request
//!                                     │ pending[id] = promise                        │
//!                                     │                                        local service
//!   caller completion ◀── r_reply ◀───┴──────────────────────────────────── reply ◀──┘
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use timebridge_com::promise::{self, Completion, Promise};
use timebridge_com::CallError;
use timebridge_reactor::{
    Assembler, Input, LogicalAction, LogicalTime, Output, PhysicalAction, ReactionContext,
};

use crate::budget::Admission;
use crate::{
    ContractViolation, CorrelationPolicy, EvictionPolicy, Stamped, TimestampContext, TimingBudget,
    TransactorStats,
};

/// Identifier assigned to a request when it enters the correlation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(u64);

impl RequestId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A request handed to the local service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<A> {
    pub id: RequestId,
    pub args: A,
}

impl<A> Request<A> {
    /// Builds the reply for this request.
    pub fn reply<R>(&self, value: R) -> Reply<R> {
        Reply {
            request: self.id,
            value,
        }
    }
}

/// The local service's answer to a [`Request`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply<R> {
    pub request: RequestId,
    pub value: R,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkeletonMethodOptions {
    /// `request_deadline` is the deadline stamped on responses.
    pub budget: TimingBudget,
    pub correlation: CorrelationPolicy,
    pub eviction: EvictionPolicy,
    /// Fails requests still unanswered this long after they entered the table.
    pub pending_timeout: Option<Duration>,
}

impl Default for SkeletonMethodOptions {
    fn default() -> Self {
        Self {
            budget: TimingBudget::default(),
            correlation: CorrelationPolicy::default(),
            eviction: EvictionPolicy::default(),
            pending_timeout: None,
        }
    }
}

/// A request crossing from the middleware into logical time.
struct Arrival<Req, Resp: Send + 'static> {
    timestamp: LogicalTime,
    args: Req,
    // Taken exactly once by `r_arrive`; the engine only hands out shared references.
    promise: Mutex<Option<Promise<Stamped<Resp>>>>,
}

// ============================================================================
// Gateway
// ============================================================================

/// Thread-safe entry point for remote requests.
pub struct RequestGateway<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    transactor: Arc<str>,
    arrive: PhysicalAction<Arrival<Req, Resp>>,
}

impl<Req, Resp> RequestGateway<Req, Resp>
where
    Req: Send + Sync + 'static,
    Resp: Send + Sync + 'static,
{
    /// Accepts a request whose timestamp is staged in the caller's
    /// [`TimestampContext`].
    ///
    /// # Panics
    ///
    /// Panics with [`ContractViolation::MissingTimestamp`] if nothing is staged.
    pub fn process_request(&self, args: Req) -> Completion<Stamped<Resp>> {
        self.process_stamped(Stamped {
            value: args,
            timestamp: TimestampContext::retrieve(),
        })
    }

    /// Accepts a request carrying its timestamp in the envelope.
    ///
    /// # Panics
    ///
    /// Panics with [`ContractViolation::MissingTimestamp`] if the envelope is unstamped.
    pub fn process_stamped(&self, request: Stamped<Req>) -> Completion<Stamped<Resp>> {
        let Some(timestamp) = request.timestamp else {
            ContractViolation::MissingTimestamp {
                transactor: self.transactor.to_string(),
            }
            .fatal();
        };
        let (promise, completion) = promise::channel();
        self.arrive.schedule(Arrival {
            timestamp,
            args: request.value,
            promise: Mutex::new(Some(promise)),
        });
        completion
    }
}

impl<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> Clone for RequestGateway<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            transactor: Arc::clone(&self.transactor),
            arrive: self.arrive.clone(),
        }
    }
}

impl<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> fmt::Debug for RequestGateway<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestGateway")
            .field("transactor", &self.transactor)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Transactor
// ============================================================================

struct PendingRequest<Resp: Send + 'static> {
    arrival: LogicalTime,
    promise: Promise<Stamped<Resp>>,
}

/// Serves remote requests with a local service running in logical time.
pub struct SkeletonMethodTransactor<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    name: String,
    options: SkeletonMethodOptions,
    next_id: u64,
    pending: BTreeMap<RequestId, PendingRequest<Resp>>,
    arrivals: BTreeSet<(LogicalTime, RequestId)>,
    stats: TransactorStats,

    arrive: PhysicalAction<Arrival<Req, Resp>>,
    forward: LogicalAction<Request<Req>>,
    expire: LogicalAction<RequestId>,
    request: Output<Request<Req>>,
    reply: Input<Reply<Resp>>,
}

impl<Req, Resp> SkeletonMethodTransactor<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    pub fn new(asm: &mut Assembler<'_, Self>, options: SkeletonMethodOptions) -> Self {
        let arrive = asm.physical_action("arrive");
        let forward = asm.logical_action("forward");
        let expire = asm.logical_action("expire");
        let request = asm.output("request");
        let reply = asm.input("reply");

        asm.reaction("r_arrive", Self::on_arrive)
            .triggered_by(&arrive)
            .schedules(&forward)
            .schedules(&expire);
        asm.reaction("r_forward", Self::on_forward)
            .triggered_by(&forward)
            .effects(&request);
        asm.reaction("r_reply", Self::on_reply).triggered_by(&reply);
        asm.reaction("r_expire", Self::on_expire).triggered_by(&expire);

        Self {
            name: asm.name().to_string(),
            options,
            next_id: 0,
            pending: BTreeMap::new(),
            arrivals: BTreeSet::new(),
            stats: TransactorStats::default(),
            arrive,
            forward,
            expire,
            request,
            reply,
        }
    }

    /// Entry point for the middleware binding.
    pub fn gateway(&self) -> RequestGateway<Req, Resp> {
        RequestGateway {
            transactor: Arc::from(self.name.as_str()),
            arrive: self.arrive.clone(),
        }
    }

    /// Output delivering requests to the local service.
    pub fn request(&self) -> Output<Request<Req>> {
        self.request
    }

    /// Input accepting the local service's replies.
    pub fn reply(&self) -> Input<Reply<Resp>> {
        self.reply
    }

    /// Number of requests in the correlation table.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn stats(&self) -> TransactorStats {
        self.stats
    }

    fn on_arrive(&mut self, ctx: &mut ReactionContext<'_>) {
        let Some(arrival) = ctx.get(&self.arrive) else {
            return;
        };
        let Some(promise) = arrival
            .promise
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        let timestamp = arrival.timestamp;

        if self.options.correlation == CorrelationPolicy::ArrivalOrder && self.has_arrival(timestamp) {
            ContractViolation::DuplicateArrival {
                transactor: self.name.clone(),
                timestamp,
            }
            .fatal();
        }

        let id = RequestId(self.next_id);
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingRequest {
                arrival: timestamp,
                promise,
            },
        );
        self.arrivals.insert((timestamp, id));

        let now = ctx.logical_time();
        match self.options.budget.admit(timestamp, now) {
            Admission::Deliver { delay, .. } => {
                let request = Request {
                    id,
                    args: arrival.args.clone(),
                };
                ctx.schedule(&self.forward, request, delay);
            }
            Admission::Late { target } => {
                self.stats.timing_violations += 1;
                tracing::error!(
                    transactor = %self.name,
                    request = %id,
                    %timestamp,
                    %target,
                    now = %now,
                    "timing violation: request not forwarded"
                );
                if self.options.eviction == EvictionPolicy::FailFast {
                    self.evict(id, CallError::TimingViolation);
                    return;
                }
            }
        }

        if let Some(timeout) = self.options.pending_timeout {
            ctx.schedule(&self.expire, id, timeout);
        }
    }

    fn has_arrival(&self, timestamp: LogicalTime) -> bool {
        self.arrivals
            .range((timestamp, RequestId(0))..=(timestamp, RequestId(u64::MAX)))
            .next()
            .is_some()
    }

    fn on_forward(&mut self, ctx: &mut ReactionContext<'_>) {
        if let Some(request) = ctx.get(&self.forward) {
            self.stats.delivered += 1;
            ctx.set_shared(&self.request, request);
        }
    }

    fn on_reply(&mut self, ctx: &mut ReactionContext<'_>) {
        let Some(reply) = ctx.get(&self.reply) else {
            return;
        };
        let id = match self.options.correlation {
            CorrelationPolicy::ByRequestId => reply.request,
            CorrelationPolicy::ArrivalOrder => match self.arrivals.first() {
                Some(&(_, oldest)) => oldest,
                None => reply.request,
            },
        };
        let Some(entry) = self.take(id) else {
            self.stats.unmatched_replies += 1;
            tracing::warn!(transactor = %self.name, request = %reply.request, "reply matches no pending request");
            return;
        };

        let stamp = self.options.budget.outbound_deadline(ctx.logical_time());
        TimestampContext::scoped(stamp, || {
            entry.promise.set_value(Stamped::new(reply.value.clone(), stamp));
        });
        tracing::trace!(transactor = %self.name, request = %id, deadline = %stamp, "response sent");
    }

    fn on_expire(&mut self, ctx: &mut ReactionContext<'_>) {
        let Some(id) = ctx.get(&self.expire).map(|id| *id) else {
            return;
        };
        if self.pending.contains_key(&id) {
            tracing::warn!(transactor = %self.name, request = %id, "pending request expired");
            self.evict(id, CallError::Expired);
        }
    }

    fn take(&mut self, id: RequestId) -> Option<PendingRequest<Resp>> {
        let entry = self.pending.remove(&id)?;
        self.arrivals.remove(&(entry.arrival, id));
        Some(entry)
    }

    fn evict(&mut self, id: RequestId, error: CallError) {
        if let Some(entry) = self.take(id) {
            self.stats.evicted += 1;
            entry.promise.set_error(error);
        }
    }
}
