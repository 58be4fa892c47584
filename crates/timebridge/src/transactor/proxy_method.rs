//! Outbound call bridge.
//!
//! A call moves through four states, two of them outside logical time:
//!
//! ```text
//!   Idle ──request──▶ Requested ──call()──▶ AwaitingResponse
//!     ▲                                          │ completion (middleware thread)
//!     │                                          ▼
//!     └──────── response ◀── deliver ◀──── Responding (admitted at arrival + lookahead)
//! ```

use std::sync::Arc;

use timebridge_com::{CallError, ProxyMethod};
use timebridge_reactor::{Assembler, Input, LogicalAction, Output, PhysicalAction, ReactionContext};

use crate::budget::Admission;
use crate::{ContractViolation, Stamped, TimestampContext, TimingBudget, TransactorStats};

/// Remote method taking and returning stamped values.
pub type MethodTarget<Req, Resp> = Arc<dyn ProxyMethod<Request = Stamped<Req>, Response = Stamped<Resp>>>;

type Outcome<Resp> = Result<Stamped<Resp>, CallError>;

/// Issues remote calls from logical time and re-injects their responses.
///
/// Requests arriving while unbound are dropped and never answered. Failed
/// calls are logged and dropped; there is no retry.
pub struct ProxyMethodTransactor<Req: Send + Sync + 'static, Resp: Send + Sync + 'static> {
    name: String,
    binding: Option<MethodTarget<Req, Resp>>,
    budget: TimingBudget,
    in_flight: usize,
    stats: TransactorStats,

    request: Input<Req>,
    response: Output<Resp>,
    rebind: Input<Option<MethodTarget<Req, Resp>>>,
    completed: PhysicalAction<Outcome<Resp>>,
    deliver: LogicalAction<Resp>,
}

impl<Req, Resp> ProxyMethodTransactor<Req, Resp>
where
    Req: Clone + Send + Sync + 'static,
    Resp: Clone + Send + Sync + 'static,
{
    pub fn new(asm: &mut Assembler<'_, Self>, binding: Option<MethodTarget<Req, Resp>>, budget: TimingBudget) -> Self {
        let request = asm.input("request");
        let response = asm.output("response");
        let rebind = asm.input("rebind");
        let completed = asm.physical_action("completed");
        let deliver = asm.logical_action("deliver");

        asm.reaction("r_rebind", Self::on_rebind).triggered_by(&rebind);
        asm.reaction("r_request", Self::on_request).triggered_by(&request);
        asm.reaction("r_completed", Self::on_completed)
            .triggered_by(&completed)
            .schedules(&deliver);
        asm.reaction("r_deliver", Self::on_deliver)
            .triggered_by(&deliver)
            .effects(&response);

        Self {
            name: asm.name().to_string(),
            binding,
            budget,
            in_flight: 0,
            stats: TransactorStats::default(),
            request,
            response,
            rebind,
            completed,
            deliver,
        }
    }

    pub fn request(&self) -> Input<Req> {
        self.request
    }

    pub fn response(&self) -> Output<Resp> {
        self.response
    }

    pub fn rebind(&self) -> Input<Option<MethodTarget<Req, Resp>>> {
        self.rebind
    }

    /// Calls issued whose completion has not yet been processed.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn stats(&self) -> TransactorStats {
        self.stats
    }

    fn on_rebind(&mut self, ctx: &mut ReactionContext<'_>) {
        if let Some(binding) = ctx.get(&self.rebind) {
            self.binding = (*binding).clone();
            tracing::debug!(transactor = %self.name, bound = self.binding.is_some(), "method rebound");
        }
    }

    fn on_request(&mut self, ctx: &mut ReactionContext<'_>) {
        let Some(args) = ctx.get(&self.request) else {
            return;
        };
        let Some(method) = &self.binding else {
            self.stats.unbound_drops += 1;
            tracing::warn!(transactor = %self.name, "not bound to a method, dropping request");
            return;
        };

        let stamp = self.budget.outbound_deadline(ctx.logical_time());
        let completion = TimestampContext::scoped(stamp, || method.call(Stamped::new(Req::clone(&args), stamp)));
        self.in_flight += 1;

        let completed = self.completed.clone();
        completion.then(move |outcome| completed.schedule(outcome));
        tracing::trace!(transactor = %self.name, deadline = %stamp, "request sent");
    }

    fn on_completed(&mut self, ctx: &mut ReactionContext<'_>) {
        let Some(outcome) = ctx.get(&self.completed) else {
            return;
        };
        self.in_flight = self.in_flight.saturating_sub(1);

        let response = match outcome.as_ref() {
            Ok(response) => response,
            Err(error) => {
                self.stats.call_errors += 1;
                tracing::error!(transactor = %self.name, %error, "method call failed");
                return;
            }
        };
        let Some(arrival) = response.timestamp else {
            ContractViolation::MissingTimestamp {
                transactor: self.name.clone(),
            }
            .fatal();
        };

        let now = ctx.logical_time();
        match self.budget.admit(arrival, now) {
            Admission::Deliver { delay, .. } => {
                ctx.schedule(&self.deliver, response.value.clone(), delay);
            }
            Admission::Late { target } => {
                self.stats.timing_violations += 1;
                tracing::error!(
                    transactor = %self.name,
                    timestamp = %arrival,
                    %target,
                    now = %now,
                    "timing violation: dropping response"
                );
            }
        }
    }

    fn on_deliver(&mut self, ctx: &mut ReactionContext<'_>) {
        if let Some(value) = ctx.get(&self.deliver) {
            self.stats.delivered += 1;
            ctx.set_shared(&self.response, value);
        }
    }
}
