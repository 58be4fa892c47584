//! Inbound event bridge.
//!
//! ```text
//!  middleware thread          │  deterministic domain
//!                             │
//!  receive handler ──schedule─┼─▶ trigger ──▶ r_trigger: update, drain, admit
//!                             │                   │ deliver @ stamp + lookahead
//!                             │                   ▼
//!                             │              r_deliver ──▶ notify
//! ```

use std::sync::Arc;

use timebridge_com::{CacheUpdatePolicy, ProxyEvent};
use timebridge_reactor::{Assembler, Input, LogicalAction, LogicalTime, Output, PhysicalAction, ReactionContext};

use crate::budget::Admission;
use crate::{ContractViolation, DeliveryOrdering, Stamped, TimingBudget, TransactorStats};

/// Remote event source delivering stamped samples.
pub type EventSource<T> = Arc<dyn ProxyEvent<Sample = Stamped<T>>>;

/// Default number of samples kept by the subscription cache.
pub const DEFAULT_CACHE_DEPTH: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyEventOptions {
    pub budget: TimingBudget,
    pub cache_depth: usize,
    pub ordering: DeliveryOrdering,
}

impl Default for ProxyEventOptions {
    fn default() -> Self {
        Self {
            budget: TimingBudget::default(),
            cache_depth: DEFAULT_CACHE_DEPTH,
            ordering: DeliveryOrdering::default(),
        }
    }
}

/// Re-injects remote event samples into logical time.
pub struct ProxyEventTransactor<T: Send + Sync + 'static> {
    name: String,
    binding: Option<EventSource<T>>,
    options: ProxyEventOptions,
    stats: TransactorStats,

    trigger: PhysicalAction<()>,
    deliver: LogicalAction<T>,
    notify: Output<T>,
    rebind: Input<Option<EventSource<T>>>,
}

impl<T: Clone + Send + Sync + 'static> ProxyEventTransactor<T> {
    pub fn new(asm: &mut Assembler<'_, Self>, binding: Option<EventSource<T>>, options: ProxyEventOptions) -> Self {
        let trigger = asm.physical_action("trigger");
        let deliver = asm.logical_action("deliver");
        let notify = asm.output("notify");
        let rebind = asm.input("rebind");

        asm.reaction("r_rebind", Self::on_rebind).triggered_by(&rebind);
        asm.reaction("r_trigger", Self::on_trigger)
            .triggered_by(&trigger)
            .schedules(&deliver);
        asm.reaction("r_deliver", Self::on_deliver)
            .triggered_by(&deliver)
            .effects(&notify);

        let transactor = Self {
            name: asm.name().to_string(),
            binding,
            options,
            stats: TransactorStats::default(),
            trigger,
            deliver,
            notify,
            rebind,
        };
        if let Some(source) = &transactor.binding {
            transactor.attach(source);
        }
        transactor
    }

    /// Output carrying delivered samples.
    pub fn notify(&self) -> Output<T> {
        self.notify
    }

    /// Input replacing the bound event source.
    pub fn rebind(&self) -> Input<Option<EventSource<T>>> {
        self.rebind
    }

    pub fn stats(&self) -> TransactorStats {
        self.stats
    }

    pub fn is_bound(&self) -> bool {
        self.binding.is_some()
    }

    fn attach(&self, source: &EventSource<T>) {
        source.subscribe(CacheUpdatePolicy::NewestN, self.options.cache_depth);
        let trigger = self.trigger.clone();
        source.set_receive_handler(Box::new(move || trigger.schedule(())));
    }

    fn detach(source: &EventSource<T>) {
        source.unset_receive_handler();
        source.unsubscribe();
    }

    fn on_rebind(&mut self, ctx: &mut ReactionContext<'_>) {
        let Some(binding) = ctx.get(&self.rebind) else {
            return;
        };
        if let Some(old) = self.binding.take() {
            Self::detach(&old);
        }
        self.binding = (*binding).clone();
        if let Some(source) = &self.binding {
            self.attach(source);
        }
        tracing::debug!(transactor = %self.name, bound = self.binding.is_some(), "event source rebound");
    }

    fn on_trigger(&mut self, ctx: &mut ReactionContext<'_>) {
        let Some(source) = self.binding.clone() else {
            tracing::debug!(transactor = %self.name, "trigger while unbound");
            return;
        };
        let now = ctx.logical_time();

        source.update();
        // Clamping only applies within this drained batch.
        let mut floor = None;
        for sample in source.cached_samples() {
            let Some(timestamp) = sample.timestamp else {
                ContractViolation::MissingTimestamp {
                    transactor: self.name.clone(),
                }
                .fatal();
            };

            match self.options.budget.admit(timestamp, now) {
                Admission::Deliver { target, .. } => {
                    let target = self.order(target, &mut floor);
                    let delay = target.saturating_duration_since(now);
                    tracing::trace!(transactor = %self.name, %timestamp, %target, "sample scheduled");
                    ctx.schedule(&self.deliver, sample.value, delay);
                }
                Admission::Late { target } => {
                    self.stats.timing_violations += 1;
                    tracing::error!(
                        transactor = %self.name,
                        %timestamp,
                        %target,
                        now = %now,
                        "timing violation: dropping event sample"
                    );
                }
            }
        }
        source.cleanup();
    }

    fn order(&self, target: LogicalTime, floor: &mut Option<LogicalTime>) -> LogicalTime {
        let target = match (self.options.ordering, *floor) {
            (DeliveryOrdering::Monotonic, Some(last)) => target.max(last),
            _ => target,
        };
        *floor = Some(target);
        target
    }

    fn on_deliver(&mut self, ctx: &mut ReactionContext<'_>) {
        if let Some(value) = ctx.get(&self.deliver) {
            self.stats.delivered += 1;
            ctx.set_shared(&self.notify, value);
        }
    }
}
