//! Outbound event bridge.

use std::sync::Arc;
use std::time::Duration;

use timebridge_com::EventDispatcher;
use timebridge_reactor::{Assembler, Input, ReactionContext};

use crate::{Stamped, TimestampContext, TransactorStats};

/// Remote event sink accepting stamped samples.
pub type EventSink<T> = Arc<dyn EventDispatcher<Sample = Stamped<T>>>;

/// Forwards local values to the middleware, stamped with `now + deadline`.
///
/// The send happens synchronously inside the reaction. The stamp travels in
/// the [`Stamped`] envelope and is also staged in the [`TimestampContext`]
/// for the duration of the send.
pub struct SkeletonEventTransactor<T: Send + Sync + 'static> {
    name: String,
    binding: Option<EventSink<T>>,
    deadline: Duration,
    stats: TransactorStats,

    notify: Input<T>,
    rebind: Input<Option<EventSink<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SkeletonEventTransactor<T> {
    pub fn new(asm: &mut Assembler<'_, Self>, binding: Option<EventSink<T>>, deadline: Duration) -> Self {
        let notify = asm.input("notify");
        let rebind = asm.input("rebind");

        asm.reaction("r_rebind", Self::on_rebind).triggered_by(&rebind);
        asm.reaction("r_notify", Self::on_notify)
            .triggered_by(&notify)
            .deadline(deadline, Self::on_deadline_miss);

        Self {
            name: asm.name().to_string(),
            binding,
            deadline,
            stats: TransactorStats::default(),
            notify,
            rebind,
        }
    }

    /// Input carrying values to publish.
    pub fn notify(&self) -> Input<T> {
        self.notify
    }

    pub fn rebind(&self) -> Input<Option<EventSink<T>>> {
        self.rebind
    }

    pub fn stats(&self) -> TransactorStats {
        self.stats
    }

    fn on_rebind(&mut self, ctx: &mut ReactionContext<'_>) {
        if let Some(binding) = ctx.get(&self.rebind) {
            self.binding = (*binding).clone();
            tracing::debug!(transactor = %self.name, bound = self.binding.is_some(), "event sink rebound");
        }
    }

    fn on_notify(&mut self, ctx: &mut ReactionContext<'_>) {
        let Some(value) = ctx.get(&self.notify) else {
            return;
        };
        let Some(sink) = &self.binding else {
            self.stats.unbound_drops += 1;
            tracing::warn!(transactor = %self.name, "not bound to an event sink, dropping value");
            return;
        };

        let stamp = ctx.logical_time().saturating_add(self.deadline);
        TimestampContext::scoped(stamp, || sink.send(Stamped::new(T::clone(&value), stamp)));
        self.stats.delivered += 1;
    }

    fn on_deadline_miss(&mut self, ctx: &mut ReactionContext<'_>) {
        self.stats.deadline_misses += 1;
        tracing::error!(
            transactor = %self.name,
            tag = %ctx.tag(),
            physical = %ctx.physical_time(),
            deadline_ms = self.deadline.as_millis(),
            "missed the deadline"
        );
    }
}
