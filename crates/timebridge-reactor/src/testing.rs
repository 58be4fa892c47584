//! Scripted reactors for tests.
//!
//! [`Source`] emits values at fixed logical times; [`Recorder`] captures every
//! value it receives together with the tag it arrived at.

use std::sync::Arc;

use crate::{Assembler, Input, LogicalAction, LogicalTime, Output, ReactionContext, Startup, Tag};

/// Emits each scripted value at its logical time.
///
/// Times earlier than the start time are emitted at the start time.
pub struct Source<T> {
    script: Vec<(LogicalTime, T)>,
    emit: LogicalAction<T>,
    out: Output<T>,
}

impl<T: Send + Sync + 'static> Source<T> {
    pub fn new(asm: &mut Assembler<'_, Self>, script: Vec<(LogicalTime, T)>) -> Self {
        let emit = asm.logical_action("emit");
        let out = asm.output("out");
        asm.reaction("r_startup", Self::on_startup)
            .triggered_by(&Startup)
            .schedules(&emit);
        asm.reaction("r_emit", Self::on_emit)
            .triggered_by(&emit)
            .effects(&out);
        Self { script, emit, out }
    }

    pub fn output(&self) -> Output<T> {
        self.out
    }

    fn on_startup(&mut self, ctx: &mut ReactionContext<'_>) {
        let now = ctx.logical_time();
        for (time, value) in self.script.drain(..) {
            ctx.schedule(&self.emit, value, time.saturating_duration_since(now));
        }
    }

    fn on_emit(&mut self, ctx: &mut ReactionContext<'_>) {
        if let Some(value) = ctx.get(&self.emit) {
            ctx.set_shared(&self.out, value);
        }
    }
}

/// Records every value arriving on its input.
pub struct Recorder<T> {
    input: Input<T>,
    records: Vec<(Tag, Arc<T>)>,
}

impl<T: Send + Sync + 'static> Recorder<T> {
    pub fn new(asm: &mut Assembler<'_, Self>) -> Self {
        let input = asm.input("in");
        asm.reaction("r_record", Self::on_input).triggered_by(&input);
        Self {
            input,
            records: Vec::new(),
        }
    }

    pub fn input(&self) -> Input<T> {
        self.input
    }

    pub fn records(&self) -> &[(Tag, Arc<T>)] {
        &self.records
    }

    /// Logical times at which values arrived.
    pub fn times(&self) -> Vec<LogicalTime> {
        self.records.iter().map(|(tag, _)| tag.time).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn on_input(&mut self, ctx: &mut ReactionContext<'_>) {
        if let Some(value) = ctx.get(&self.input) {
            self.records.push((ctx.tag(), value));
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Recorder<T> {
    pub fn values(&self) -> Vec<T> {
        self.records.iter().map(|(_, v)| T::clone(v)).collect()
    }
}
