//! Environment: owns the reactors and executes them tag by tag.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::assembly::{Assembler, ReactionFns, ReactionInfo, Registry};
use crate::port::{Inbox, Input, LogicalAction, Output, Readable, Trigger, TriggerKey, Value};
use crate::queue::EventQueue;
use crate::{AssemblyError, LogicalTime, PhysicalClock, SystemClock, Tag};

/// How the environment relates logical time to physical time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Jump straight to the next tag without waiting.
    #[default]
    FastForward,
    /// Do not execute a tag before physical time has reached it.
    RealTime,
}

#[derive(Debug)]
enum Event {
    Startup,
    Action { id: usize, value: Value },
}

trait ErasedReactor: Send {
    fn invoke(&mut self, local: usize, ctx: &mut ReactionContext<'_>);
    fn invoke_deadline(&mut self, local: usize, ctx: &mut ReactionContext<'_>);
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct Slot<R> {
    instance: R,
    fns: Vec<ReactionFns<R>>,
}

impl<R: Send + 'static> ErasedReactor for Slot<R> {
    fn invoke(&mut self, local: usize, ctx: &mut ReactionContext<'_>) {
        (self.fns[local].body)(&mut self.instance, ctx);
    }

    fn invoke_deadline(&mut self, local: usize, ctx: &mut ReactionContext<'_>) {
        if let Some(handler) = self.fns[local].on_deadline {
            handler(&mut self.instance, ctx);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Typed handle to a reactor owned by an environment.
pub struct ReactorHandle<R> {
    index: usize,
    _marker: PhantomData<fn() -> R>,
}

impl<R> Clone for ReactorHandle<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for ReactorHandle<R> {}

impl<R> fmt::Debug for ReactorHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReactorHandle({})", self.index)
    }
}

fn downcast<R: 'static>(reactor: &dyn ErasedReactor) -> Option<&R> {
    reactor
        .as_any()
        .downcast_ref::<Slot<R>>()
        .map(|slot| &slot.instance)
}

fn downcast_mut<R: 'static>(reactor: &mut dyn ErasedReactor) -> Option<&mut R> {
    reactor
        .as_any_mut()
        .downcast_mut::<Slot<R>>()
        .map(|slot| &mut slot.instance)
}

// ============================================================================
// Builder
// ============================================================================

/// Collects reactors and connections, then validates them into an
/// [`Environment`].
pub struct EnvironmentBuilder {
    clock: Arc<dyn PhysicalClock>,
    mode: ExecutionMode,
    start_time: Option<LogicalTime>,
    registry: Registry,
    reactors: Vec<Box<dyn ErasedReactor>>,
    names: HashSet<String>,
    inbox: Arc<Inbox>,
}

impl EnvironmentBuilder {
    /// Creates a builder reading physical time from `clock`.
    pub fn new(clock: impl PhysicalClock + 'static) -> Self {
        let clock: Arc<dyn PhysicalClock> = Arc::new(clock);
        Self {
            inbox: Arc::new(Inbox::new(Arc::clone(&clock))),
            clock,
            mode: ExecutionMode::default(),
            start_time: None,
            registry: Registry::default(),
            reactors: Vec::new(),
            names: HashSet::new(),
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the logical time of the startup tag (default: physical now at build).
    pub fn with_start_time(mut self, start: LogicalTime) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Adds a reactor built by `constructor`, which declares its actions,
    /// ports and reactions through the given [`Assembler`].
    pub fn add<R, F>(&mut self, name: &str, constructor: F) -> Result<ReactorHandle<R>, AssemblyError>
    where
        R: Send + 'static,
        F: FnOnce(&mut Assembler<'_, R>) -> R,
    {
        if !self.names.insert(name.to_string()) {
            return Err(AssemblyError::DuplicateReactor {
                name: name.to_string(),
            });
        }

        let index = self.reactors.len();
        let mut fns = Vec::new();
        let instance = {
            let mut assembler = Assembler {
                reactor: index,
                name,
                registry: &mut self.registry,
                inbox: &self.inbox,
                fns: &mut fns,
            };
            constructor(&mut assembler)
        };
        self.reactors.push(Box::new(Slot { instance, fns }));

        tracing::debug!(reactor = name, "reactor assembled");
        Ok(ReactorHandle {
            index,
            _marker: PhantomData,
        })
    }

    /// Connects an output to an input.
    pub fn connect<T: 'static>(&mut self, output: &Output<T>, input: &Input<T>) -> Result<(), AssemblyError> {
        self.registry.connect(output.id, input.id)
    }

    pub fn reactor<R: 'static>(&self, handle: &ReactorHandle<R>) -> Option<&R> {
        self.reactors.get(handle.index).and_then(|r| downcast(r.as_ref()))
    }

    /// Validates the dependency graph and produces a runnable environment.
    pub fn build(self) -> Result<Environment, AssemblyError> {
        let order = self.registry.execution_order()?;
        let start = self.start_time.unwrap_or_else(|| self.clock.now());
        let start_tag = Tag::new(start, 0);

        let mut queue = EventQueue::new();
        queue.schedule(start_tag, Event::Startup);

        tracing::debug!(
            reactors = self.reactors.len(),
            reactions = order.len(),
            start = %start,
            "environment assembled"
        );

        Ok(Environment {
            clock: self.clock,
            mode: self.mode,
            registry: self.registry,
            order,
            reactors: self.reactors,
            queue,
            inbox: self.inbox,
            current: None,
            start_tag,
        })
    }
}

impl Default for EnvironmentBuilder {
    fn default() -> Self {
        Self::new(SystemClock)
    }
}

// ============================================================================
// Environment
// ============================================================================

/// A validated set of reactors executing in logical time.
///
/// Single-threaded: all reactions run on the thread that drives the
/// environment. Other threads interact only through physical actions.
pub struct Environment {
    clock: Arc<dyn PhysicalClock>,
    mode: ExecutionMode,
    registry: Registry,
    order: Vec<usize>,
    reactors: Vec<Box<dyn ErasedReactor>>,
    queue: EventQueue<Event>,
    inbox: Arc<Inbox>,
    current: Option<Tag>,
    start_tag: Tag,
}

impl Environment {
    pub fn builder() -> EnvironmentBuilder {
        EnvironmentBuilder::default()
    }

    /// The tag currently (or most recently) executing.
    pub fn current_tag(&self) -> Option<Tag> {
        self.current
    }

    /// Logical time of the current tag, or the start time before the first step.
    pub fn logical_time(&self) -> LogicalTime {
        self.current.unwrap_or(self.start_tag).time
    }

    /// Number of events waiting in the logical queue.
    pub fn pending_events(&self) -> usize {
        self.queue.len()
    }

    pub fn reactor<R: 'static>(&self, handle: &ReactorHandle<R>) -> Option<&R> {
        self.reactors.get(handle.index).and_then(|r| downcast(r.as_ref()))
    }

    pub fn reactor_mut<R: 'static>(&mut self, handle: &ReactorHandle<R>) -> Option<&mut R> {
        self.reactors
            .get_mut(handle.index)
            .and_then(|r| downcast_mut(r.as_mut()))
    }

    /// Executes the next tag, if any. Returns `false` when nothing is pending.
    pub fn step(&mut self) -> bool {
        loop {
            self.ingest_physical();
            let Some(tag) = self.queue.next_tag() else {
                return false;
            };
            if self.wait_for_physical(tag.time) {
                self.execute(tag);
                return true;
            }
        }
    }

    /// Executes every tag up to and including `stop`.
    ///
    /// In real-time mode this blocks until physical time reaches `stop`.
    pub fn run_until(&mut self, stop: LogicalTime) -> usize {
        let mut executed = 0;
        loop {
            self.ingest_physical();
            match self.queue.next_tag() {
                Some(tag) if tag.time <= stop => {
                    if self.wait_for_physical(tag.time) {
                        self.execute(tag);
                        executed += 1;
                    }
                }
                _ => {
                    if self.mode == ExecutionMode::FastForward {
                        return executed;
                    }
                    let now = self.clock.now();
                    if now >= stop {
                        self.ingest_physical();
                        if self.queue.next_tag().is_none_or(|tag| tag.time > stop) {
                            return executed;
                        }
                    } else {
                        self.inbox.wait(stop.checked_duration_since(now));
                    }
                }
            }
        }
    }

    /// Executes tags until neither the queue nor the physical inbox holds work.
    pub fn run_until_idle(&mut self) -> usize {
        let mut executed = 0;
        while self.step() {
            executed += 1;
        }
        executed
    }

    /// In real-time mode, waits until physical time reaches `time`.
    ///
    /// Returns `false` if a physical event arrived first, in which case the
    /// caller re-reads the queue.
    fn wait_for_physical(&mut self, time: LogicalTime) -> bool {
        if self.mode == ExecutionMode::FastForward {
            return true;
        }
        let now = self.clock.now();
        match time.checked_duration_since(now) {
            None | Some(Duration::ZERO) => true,
            Some(remaining) => {
                self.inbox.wait(Some(remaining));
                self.clock.now() >= time
            }
        }
    }

    fn ingest_physical(&mut self) {
        for event in self.inbox.drain() {
            let earliest = self.current.map_or(self.start_tag, Tag::next_microstep);
            let tag = if event.at > earliest.time {
                Tag::new(event.at, 0)
            } else {
                earliest
            };
            self.queue.schedule(
                tag,
                Event::Action {
                    id: event.action,
                    value: event.value,
                },
            );
        }
    }

    fn execute(&mut self, tag: Tag) {
        let mut present: HashMap<TriggerKey, Value> = HashMap::new();

        while self.queue.next_tag() == Some(tag) {
            let Some(scheduled) = self.queue.pop() else {
                break;
            };
            match scheduled.event {
                Event::Startup => {
                    present.insert(TriggerKey::Startup, Arc::new(()));
                }
                Event::Action { id, value } => {
                    let key = TriggerKey::Action(id);
                    if present.contains_key(&key) {
                        // One value per action per tag; later ones move to the next microstep.
                        tracing::trace!(
                            action = %self.registry.actions[id].name,
                            tag = %tag,
                            "action already present, deferring to next microstep"
                        );
                        self.queue
                            .schedule(tag.next_microstep(), Event::Action { id, value });
                    } else {
                        present.insert(key, value);
                    }
                }
            }
        }

        self.current = Some(tag);
        tracing::trace!(tag = %tag, events = present.len(), "executing tag");

        for position in 0..self.order.len() {
            let info = &self.registry.reactions[self.order[position]];
            if !info.triggers.iter().any(|key| present.contains_key(key)) {
                continue;
            }

            let physical_now = self.clock.now();
            let mut ctx = ReactionContext {
                tag,
                physical_now,
                reaction: info,
                connections: &self.registry.connections,
                present: &mut present,
                queue: &mut self.queue,
            };
            let reactor = &mut self.reactors[info.reactor];

            if let Some(deadline) = info.deadline {
                let lag = physical_now.saturating_duration_since(tag.time);
                if lag > deadline {
                    reactor.invoke_deadline(info.local, &mut ctx);
                }
            }
            reactor.invoke(info.local, &mut ctx);
        }
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("mode", &self.mode)
            .field("current", &self.current)
            .field("pending", &self.queue.len())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Reaction Context
// ============================================================================

/// What a reaction body can see and do at the current tag.
pub struct ReactionContext<'a> {
    tag: Tag,
    physical_now: LogicalTime,
    reaction: &'a ReactionInfo,
    connections: &'a HashMap<usize, Vec<usize>>,
    present: &'a mut HashMap<TriggerKey, Value>,
    queue: &'a mut EventQueue<Event>,
}

impl ReactionContext<'_> {
    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn logical_time(&self) -> LogicalTime {
        self.tag.time
    }

    /// Physical time read just before this reaction started.
    pub fn physical_time(&self) -> LogicalTime {
        self.physical_now
    }

    /// Qualified name of the running reaction.
    pub fn reaction_name(&self) -> &str {
        &self.reaction.name
    }

    pub fn is_present(&self, trigger: &impl Trigger) -> bool {
        self.present.contains_key(&trigger.key())
    }

    /// Returns the value of an action or input present at this tag.
    pub fn get<T: Send + Sync + 'static>(&self, trigger: &impl Readable<T>) -> Option<Arc<T>> {
        self.present
            .get(&trigger.key())
            .and_then(|value| Arc::clone(value).downcast::<T>().ok())
    }

    /// Schedules `action` at `now + delay`.
    ///
    /// # Panics
    ///
    /// Panics if the running reaction did not declare the action as schedulable.
    pub fn schedule<T: Send + Sync + 'static>(&mut self, action: &LogicalAction<T>, value: T, delay: Duration) {
        self.schedule_shared(action, Arc::new(value), delay);
    }

    pub fn schedule_shared<T: Send + Sync + 'static>(
        &mut self,
        action: &LogicalAction<T>,
        value: Arc<T>,
        delay: Duration,
    ) {
        assert!(
            self.reaction.schedules.contains(&action.id),
            "contract violation: reaction {} schedules an undeclared action",
            self.reaction.name
        );
        self.queue.schedule(
            self.tag.delay(delay),
            Event::Action {
                id: action.id,
                value,
            },
        );
    }

    /// Sets `output`, making the value present on every connected input.
    ///
    /// # Panics
    ///
    /// Panics if the running reaction did not declare the output as an effect.
    pub fn set<T: Send + Sync + 'static>(&mut self, output: &Output<T>, value: T) {
        self.set_shared(output, Arc::new(value));
    }

    pub fn set_shared<T: Send + Sync + 'static>(&mut self, output: &Output<T>, value: Arc<T>) {
        assert!(
            self.reaction.effects.contains(&output.id),
            "contract violation: reaction {} sets an undeclared output",
            self.reaction.name
        );
        let value: Value = value;
        for &input in self.connections.get(&output.id).into_iter().flatten() {
            self.present.insert(TriggerKey::Port(input), Arc::clone(&value));
        }
        self.present.insert(TriggerKey::Port(output.id), value);
    }
}
