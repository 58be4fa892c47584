//! Static reactor assembly.
//!
//! Reactors declare their actions, ports and reactions once, while being
//! added to an [`EnvironmentBuilder`](crate::EnvironmentBuilder). The
//! declarations form a directed dependency graph that is validated and
//! topologically sorted before the first tick:
//!
//! ```text
//!   reaction ──effects──▶ output ──connection──▶ input ──triggers──▶ reaction
//!   reaction(priority n) ──────────────────────────────────────────▶ reaction(priority n+1)
//! ```
//!
//! At every tag, reactions run in that order, so a reaction always sees the
//! outputs its upstream reactions set at the same tag.

use std::any::TypeId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::environment::ReactionContext;
use crate::port::{Inbox, Input, LogicalAction, Output, PhysicalAction, Trigger, TriggerKey};
use crate::AssemblyError;

/// Signature of reaction bodies and deadline handlers.
pub type ReactionFn<R> = fn(&mut R, &mut ReactionContext<'_>);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Input,
    Output,
}

#[derive(Debug)]
pub(crate) struct PortInfo {
    pub name: String,
    pub type_id: TypeId,
    pub type_name: &'static str,
    pub direction: Direction,
}

#[derive(Debug)]
pub(crate) struct ActionInfo {
    pub name: String,
}

#[derive(Debug)]
pub(crate) struct ReactionInfo {
    pub name: String,
    pub reactor: usize,
    pub local: usize,
    pub triggers: Vec<TriggerKey>,
    pub schedules: Vec<usize>,
    pub effects: Vec<usize>,
    pub deadline: Option<Duration>,
}

/// Everything declared by the reactors of one environment.
#[derive(Debug, Default)]
pub(crate) struct Registry {
    pub ports: Vec<PortInfo>,
    pub actions: Vec<ActionInfo>,
    pub reactions: Vec<ReactionInfo>,
    /// Output port id to the input port ids it feeds.
    pub connections: HashMap<usize, Vec<usize>>,
    /// Input port id to its single producer.
    pub producers: HashMap<usize, usize>,
}

impl Registry {
    fn add_port<T: 'static>(&mut self, name: String, direction: Direction) -> usize {
        self.ports.push(PortInfo {
            name,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            direction,
        });
        self.ports.len() - 1
    }

    fn add_action(&mut self, name: String) -> usize {
        self.actions.push(ActionInfo { name });
        self.actions.len() - 1
    }

    pub fn connect(&mut self, output: usize, input: usize) -> Result<(), AssemblyError> {
        let out = &self.ports[output];
        let inp = &self.ports[input];

        if out.direction != Direction::Output {
            return Err(AssemblyError::WrongDirection {
                port: out.name.clone(),
                expected: "output",
            });
        }
        if inp.direction != Direction::Input {
            return Err(AssemblyError::WrongDirection {
                port: inp.name.clone(),
                expected: "input",
            });
        }
        if out.type_id != inp.type_id {
            return Err(AssemblyError::TypeMismatch {
                output: out.name.clone(),
                output_type: out.type_name,
                input: inp.name.clone(),
                input_type: inp.type_name,
            });
        }
        if let Some(&existing) = self.producers.get(&input) {
            return Err(AssemblyError::MultipleProducers {
                input: inp.name.clone(),
                existing: self.ports[existing].name.clone(),
            });
        }

        self.producers.insert(input, output);
        self.connections.entry(output).or_default().push(input);
        Ok(())
    }

    /// Validates the graph and returns reaction indices in execution order.
    pub fn execution_order(&self) -> Result<Vec<usize>, AssemblyError> {
        if let Some(reaction) = self.reactions.iter().find(|r| r.triggers.is_empty()) {
            return Err(AssemblyError::NoTriggers {
                reaction: reaction.name.clone(),
            });
        }

        let n = self.reactions.len();
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];

        // Reactions triggered by each input port.
        let mut triggered_by: HashMap<usize, Vec<usize>> = HashMap::new();
        for (index, reaction) in self.reactions.iter().enumerate() {
            for trigger in &reaction.triggers {
                if let TriggerKey::Port(port) = trigger {
                    triggered_by.entry(*port).or_default().push(index);
                }
            }
        }

        for (index, reaction) in self.reactions.iter().enumerate() {
            // Priority within a reactor.
            if let Some(next) = self.reactions.get(index + 1) {
                if next.reactor == reaction.reactor {
                    edges[index].push(index + 1);
                }
            }
            // Data flow across connections.
            for output in &reaction.effects {
                for input in self.connections.get(output).into_iter().flatten() {
                    for &downstream in triggered_by.get(input).into_iter().flatten() {
                        edges[index].push(downstream);
                    }
                }
            }
        }

        let mut in_degree = vec![0usize; n];
        for targets in &edges {
            for &target in targets {
                in_degree[target] += 1;
            }
        }

        let mut ready: BinaryHeap<Reverse<usize>> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| Reverse(i))
            .collect();
        let mut order = Vec::with_capacity(n);

        while let Some(Reverse(index)) = ready.pop() {
            order.push(index);
            for &target in &edges[index] {
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    ready.push(Reverse(target));
                }
            }
        }

        if order.len() < n {
            let reactions = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| self.reactions[i].name.clone())
                .collect();
            return Err(AssemblyError::CausalityLoop { reactions });
        }

        Ok(order)
    }
}

/// Reaction body and optional deadline handler of one reactor.
pub(crate) struct ReactionFns<R> {
    pub body: ReactionFn<R>,
    pub on_deadline: Option<ReactionFn<R>>,
}

// ============================================================================
// Assembler
// ============================================================================

/// Declaration context handed to a reactor's constructor.
pub struct Assembler<'a, R> {
    pub(crate) reactor: usize,
    pub(crate) name: &'a str,
    pub(crate) registry: &'a mut Registry,
    pub(crate) inbox: &'a Arc<Inbox>,
    pub(crate) fns: &'a mut Vec<ReactionFns<R>>,
}

impl<R> Assembler<'_, R> {
    /// Name of the reactor being assembled.
    pub fn name(&self) -> &str {
        self.name
    }

    fn qualified(&self, name: &str) -> String {
        format!("{}.{}", self.name, name)
    }

    pub fn logical_action<T: Send + Sync + 'static>(&mut self, name: &str) -> LogicalAction<T> {
        let name = self.qualified(name);
        LogicalAction::new(self.registry.add_action(name))
    }

    pub fn physical_action<T: Send + Sync + 'static>(&mut self, name: &str) -> PhysicalAction<T> {
        let name = self.qualified(name);
        let id = self.registry.add_action(name);
        PhysicalAction::new(id, Arc::clone(self.inbox))
    }

    pub fn input<T: Send + Sync + 'static>(&mut self, name: &str) -> Input<T> {
        let name = self.qualified(name);
        Input::new(self.registry.add_port::<T>(name, Direction::Input))
    }

    pub fn output<T: Send + Sync + 'static>(&mut self, name: &str) -> Output<T> {
        let name = self.qualified(name);
        Output::new(self.registry.add_port::<T>(name, Direction::Output))
    }

    /// Declares a reaction. Priority is declaration order within the reactor.
    pub fn reaction(&mut self, name: &str, body: ReactionFn<R>) -> ReactionBuilder<'_, R> {
        let name = self.qualified(name);
        let local = self.fns.len();
        self.fns.push(ReactionFns {
            body,
            on_deadline: None,
        });
        self.registry.reactions.push(ReactionInfo {
            name,
            reactor: self.reactor,
            local,
            triggers: Vec::new(),
            schedules: Vec::new(),
            effects: Vec::new(),
            deadline: None,
        });
        let index = self.registry.reactions.len() - 1;

        ReactionBuilder {
            info: &mut self.registry.reactions[index],
            fns: &mut self.fns[local],
        }
    }
}

/// Declares the dependencies of a single reaction.
pub struct ReactionBuilder<'b, R> {
    info: &'b mut ReactionInfo,
    fns: &'b mut ReactionFns<R>,
}

impl<R> ReactionBuilder<'_, R> {
    pub fn triggered_by(self, trigger: &impl Trigger) -> Self {
        self.info.triggers.push(trigger.key());
        self
    }

    pub fn schedules<T>(self, action: &LogicalAction<T>) -> Self {
        self.info.schedules.push(action.id);
        self
    }

    pub fn effects<T>(self, output: &Output<T>) -> Self {
        self.info.effects.push(output.id);
        self
    }

    /// Attaches a deadline monitor.
    ///
    /// When the physical lag at reaction start exceeds `deadline`, `handler`
    /// runs first. The reaction body still runs afterwards.
    pub fn deadline(self, deadline: Duration, handler: ReactionFn<R>) -> Self {
        self.info.deadline = Some(deadline);
        self.fns.on_deadline = Some(handler);
        self
    }
}
