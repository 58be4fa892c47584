//! # timebridge-reactor: Deterministic Logical-Time Engine
//!
//! A small reactor runtime in which all effects are ordered by logical time.
//! Reactors declare actions, ports and reactions up front; the environment
//! validates the resulting dependency graph and then executes reactions tag
//! by tag on a single thread.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                         Environment                           │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │ EventQueue   │   │ Reaction     │   │ PhysicalClock    │   │
//! │  │ (tag order)  │   │ graph (topo) │   │ (system/manual)  │   │
//! │  └──────▲───────┘   └──────────────┘   └──────────────────┘   │
//! │         │ tag = max(physical now, current + 1 microstep)      │
//! │  ┌──────┴───────┐                                             │
//! │  │ Inbox        │◀──── PhysicalAction::schedule (any thread)  │
//! │  └──────────────┘                                             │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **`LogicalTime` / `Tag`**: nanoseconds since epoch plus a microstep
//! - **`LogicalAction`**: scheduled from reactions at `now + delay`
//! - **`PhysicalAction`**: the only thread-safe way into the deterministic domain
//! - **`Input` / `Output`**: typed ports, connected once at assembly
//! - **Deadlines**: observational monitors on reaction lag

mod assembly;
mod clock;
mod environment;
mod error;
mod port;
mod queue;
mod time;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use assembly::{Assembler, ReactionBuilder, ReactionFn};
pub use clock::{ManualClock, PhysicalClock, SystemClock};
pub use environment::{Environment, EnvironmentBuilder, ExecutionMode, ReactionContext, ReactorHandle};
pub use error::AssemblyError;
pub use port::{Input, LogicalAction, Output, PhysicalAction, Readable, Startup, Trigger, TriggerKey};
pub use queue::EventQueue;
pub use time::{LogicalTime, Tag};
