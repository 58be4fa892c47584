//! Actions, ports and the physical inbox.
//!
//! All handles are thin typed wrappers around an index into the owning
//! environment. Values travel as `Arc<dyn Any>` and are downcast on read;
//! the typed handles guarantee the downcast succeeds.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use crossbeam_queue::SegQueue;

use crate::{LogicalTime, PhysicalClock};

pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// Identifies something that can trigger a reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TriggerKey {
    Startup,
    Action(usize),
    Port(usize),
}

/// Anything a reaction can declare as a trigger.
pub trait Trigger {
    fn key(&self) -> TriggerKey;
}

/// A trigger that carries a value of type `T`.
pub trait Readable<T>: Trigger {}

/// The startup trigger, present exactly once at the first tag.
#[derive(Debug, Clone, Copy)]
pub struct Startup;

impl Trigger for Startup {
    fn key(&self) -> TriggerKey {
        TriggerKey::Startup
    }
}

macro_rules! typed_handle {
    ($(#[$doc:meta])* $name:ident, $key:ident) => {
        $(#[$doc])*
        pub struct $name<T> {
            pub(crate) id: usize,
            _marker: PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            pub(crate) fn new(id: usize) -> Self {
                Self { id, _marker: PhantomData }
            }
        }

        impl<T> Clone for $name<T> {
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.id)
            }
        }

        impl<T> Trigger for $name<T> {
            fn key(&self) -> TriggerKey {
                TriggerKey::$key(self.id)
            }
        }
    };
}

typed_handle!(
    /// Action scheduled from within reactions, at `now + delay`.
    LogicalAction,
    Action
);
typed_handle!(
    /// Input port, set by the output it is connected to.
    Input,
    Port
);

impl<T> Readable<T> for LogicalAction<T> {}
impl<T> Readable<T> for Input<T> {}

/// Output port. Setting it makes the value present on every connected input
/// at the same tag.
pub struct Output<T> {
    pub(crate) id: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Output<T> {
    pub(crate) fn new(id: usize) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Output<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Output<T> {}

impl<T> fmt::Debug for Output<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Output({})", self.id)
    }
}

// ============================================================================
// Physical Actions
// ============================================================================

/// Action that may be scheduled from any thread.
///
/// This is the only legal way into the deterministic domain from outside.
/// `schedule` pushes onto a lock-free queue and runs no reaction code on
/// the calling thread; the event is tagged on the next step of the
/// environment.
pub struct PhysicalAction<T> {
    pub(crate) id: usize,
    inbox: Arc<Inbox>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Send + Sync + 'static> PhysicalAction<T> {
    pub(crate) fn new(id: usize, inbox: Arc<Inbox>) -> Self {
        Self {
            id,
            inbox,
            _marker: PhantomData,
        }
    }

    /// Enqueues `value` for the next feasible tag.
    pub fn schedule(&self, value: T) {
        self.inbox.push(self.id, Arc::new(value));
    }
}

impl<T> Clone for PhysicalAction<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            inbox: Arc::clone(&self.inbox),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for PhysicalAction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalAction({})", self.id)
    }
}

impl<T> Trigger for PhysicalAction<T> {
    fn key(&self) -> TriggerKey {
        TriggerKey::Action(self.id)
    }
}

impl<T> Readable<T> for PhysicalAction<T> {}

/// An event handed over by a physical action, stamped with physical time.
pub(crate) struct PhysicalEvent {
    pub action: usize,
    pub value: Value,
    pub at: LogicalTime,
}

/// Thread-safe mailbox between physical actions and the environment.
///
/// Events go through a lock-free queue. The mutex guards nothing but the
/// condvar handshake: the driver checks for pending events while holding it,
/// and producers take it only to notify, so a wakeup is never lost.
pub(crate) struct Inbox {
    pending: SegQueue<PhysicalEvent>,
    signal: Mutex<()>,
    wakeup: Condvar,
    clock: Arc<dyn PhysicalClock>,
}

impl Inbox {
    pub fn new(clock: Arc<dyn PhysicalClock>) -> Self {
        Self {
            pending: SegQueue::new(),
            signal: Mutex::new(()),
            wakeup: Condvar::new(),
            clock,
        }
    }

    fn push(&self, action: usize, value: Value) {
        let at = self.clock.now();
        self.pending.push(PhysicalEvent { action, value, at });
        let _signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        self.wakeup.notify_one();
    }

    /// Takes every pending event in push order.
    pub fn drain(&self) -> Vec<PhysicalEvent> {
        std::iter::from_fn(|| self.pending.pop()).collect()
    }

    /// Blocks until an event arrives or `timeout` elapses.
    pub fn wait(&self, timeout: Option<Duration>) {
        let signal = self.signal.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.pending.is_empty() {
            return;
        }
        match timeout {
            Some(timeout) => {
                let (_signal, _) = self
                    .wakeup
                    .wait_timeout(signal, timeout)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            None => {
                let _signal = self.wakeup.wait(signal).unwrap_or_else(PoisonError::into_inner);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Instant;

    use super::*;
    use crate::ManualClock;

    fn inbox() -> Arc<Inbox> {
        Arc::new(Inbox::new(Arc::new(ManualClock::new(LogicalTime::from_millis(7)))))
    }

    #[test]
    fn drain_keeps_push_order_per_producer() {
        let inbox = inbox();
        let producers: Vec<_> = (0..4)
            .map(|producer| {
                let inbox = Arc::clone(&inbox);
                thread::spawn(move || {
                    for seq in 0..100usize {
                        inbox.push(producer, Arc::new(seq));
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        let events = inbox.drain();
        assert_eq!(events.len(), 400);
        assert!(events.iter().all(|event| event.at == LogicalTime::from_millis(7)));
        for producer in 0..4 {
            let seqs: Vec<usize> = events
                .iter()
                .filter(|event| event.action == producer)
                .map(|event| *event.value.downcast_ref::<usize>().unwrap())
                .collect();
            assert_eq!(seqs, (0..100).collect::<Vec<_>>());
        }
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn wait_returns_immediately_when_events_are_pending() {
        let inbox = inbox();
        inbox.push(0, Arc::new(()));
        let started = Instant::now();
        inbox.wait(None);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(inbox.drain().len(), 1);
    }

    #[test]
    fn wait_wakes_on_push_from_another_thread() {
        let inbox = inbox();
        let producer = {
            let inbox = Arc::clone(&inbox);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                inbox.push(3, Arc::new(1u8));
            })
        };
        inbox.wait(None);
        producer.join().unwrap();
        assert_eq!(inbox.drain().len(), 1);
    }

    #[test]
    fn wait_times_out_without_events() {
        let inbox = inbox();
        inbox.wait(Some(Duration::from_millis(5)));
        assert!(inbox.drain().is_empty());
    }
}
