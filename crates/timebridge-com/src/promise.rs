//! One-shot promise/completion pair.
//!
//! A [`Promise`] is the producing half, a [`Completion`] the consuming half.
//! The consumer either blocks in [`Completion::wait`] or registers a
//! continuation with [`Completion::then`], which runs on whichever thread
//! completes the promise (or immediately, if the result is already there).
//!
//! Dropping a promise without completing it fails the completion with
//! [`CallError::BrokenPromise`].

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use crate::CallError;

type Continuation<T> = Box<dyn FnOnce(Result<T, CallError>) + Send>;

enum State<T> {
    Pending(Option<Continuation<T>>),
    Ready(Result<T, CallError>),
    Consumed,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Creates a connected promise/completion pair.
pub fn channel<T: Send + 'static>() -> (Promise<T>, Completion<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(State::Pending(None)),
        ready: Condvar::new(),
    });
    (
        Promise {
            shared: Arc::clone(&shared),
        },
        Completion { shared },
    )
}

// ============================================================================
// Promise
// ============================================================================

/// Producing half. Completes at most once.
pub struct Promise<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Promise<T> {
    pub fn set_value(self, value: T) {
        self.fulfil(Ok(value));
    }

    pub fn set_error(self, error: CallError) {
        self.fulfil(Err(error));
    }

    pub fn complete(self, result: Result<T, CallError>) {
        self.fulfil(result);
    }

    fn fulfil(&self, result: Result<T, CallError>) {
        let mut state = self.shared.lock();
        let continuation = match &mut *state {
            State::Pending(continuation) => continuation.take(),
            State::Ready(_) | State::Consumed => return,
        };
        match continuation {
            Some(continuation) => {
                *state = State::Consumed;
                drop(state);
                continuation(result);
            }
            None => {
                *state = State::Ready(result);
                drop(state);
                self.shared.ready.notify_all();
            }
        }
    }
}

impl<T: Send + 'static> Drop for Promise<T> {
    fn drop(&mut self) {
        self.fulfil(Err(CallError::BrokenPromise));
    }
}

impl<T: Send + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}

// ============================================================================
// Completion
// ============================================================================

/// Consuming half of an asynchronous call result.
pub struct Completion<T: Send + 'static> {
    shared: Arc<Shared<T>>,
}

impl<T: Send + 'static> Completion<T> {
    /// A completion that already holds `result`.
    pub fn ready(result: Result<T, CallError>) -> Self {
        let (promise, completion) = channel();
        promise.complete(result);
        completion
    }

    pub fn failed(error: CallError) -> Self {
        Self::ready(Err(error))
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.shared.lock(), State::Ready(_))
    }

    /// Registers `continuation` to run with the result.
    ///
    /// Runs immediately on the calling thread if the result is already
    /// available, otherwise on the thread that completes the promise.
    pub fn then<F>(self, continuation: F)
    where
        F: FnOnce(Result<T, CallError>) + Send + 'static,
    {
        let mut state = self.shared.lock();
        match std::mem::replace(&mut *state, State::Consumed) {
            State::Ready(result) => {
                drop(state);
                continuation(result);
            }
            State::Pending(_) => {
                *state = State::Pending(Some(Box::new(continuation)));
            }
            State::Consumed => {}
        }
    }

    /// Blocks until the result is available.
    pub fn wait(self) -> Result<T, CallError> {
        let mut state = self.shared.lock();
        loop {
            match std::mem::replace(&mut *state, State::Consumed) {
                State::Ready(result) => return result,
                pending @ State::Pending(_) => {
                    *state = pending;
                    state = self
                        .shared
                        .ready
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                State::Consumed => return Err(CallError::BrokenPromise),
            }
        }
    }

    /// Takes the result if it is available.
    pub fn try_take(&mut self) -> Option<Result<T, CallError>> {
        let mut state = self.shared.lock();
        match std::mem::replace(&mut *state, State::Consumed) {
            State::Ready(result) => Some(result),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Transforms the successful value once it arrives.
    pub fn map<U, F>(self, f: F) -> Completion<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let (promise, completion) = channel();
        self.then(move |result| promise.complete(result.map(f)));
        completion
    }
}

impl<T: Send + 'static> fmt::Debug for Completion<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("ready", &self.is_ready())
            .finish()
    }
}
