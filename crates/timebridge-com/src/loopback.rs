//! In-memory middleware.
//!
//! Delivers events and calls within one process, with the same threading
//! behaviour a network binding has from the caller's point of view: receive
//! handlers run on the sending thread, and method results arrive through a
//! [`Completion`] that may be completed on any thread.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::{CacheUpdatePolicy, CallError, Completion, EventDispatcher, ProxyEvent, ProxyMethod, ReceiveHandler};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Events
// ============================================================================

struct Subscription {
    policy: CacheUpdatePolicy,
    depth: usize,
}

struct ProxyState<S> {
    subscription: Option<Subscription>,
    received: VecDeque<S>,
    cache: Vec<S>,
}

struct ProxyShared<S> {
    state: Mutex<ProxyState<S>>,
    handler: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl<S> ProxyShared<S> {
    fn deliver(&self, sample: S) {
        {
            let mut state = lock(&self.state);
            let Some(depth) = state.subscription.as_ref().map(|s| s.depth) else {
                return;
            };
            state.received.push_back(sample);
            while state.received.len() > depth {
                state.received.pop_front();
            }
        }
        let handler = lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// Service-side event feeding every proxy created from it.
pub struct LoopbackEvent<S> {
    proxies: Arc<Mutex<Vec<Weak<ProxyShared<S>>>>>,
}

impl<S: Clone + Send + 'static> LoopbackEvent<S> {
    pub fn new() -> Self {
        Self {
            proxies: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Creates a new client of this event, initially unsubscribed.
    pub fn proxy(&self) -> LoopbackProxyEvent<S> {
        let shared = Arc::new(ProxyShared {
            state: Mutex::new(ProxyState {
                subscription: None,
                received: VecDeque::new(),
                cache: Vec::new(),
            }),
            handler: Mutex::new(None),
        });
        lock(&self.proxies).push(Arc::downgrade(&shared));
        LoopbackProxyEvent { shared }
    }
}

impl<S: Clone + Send + 'static> Default for LoopbackEvent<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> Clone for LoopbackEvent<S> {
    fn clone(&self) -> Self {
        Self {
            proxies: Arc::clone(&self.proxies),
        }
    }
}

impl<S> fmt::Debug for LoopbackEvent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackEvent")
            .field("proxies", &lock(&self.proxies).len())
            .finish()
    }
}

impl<S: Clone + Send + 'static> EventDispatcher for LoopbackEvent<S> {
    type Sample = S;

    fn send(&self, sample: S) {
        let proxies: Vec<Arc<ProxyShared<S>>> = {
            let mut proxies = lock(&self.proxies);
            proxies.retain(|proxy| proxy.strong_count() > 0);
            proxies.iter().filter_map(Weak::upgrade).collect()
        };
        tracing::trace!(proxies = proxies.len(), "loopback event sent");
        for proxy in proxies {
            proxy.deliver(sample.clone());
        }
    }
}

/// Client side of a [`LoopbackEvent`].
pub struct LoopbackProxyEvent<S> {
    shared: Arc<ProxyShared<S>>,
}

impl<S> LoopbackProxyEvent<S> {
    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared.state).subscription.is_some()
    }

    pub fn has_receive_handler(&self) -> bool {
        lock(&self.shared.handler).is_some()
    }
}

impl<S> fmt::Debug for LoopbackProxyEvent<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackProxyEvent")
            .field("subscribed", &self.is_subscribed())
            .finish_non_exhaustive()
    }
}

impl<S: Clone + Send + 'static> ProxyEvent for LoopbackProxyEvent<S> {
    type Sample = S;

    fn subscribe(&self, policy: CacheUpdatePolicy, depth: usize) {
        let mut state = lock(&self.shared.state);
        state.subscription = Some(Subscription { policy, depth });
    }

    fn unsubscribe(&self) {
        let mut state = lock(&self.shared.state);
        state.subscription = None;
        state.received.clear();
        state.cache.clear();
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) {
        *lock(&self.shared.handler) = Some(Arc::from(handler));
    }

    fn unset_receive_handler(&self) {
        *lock(&self.shared.handler) = None;
    }

    fn update(&self) {
        let mut state = lock(&self.shared.state);
        let Some((policy, depth)) = state.subscription.as_ref().map(|s| (s.policy, s.depth)) else {
            return;
        };
        let received: Vec<S> = state.received.drain(..).collect();
        match policy {
            CacheUpdatePolicy::NewestN => state.cache.extend(received),
            CacheUpdatePolicy::LastN => state.cache = received,
        }
        let excess = state.cache.len().saturating_sub(depth);
        state.cache.drain(..excess);
    }

    fn cached_samples(&self) -> Vec<S> {
        lock(&self.shared.state).cache.clone()
    }

    fn cleanup(&self) {
        lock(&self.shared.state).cache.clear();
    }
}

// ============================================================================
// Methods
// ============================================================================

type Handler<Req, Resp> = Arc<dyn Fn(Req) -> Completion<Resp> + Send + Sync>;

/// Method whose calls go straight to an in-process handler.
pub struct LoopbackMethod<Req, Resp: Send + 'static> {
    handler: Option<Handler<Req, Resp>>,
    calls: Arc<AtomicUsize>,
}

impl<Req, Resp: Send + 'static> LoopbackMethod<Req, Resp> {
    /// Serves every call with `handler`.
    pub fn serve<F>(handler: F) -> Self
    where
        F: Fn(Req) -> Completion<Resp> + Send + Sync + 'static,
    {
        Self {
            handler: Some(Arc::new(handler)),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A method with no service behind it; every call fails with
    /// [`CallError::Unavailable`].
    pub fn unavailable() -> Self {
        Self {
            handler: None,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<Req, Resp: Send + 'static> Clone for LoopbackMethod<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            handler: self.handler.clone(),
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<Req, Resp: Send + 'static> fmt::Debug for LoopbackMethod<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackMethod")
            .field("available", &self.handler.is_some())
            .field("calls", &self.calls())
            .finish()
    }
}

impl<Req: Send + 'static, Resp: Send + 'static> ProxyMethod for LoopbackMethod<Req, Resp> {
    type Request = Req;
    type Response = Resp;

    fn call(&self, request: Req) -> Completion<Resp> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.handler {
            Some(handler) => handler(request),
            None => Completion::failed(CallError::Unavailable),
        }
    }
}
