//! Event interfaces of the service middleware.

/// Callback invoked by the middleware when new samples are available.
///
/// Runs on a middleware thread. It must not block and must not touch
/// deterministic state directly.
pub type ReceiveHandler = Box<dyn Fn() + Send + Sync>;

/// How [`ProxyEvent::update`] fills the sample cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheUpdatePolicy {
    /// Merge new samples into the cache, keeping the newest `depth`.
    #[default]
    NewestN,
    /// Replace the cache with the samples received since the last update.
    LastN,
}

/// Client side of a remote event.
pub trait ProxyEvent: Send + Sync {
    type Sample;

    fn subscribe(&self, policy: CacheUpdatePolicy, depth: usize);

    fn unsubscribe(&self);

    fn set_receive_handler(&self, handler: ReceiveHandler);

    fn unset_receive_handler(&self);

    /// Moves received samples into the cache according to the subscription policy.
    fn update(&self);

    /// Samples currently cached, oldest first.
    fn cached_samples(&self) -> Vec<Self::Sample>;

    /// Releases the cached samples.
    fn cleanup(&self);
}

/// Service side of an event.
pub trait EventDispatcher: Send + Sync {
    type Sample;

    fn send(&self, sample: Self::Sample);
}
