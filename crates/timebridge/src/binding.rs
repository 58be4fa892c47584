//! Byte-level middleware bindings.
//!
//! Wrap middleware objects that move raw payloads so the transactors can
//! bind to them as typed [`Stamped`] interfaces. Encoding and decoding
//! follow the [wire convention](crate::wire).
//!
//! A missing trailer is handled differently by direction. Inbound requests
//! without one are answered with [`CallError::Malformed`] at this layer.
//! Event samples and method responses without one are passed on unstamped,
//! and the receiving transactor treats that as a fatal contract violation.

use std::fmt;
use std::marker::PhantomData;

use bytes::Bytes;
use timebridge_com::promise::{self, Completion};
use timebridge_com::{CacheUpdatePolicy, CallError, EventDispatcher, ProxyEvent, ProxyMethod, ReceiveHandler};

use crate::transactor::RequestGateway;
use crate::wire::{decode_payload, encode_payload, WireCodec};
use crate::Stamped;

// ============================================================================
// Events
// ============================================================================

/// Decodes the samples of a byte-level event.
///
/// Samples that fail to decode are logged and skipped. A sample without a
/// trailer is passed on with no timestamp.
pub struct WireProxyEvent<T, P> {
    inner: P,
    _marker: PhantomData<fn() -> T>,
}

impl<T, P> WireProxyEvent<T, P> {
    pub fn new(inner: P) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }
}

impl<T, P: fmt::Debug> fmt::Debug for WireProxyEvent<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WireProxyEvent").field(&self.inner).finish()
    }
}

impl<T, P> ProxyEvent for WireProxyEvent<T, P>
where
    T: WireCodec,
    P: ProxyEvent<Sample = Bytes>,
{
    type Sample = Stamped<T>;

    fn subscribe(&self, policy: CacheUpdatePolicy, depth: usize) {
        self.inner.subscribe(policy, depth);
    }

    fn unsubscribe(&self) {
        self.inner.unsubscribe();
    }

    fn set_receive_handler(&self, handler: ReceiveHandler) {
        self.inner.set_receive_handler(handler);
    }

    fn unset_receive_handler(&self) {
        self.inner.unset_receive_handler();
    }

    fn update(&self) {
        self.inner.update();
    }

    fn cached_samples(&self) -> Vec<Stamped<T>> {
        self.inner
            .cached_samples()
            .into_iter()
            .filter_map(|payload| match decode_payload(payload) {
                Ok(sample) => Some(sample),
                Err(error) => {
                    tracing::warn!(%error, "skipping undecodable event sample");
                    None
                }
            })
            .collect()
    }

    fn cleanup(&self) {
        self.inner.cleanup();
    }
}

/// Encodes stamped samples for a byte-level event.
pub struct WireEventDispatcher<T, D> {
    inner: D,
    _marker: PhantomData<fn(T)>,
}

impl<T, D> WireEventDispatcher<T, D> {
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<T, D: fmt::Debug> fmt::Debug for WireEventDispatcher<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WireEventDispatcher").field(&self.inner).finish()
    }
}

impl<T, D> EventDispatcher for WireEventDispatcher<T, D>
where
    T: WireCodec,
    D: EventDispatcher<Sample = Bytes>,
{
    type Sample = Stamped<T>;

    fn send(&self, sample: Stamped<T>) {
        self.inner.send(encode_payload(&sample.value, sample.timestamp));
    }
}

// ============================================================================
// Methods
// ============================================================================

/// Encodes requests for, and decodes responses from, a byte-level method.
///
/// A response that fails to decode completes the call with
/// [`CallError::Malformed`]. A response without a trailer completes the
/// call with an unstamped value.
pub struct WireProxyMethod<Req, Resp, M> {
    inner: M,
    _marker: PhantomData<fn(Req) -> Resp>,
}

impl<Req, Resp, M> WireProxyMethod<Req, Resp, M> {
    pub fn new(inner: M) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<Req, Resp, M: fmt::Debug> fmt::Debug for WireProxyMethod<Req, Resp, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WireProxyMethod").field(&self.inner).finish()
    }
}

impl<Req, Resp, M> ProxyMethod for WireProxyMethod<Req, Resp, M>
where
    Req: WireCodec,
    Resp: WireCodec + Send + 'static,
    M: ProxyMethod<Request = Bytes, Response = Bytes>,
{
    type Request = Stamped<Req>;
    type Response = Stamped<Resp>;

    fn call(&self, request: Stamped<Req>) -> Completion<Stamped<Resp>> {
        let payload = encode_payload(&request.value, request.timestamp);
        let (promise, completion) = promise::channel();
        self.inner.call(payload).then(move |result| {
            promise.complete(result.and_then(|payload| {
                decode_payload(payload).map_err(|error| CallError::Malformed(error.to_string()))
            }));
        });
        completion
    }
}

/// Byte-level request handler feeding a skeleton method transactor.
///
/// Hands the request's trailer timestamp to the gateway in the [`Stamped`]
/// envelope, so the handler may run on a thread that already has a
/// timestamp staged. The response is encoded with its stamp as trailer.
/// Requests without a trailer or with undecodable arguments fail with
/// [`CallError::Malformed`] instead of reaching the transactor.
pub fn serve_skeleton_method<Req, Resp>(
    gateway: RequestGateway<Req, Resp>,
) -> impl Fn(Bytes) -> Completion<Bytes> + Send + Sync + 'static
where
    Req: WireCodec + Send + Sync + 'static,
    Resp: WireCodec + Send + Sync + 'static,
{
    move |payload: Bytes| {
        let request = match decode_payload::<Req>(payload) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(%error, "rejecting undecodable request");
                return Completion::failed(CallError::Malformed(error.to_string()));
            }
        };
        let Some(timestamp) = request.timestamp else {
            tracing::warn!("rejecting request without timestamp trailer");
            return Completion::failed(CallError::Malformed("missing timestamp trailer".to_string()));
        };

        gateway
            .process_stamped(Stamped::new(request.value, timestamp))
            .map(|response| encode_payload(&response.value, response.timestamp))
    }
}
