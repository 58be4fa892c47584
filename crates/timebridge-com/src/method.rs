//! Method interface of the service middleware.

use crate::Completion;

/// Client side of a remote method.
///
/// `call` never blocks; the result arrives through the returned
/// [`Completion`]. Methods with several arguments take them as one tuple.
pub trait ProxyMethod: Send + Sync {
    type Request;
    type Response: Send + 'static;

    fn call(&self, request: Self::Request) -> Completion<Self::Response>;
}
