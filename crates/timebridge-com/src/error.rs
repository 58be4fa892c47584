//! Call error types.

/// Why a method call produced no value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    /// No service instance is reachable.
    #[error("service unavailable")]
    Unavailable,

    /// The remote side reported a failure.
    #[error("remote error: {0}")]
    Remote(String),

    /// The request or response could not be decoded.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The request reached the service too late to be handled deterministically.
    #[error("timing violation: request arrived after its safe delivery time")]
    TimingViolation,

    /// The request stayed unanswered past its pending timeout.
    #[error("request expired before a response was produced")]
    Expired,

    /// The promise was dropped without being completed.
    #[error("promise dropped without a result")]
    BrokenPromise,
}
