//! Timestamped envelope.

use timebridge_reactor::LogicalTime;

/// A value together with the logical timestamp it travels with.
///
/// On outbound messages the timestamp is the sender's deadline; on inbound
/// messages it is the timestamp decoded from the wire. `None` means the
/// message carried no timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T> {
    pub value: T,
    pub timestamp: Option<LogicalTime>,
}

impl<T> Stamped<T> {
    pub fn new(value: T, timestamp: LogicalTime) -> Self {
        Self {
            value,
            timestamp: Some(timestamp),
        }
    }

    pub fn unstamped(value: T) -> Self {
        Self {
            value,
            timestamp: None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Stamped<U> {
        Stamped {
            value: f(self.value),
            timestamp: self.timestamp,
        }
    }

    pub fn into_parts(self) -> (T, Option<LogicalTime>) {
        (self.value, self.timestamp)
    }
}
