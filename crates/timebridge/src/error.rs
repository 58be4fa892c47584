//! Error types for timebridge.

use std::path::PathBuf;

use timebridge_reactor::LogicalTime;

/// A broken usage contract.
///
/// These indicate a bug in the surrounding system, not a runtime condition,
/// and are fatal: [`ContractViolation::fatal`] logs and panics.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContractViolation {
    /// `provide` was called while a timestamp was already staged.
    #[error("timestamp {staged} is already staged on this thread")]
    TimestampAlreadyStaged { staged: LogicalTime },

    /// `invalidate` was called with nothing staged.
    #[error("no timestamp is staged on this thread")]
    NoTimestampStaged,

    /// A sample, response or request reached a transactor without a timestamp.
    #[error("{transactor}: message carries no timestamp")]
    MissingTimestamp { transactor: String },

    /// Two pending requests share an arrival timestamp under arrival-order correlation.
    #[error("{transactor}: a request with arrival timestamp {timestamp} is already pending")]
    DuplicateArrival {
        transactor: String,
        timestamp: LogicalTime,
    },
}

impl ContractViolation {
    /// Logs the violation and aborts the current thread.
    #[track_caller]
    pub fn fatal(self) -> ! {
        tracing::error!(violation = %self, "contract violation");
        panic!("contract violation: {self}");
    }
}

/// Errors decoding a wire payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// The payload ended before a field was complete.
    #[error("payload truncated: needed {needed} more bytes, {remaining} left")]
    Truncated { needed: usize, remaining: usize },

    /// A boolean field held something other than 0 or 1.
    #[error("invalid boolean byte: {0:#04x}")]
    InvalidBool(u8),

    /// A string field was not UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    /// A sequence of zero-sized elements declared more entries than allowed.
    #[error("sequence of {len} zero-sized elements exceeds {max}")]
    TooManyElements { len: usize, max: usize },
}

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse TOML config: {source}")]
    Parse {
        #[from]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {source}")]
    Serialize {
        #[from]
        source: toml::ser::Error,
    },

    #[error("failed to merge configuration: {source}")]
    Merge {
        #[from]
        source: config::ConfigError,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
