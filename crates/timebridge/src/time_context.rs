//! Thread-local timestamp carrier.
//!
//! Moves one logical timestamp across a call boundary that cannot carry it
//! explicitly, such as a middleware marshaller appending the wire trailer.
//! At most one annotated operation may be in flight per thread:
//!
//! ```text
//!   provide(t) ──▶ [valid, t] ──invalidate()──▶ [empty]
//!        ▲                                         │
//!        └─────────────────────────────────────────┘
//! ```
//!
//! Transactors prefer the explicit [`Stamped`](crate::Stamped) envelope and
//! stage the same value here only for code that reads the thread-local.

use std::cell::Cell;

use timebridge_reactor::LogicalTime;

use crate::ContractViolation;

thread_local! {
    static SLOT: Cell<Option<LogicalTime>> = const { Cell::new(None) };
}

/// Access to the calling thread's timestamp slot.
#[derive(Debug, Clone, Copy)]
pub struct TimestampContext;

impl TimestampContext {
    /// Stages `timestamp`.
    ///
    /// # Panics
    ///
    /// Panics with [`ContractViolation::TimestampAlreadyStaged`] if a value is
    /// already staged on this thread.
    #[track_caller]
    pub fn provide(timestamp: LogicalTime) {
        if let Err(violation) = Self::try_provide(timestamp) {
            violation.fatal();
        }
    }

    pub fn try_provide(timestamp: LogicalTime) -> Result<(), ContractViolation> {
        SLOT.with(|slot| match slot.get() {
            Some(staged) => Err(ContractViolation::TimestampAlreadyStaged { staged }),
            None => {
                slot.set(Some(timestamp));
                Ok(())
            }
        })
    }

    /// The staged timestamp, or `None` if nothing is staged.
    pub fn retrieve() -> Option<LogicalTime> {
        SLOT.with(Cell::get)
    }

    /// Clears the slot.
    ///
    /// # Panics
    ///
    /// Panics with [`ContractViolation::NoTimestampStaged`] if nothing is staged.
    #[track_caller]
    pub fn invalidate() {
        if let Err(violation) = Self::try_invalidate() {
            violation.fatal();
        }
    }

    pub fn try_invalidate() -> Result<(), ContractViolation> {
        SLOT.with(|slot| match slot.take() {
            Some(_) => Ok(()),
            None => Err(ContractViolation::NoTimestampStaged),
        })
    }

    /// Runs `f` with `timestamp` staged, clearing the slot afterwards even if
    /// `f` panics.
    #[track_caller]
    pub fn scoped<R>(timestamp: LogicalTime, f: impl FnOnce() -> R) -> R {
        struct Clear;

        impl Drop for Clear {
            fn drop(&mut self) {
                SLOT.with(Cell::take);
            }
        }

        Self::provide(timestamp);
        let _clear = Clear;
        f()
    }
}
