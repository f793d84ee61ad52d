//! A clock which can be frozen for the current thread.
//!
//! Every time measurement of the state machine and the rolling window goes through
//! [`now`], so tests can drive transitions deterministically with [`freeze`].

use std::cell::Cell;
use std::time::{Duration, Instant};

thread_local!(static FROZEN: Cell<Option<Instant>> = Cell::new(None));

/// A handle to the frozen clock of the current thread.
#[derive(Debug)]
pub struct MockClock {
    _private: (),
}

impl MockClock {
    /// Returns the frozen time.
    pub fn now(&self) -> Instant {
        now()
    }

    /// Moves the frozen time forward.
    pub fn advance(&self, diff: Duration) {
        FROZEN.with(|cell| {
            if let Some(at) = cell.get() {
                cell.set(Some(at + diff));
            }
        })
    }
}

/// Freezes the clock of the current thread for the duration of `f`.
///
/// # Panics
///
/// When the clock of the current thread is already frozen.
pub fn freeze<F, R>(f: F) -> R
where
    F: FnOnce(&MockClock) -> R,
{
    FROZEN.with(|cell| {
        assert!(
            cell.get().is_none(),
            "clock already frozen for this thread"
        );

        // Unfreeze on exit, panics included.
        struct Reset<'a>(&'a Cell<Option<Instant>>);

        impl Drop for Reset<'_> {
            fn drop(&mut self) {
                self.0.set(None);
            }
        }

        let _reset = Reset(cell);
        cell.set(Some(Instant::now()));

        f(&MockClock { _private: () })
    })
}

/// Returns the current time, or the frozen time inside [`freeze`].
pub fn now() -> Instant {
    FROZEN
        .with(|cell| cell.get())
        .unwrap_or_else(Instant::now)
}
