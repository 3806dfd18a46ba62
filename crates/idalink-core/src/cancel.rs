//! Interrupting the analysis wait.
//!
//! The CLI trips a [`CancellationToken`] from its Ctrl+C handler thread. The
//! launcher sleeps on the token between analysis probes, so a trip wakes it
//! at once instead of after the current poll interval.
//!
//! A token only trips while armed. The launcher arms it for the analysis
//! wait alone, so a handler can tell "skip the wait" from "abort" by the
//! return value of [`CancellationToken::cancel`].

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default, Clone, Copy)]
struct Flags {
    armed: bool,
    tripped: bool,
}

#[derive(Debug, Default)]
struct Shared {
    flags: Mutex<Flags>,
    wake: Condvar,
}

/// Shared flag plus a wakeup for sleepers.
///
/// Clones share state: tripping any clone trips all of them.
///
/// ```
/// use idalink_core::cancel::CancellationToken;
///
/// let token = CancellationToken::new();
/// let from_handler = token.clone();
/// assert!(from_handler.cancel());
/// assert!(token.is_cancelled());
///
/// let idle = CancellationToken::disarmed();
/// assert!(!idle.cancel());
/// assert!(!idle.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// An armed token.
    pub fn new() -> Self {
        let token = Self::disarmed();
        token.flags().armed = true;
        token
    }

    /// A token that ignores [`cancel`](Self::cancel) until armed.
    pub fn disarmed() -> Self {
        Self {
            shared: Arc::new(Shared::default()),
        }
    }

    /// Arm the token until the returned guard drops, then restore the
    /// previous state.
    pub fn arm(&self) -> ArmGuard<'_> {
        let was_armed = std::mem::replace(&mut self.flags().armed, true);
        ArmGuard {
            token: self,
            was_armed,
        }
    }

    /// Trip the token and wake every sleeper. Returns false, leaving the
    /// token untouched, while it is disarmed.
    pub fn cancel(&self) -> bool {
        let mut flags = self.flags();
        if !flags.armed {
            return false;
        }
        flags.tripped = true;
        self.shared.wake.notify_all();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.flags().tripped
    }

    /// Block for `duration` or until the token trips, whichever is first.
    pub fn sleep(&self, duration: Duration) -> Result<(), CancelledError> {
        let deadline = Instant::now() + duration;
        let mut flags = self.flags();
        while !flags.tripped {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            flags = match self.shared.wake.wait_timeout(flags, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        Err(CancelledError)
    }

    // Poisoned flags are still valid bools.
    fn flags(&self) -> MutexGuard<'_, Flags> {
        self.shared
            .flags
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Keeps a [`CancellationToken`] armed while alive.
#[derive(Debug)]
pub struct ArmGuard<'a> {
    token: &'a CancellationToken,
    was_armed: bool,
}

impl Drop for ArmGuard<'_> {
    fn drop(&mut self) {
        self.token.flags().armed = self.was_armed;
    }
}

/// The token was tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl fmt::Display for CancelledError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("interrupted by user")
    }
}

impl std::error::Error for CancelledError {}
