//! Shutdown token shared between a session and the threads waiting on it.
//!
//! Unlike a bare flag, waiters can block until the token fires, which is what
//! `wait_for_disconnect` and the broker host's main loop need.

use crate::{RelayError, Result};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A one-way shutdown signal.
///
/// Clones share state: cancelling any clone wakes every waiter on every clone.
///
/// # Example
///
/// ```
/// use relay_core::shutdown::ShutdownToken;
///
/// let token = ShutdownToken::new();
/// let waiter = token.clone();
/// let handle = std::thread::spawn(move || waiter.wait());
///
/// token.cancel();
/// handle.join().unwrap();
/// assert!(token.is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token and wake all waiters.
    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until the token fires.
    pub fn wait(&self) {
        let (flag, signal) = &*self.inner;
        let mut fired = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*fired {
            fired = signal.wait(fired).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until the token fires or `timeout` elapses.
    ///
    /// Returns `true` if the token fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, signal) = &*self.inner;
        let mut fired = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*fired {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            fired = signal
                .wait_timeout(fired, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    /// Return a `Disconnected` error if the token fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RelayError::disconnected("session is shut down"))
        } else {
            Ok(())
        }
    }
}
