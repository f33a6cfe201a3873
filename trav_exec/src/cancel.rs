//! # Cancellation Token
//!
//! Shared shutdown flag which can also be waited on, so blocking waits and timer threads wake up as
//! soon as the node shuts down rather than at the end of their timeout.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Condvar, Mutex},
    time::Duration,
};

use log::info;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Cloneable handle to a shared cancellation flag.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token, waking every thread waiting on it.
    pub fn cancel(&self) {
        let (flag, cvar) = &*self.inner;

        // A poisoned flag can still be set
        match flag.lock() {
            Ok(mut f) => *f = true,
            Err(poisoned) => *poisoned.into_inner() = true,
        }

        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;

        match flag.lock() {
            Ok(f) => *f,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Block for up to `timeout`, returning early if the token is cancelled.
    ///
    /// Returns `true` if the token was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, cvar) = &*self.inner;

        let guard = match flag.lock() {
            Ok(f) => f,
            Err(poisoned) => poisoned.into_inner(),
        };

        match cvar.wait_timeout_while(guard, timeout, |cancelled| !*cancelled) {
            Ok((f, _)) => *f,
            Err(poisoned) => *poisoned.into_inner().0,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Cancel `token` when the process recieves SIGINT or SIGTERM.
///
/// Can only be called once per process.
pub fn install_signal_handler(token: CancelToken) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(on_shutdown_signal(token))
}

fn on_shutdown_signal(token: CancelToken) -> impl FnMut() + Send + 'static {
    move || {
        info!("Recieved shutdown signal");
        token.cancel();
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
