//! # Update Scheduler
//!
//! Runs the update cycle at a fixed period on a background thread until cancelled.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, info, warn};

use crate::{cancel::CancelToken, error::TravError};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Scheduler {
    jh: Option<JoinHandle<()>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Scheduler {
    /// Call `update` every `period` until `cancel` is cancelled.
    ///
    /// If `period` is `None` no thread is started. Failed updates are logged and the next one
    /// runs as normal.
    pub fn start<F>(period: Option<Duration>, cancel: CancelToken, update: F) -> Self
    where
        F: Fn() -> Result<(), TravError> + Send + 'static,
    {
        let period = match period {
            Some(p) => p,
            None => {
                info!("Periodic updates disabled");
                return Self { jh: None };
            }
        };

        info!("Running periodic updates every {:.3} s", period.as_secs_f64());

        let jh = thread::spawn(move || {
            while !cancel.wait_timeout(period) {
                match update() {
                    Ok(()) => (),
                    Err(TravError::Cancelled) => break,
                    Err(e) => warn!("Periodic update failed: {}", e),
                }
            }

            debug!("Scheduler stopped");
        });

        Self { jh: Some(jh) }
    }

    pub fn is_running(&self) -> bool {
        self.jh.is_some()
    }

    /// Wait for the scheduler thread to stop. The token passed to `start` must be cancelled first.
    pub fn join(&mut self) {
        if let Some(jh) = self.jh.take() {
            if jh.join().is_err() {
                warn!("Scheduler thread panicked");
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn test_disabled() {
        let mut scheduler = Scheduler::start(None, CancelToken::new(), || Ok(()));

        assert!(!scheduler.is_running());
        scheduler.join();
    }

    #[test]
    fn test_runs_until_cancelled() {
        let cancel = CancelToken::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let mut scheduler = Scheduler::start(
            Some(Duration::from_millis(5)),
            cancel.clone(),
            move || {
                // Failures don't stop the schedule
                match counter.fetch_add(1, Ordering::SeqCst) % 2 {
                    0 => Err(TravError::NotReady),
                    _ => Ok(()),
                }
            },
        );
        assert!(scheduler.is_running());

        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
        scheduler.join();

        let stopped_at = count.load(Ordering::SeqCst);
        assert!(stopped_at >= 3);

        thread::sleep(Duration::from_millis(30));
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[test]
    fn test_stops_on_cancelled_update() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();

        let mut scheduler = Scheduler::start(
            Some(Duration::from_millis(1)),
            CancelToken::new(),
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(TravError::Cancelled)
            },
        );
        scheduler.join();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
