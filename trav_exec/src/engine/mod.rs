//! # Traversability Engine
//!
//! The engine turns an elevation map into a traversability map and answers path queries against
//! it. [`TravEngine`] is the interface the rest of the node talks to, [`FilterEngine`] is the
//! reference implementation.
//!
//! The engine is shared between the request server, the timer and the stream subscriber through
//! an [`EngineHandle`], which also tracks readiness so callers can wait for the first successful
//! computation.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use comms_if::eqpt::trav::{FootprintPath, TravResult};
use log::debug;
use util::params::LoadError;

use crate::{
    error::TravError,
    grid_map::{GridMap, GridMapError},
};

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod filter;
pub mod footprint;
pub mod params;

pub use filter::FilterEngine;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Computes traversability from elevation and answers queries against the result.
pub trait TravEngine: Send {
    /// Replace the elevation input. Doesn't compute anything.
    fn set_elevation_input(&mut self, map: Arc<GridMap>) -> Result<(), EngineError>;

    /// Compute the traversability map from the current input.
    ///
    /// On failure the previous traversability map is kept.
    fn compute(&mut self) -> Result<(), EngineError>;

    /// True once at least one computation has succeeded.
    fn is_ready(&self) -> bool;

    /// Snapshot of the current traversability map.
    fn traversability_map(&self) -> Option<Arc<GridMap>>;

    /// Check a single path against the current traversability map.
    fn check_path(&self, path: &FootprintPath) -> Result<TravResult, EngineError>;

    /// Score the robot's footprint at the given yaw for every cell of the map.
    fn score_footprint(&mut self, yaw: f64) -> Result<(), EngineError>;

    /// Reconfigure the filters from the current parameters.
    fn reload_filters(&mut self) -> Result<(), EngineError>;

    /// Frame the engine's maps are expressed in.
    fn reference_frame(&self) -> String;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Thread safe access to a [`TravEngine`] with readiness notification.
pub struct EngineHandle {
    engine: Mutex<Box<dyn TravEngine>>,

    ready: Mutex<ReadyState>,

    ready_cvar: Condvar,
}

#[derive(Debug, Default)]
struct ReadyState {
    ready: bool,
    cancelled: bool,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No elevation input has been provided")]
    NoInput,

    #[error("The elevation input has no \"{0}\" layer")]
    MissingLayer(String),

    #[error("The elevation input contains no known cells")]
    NoValidElevation,

    #[error("No traversability map has been computed")]
    NotReady,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Grid map error: {0}")]
    GridMapError(GridMapError),

    #[error("Couldn't load engine parameters: {0}")]
    ParamLoadError(LoadError),

    #[error("Engine parameters are invalid: {0}")]
    InvalidParams(String),

    #[error("The engine parameter lock is poisoned")]
    PoisonError,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl EngineHandle {
    pub fn new(engine: Box<dyn TravEngine>) -> Self {
        let ready = engine.is_ready();

        Self {
            engine: Mutex::new(engine),
            ready: Mutex::new(ReadyState {
                ready,
                cancelled: false,
            }),
            ready_cvar: Condvar::new(),
        }
    }

    /// Lock the engine for direct access.
    ///
    /// Readiness isn't updated by anything done through this guard, use [`EngineHandle::compute`]
    /// to run computations.
    pub fn lock(&self) -> Result<MutexGuard<Box<dyn TravEngine>>, TravError> {
        Ok(self.engine.lock()?)
    }

    /// Replace the engine's input and compute from it as a single step.
    pub fn set_input_and_compute(&self, map: Arc<GridMap>) -> Result<(), TravError> {
        let mut engine = self.lock()?;

        engine
            .set_elevation_input(map)
            .map_err(TravError::ComputationFailed)?;

        self.compute_locked(&mut engine)
    }

    /// Compute the traversability map from the engine's current input.
    pub fn compute(&self) -> Result<(), TravError> {
        let mut engine = self.lock()?;

        self.compute_locked(&mut engine)
    }

    fn compute_locked(&self, engine: &mut Box<dyn TravEngine>) -> Result<(), TravError> {
        let result = engine.compute();

        // Update readiness whatever happened, a failed compute keeps the previous map
        let is_ready = engine.is_ready();
        self.ready.lock()?.ready = is_ready;
        if is_ready {
            self.ready_cvar.notify_all();
        }

        match result {
            Ok(()) => {
                debug!("Traversability map computed");
                Ok(())
            }
            Err(e) => Err(TravError::ComputationFailed(e)),
        }
    }

    pub fn is_ready(&self) -> bool {
        match self.ready.lock() {
            Ok(r) => r.ready,
            Err(_) => false,
        }
    }

    /// Block until the engine is ready, for at most `timeout`.
    ///
    /// Returns [`TravError::NotReady`] if the timeout expires and [`TravError::Cancelled`] if the
    /// handle is cancelled while waiting.
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), TravError> {
        let guard = self.ready.lock()?;

        let (state, _) = self
            .ready_cvar
            .wait_timeout_while(guard, timeout, |s| !s.ready && !s.cancelled)?;

        if state.cancelled {
            Err(TravError::Cancelled)
        } else if state.ready {
            Ok(())
        } else {
            Err(TravError::NotReady)
        }
    }

    /// Wake up all waiters, which then return [`TravError::Cancelled`].
    pub fn cancel(&self) {
        match self.ready.lock() {
            Ok(mut s) => s.cancelled = true,
            Err(poisoned) => poisoned.into_inner().cancelled = true,
        }

        self.ready_cvar.notify_all();
    }

    /// Snapshot of the current traversability map, or [`TravError::NotReady`] if there isn't one.
    pub fn traversability_map(&self) -> Result<Arc<GridMap>, TravError> {
        self.lock()?.traversability_map().ok_or(TravError::NotReady)
    }

    pub fn reference_frame(&self) -> Result<String, TravError> {
        Ok(self.lock()?.reference_frame())
    }
}

impl From<GridMapError> for EngineError {
    fn from(e: GridMapError) -> Self {
        Self::GridMapError(e)
    }
}

impl From<LoadError> for EngineError {
    fn from(e: LoadError) -> Self {
        Self::ParamLoadError(e)
    }
}

impl<G> From<PoisonError<G>> for EngineError {
    fn from(_: PoisonError<G>) -> Self {
        Self::PoisonError
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        thread,
        time::Instant,
    };

    /// Engine which copies its input to its output, optionally failing every compute.
    pub(crate) struct MockEngine {
        pub input: Option<Arc<GridMap>>,
        pub output: Option<Arc<GridMap>>,
        pub fail_compute: bool,
        pub frame: String,
        pub computes: Arc<AtomicUsize>,
        pub path_results: Vec<Result<TravResult, String>>,
    }

    impl MockEngine {
        pub(crate) fn new(frame: &str) -> Self {
            Self {
                input: None,
                output: None,
                fail_compute: false,
                frame: frame.to_string(),
                computes: Arc::new(AtomicUsize::new(0)),
                path_results: Vec::new(),
            }
        }
    }

    impl TravEngine for MockEngine {
        fn set_elevation_input(&mut self, map: Arc<GridMap>) -> Result<(), EngineError> {
            self.input = Some(map);
            Ok(())
        }

        fn compute(&mut self) -> Result<(), EngineError> {
            self.computes.fetch_add(1, Ordering::SeqCst);

            if self.fail_compute {
                return Err(EngineError::InvalidParams("mock failure".into()));
            }

            let input = self.input.clone().ok_or(EngineError::NoInput)?;
            let mut output = (*input).clone();
            output.add_layer("traversability", 1.0);
            self.output = Some(Arc::new(output));

            Ok(())
        }

        fn is_ready(&self) -> bool {
            self.output.is_some()
        }

        fn traversability_map(&self) -> Option<Arc<GridMap>> {
            self.output.clone()
        }

        fn check_path(&self, path: &FootprintPath) -> Result<TravResult, EngineError> {
            if self.output.is_none() {
                return Err(EngineError::NotReady);
            }

            // The pose count picks the canned result, so tests can order them
            match self.path_results.get(path.poses.len()) {
                Some(Ok(r)) => Ok(*r),
                Some(Err(m)) => Err(EngineError::InvalidPath(m.clone())),
                None => Ok(TravResult {
                    is_safe: true,
                    traversability: path.poses.len() as f64,
                    area: 0.0,
                }),
            }
        }

        fn score_footprint(&mut self, _yaw: f64) -> Result<(), EngineError> {
            let output = self.output.as_ref().ok_or(EngineError::NotReady)?;
            let mut map = (**output).clone();
            map.add_layer("traversability_footprint", 1.0);
            self.output = Some(Arc::new(map));
            Ok(())
        }

        fn reload_filters(&mut self) -> Result<(), EngineError> {
            Ok(())
        }

        fn reference_frame(&self) -> String {
            self.frame.clone()
        }
    }

    fn elevation_map() -> Arc<GridMap> {
        let mut map = GridMap::new(
            "map",
            0.1,
            nalgebra::Vector2::new(1.0, 1.0),
            nalgebra::Vector2::zeros(),
        )
        .unwrap();
        map.add_layer("elevation", 0.0);
        Arc::new(map)
    }

    #[test]
    fn test_wait_ready_times_out() {
        let handle = EngineHandle::new(Box::new(MockEngine::new("map")));

        let start = Instant::now();
        assert!(matches!(
            handle.wait_ready(Duration::from_millis(20)),
            Err(TravError::NotReady)
        ));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_compute_wakes_waiter() {
        let handle = Arc::new(EngineHandle::new(Box::new(MockEngine::new("map"))));
        let waiter = handle.clone();

        let jh = thread::spawn(move || waiter.wait_ready(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        handle.set_input_and_compute(elevation_map()).unwrap();

        assert!(jh.join().unwrap().is_ok());
        assert!(handle.is_ready());
    }

    #[test]
    fn test_cancel_wakes_waiter() {
        let handle = Arc::new(EngineHandle::new(Box::new(MockEngine::new("map"))));
        let waiter = handle.clone();

        let jh = thread::spawn(move || waiter.wait_ready(Duration::from_secs(10)));

        thread::sleep(Duration::from_millis(20));
        handle.cancel();

        assert!(matches!(jh.join().unwrap(), Err(TravError::Cancelled)));
    }

    #[test]
    fn test_failed_compute_keeps_previous_map() {
        let before = Arc::new((*elevation_map()).clone());
        let failing = MockEngine {
            fail_compute: true,
            output: Some(before.clone()),
            ..MockEngine::new("map")
        };
        let handle = EngineHandle::new(Box::new(failing));
        assert!(handle.is_ready());

        assert!(matches!(
            handle.set_input_and_compute(elevation_map()),
            Err(TravError::ComputationFailed(_))
        ));
        assert!(handle.is_ready());
        assert!(Arc::ptr_eq(&handle.traversability_map().unwrap(), &before));
    }
}
