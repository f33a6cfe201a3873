//! # Update Orchestrator
//!
//! Drives the acquire then compute pipeline. In pull mode each update waits for the map provider,
//! builds a submap request around the robot in the engine's frame, hands the result to the engine
//! and computes. In push mode updates only recompute from the last streamed map.
//!
//! Locks are always taken in the order provider, orchestrator state, engine.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use comms_if::eqpt::{elevation::ElevationImage, grid_map::SubmapRequest};
use log::{debug, info, warn};
use nalgebra::{Point3, Vector2};

use crate::{
    acq::{AcqMode, ModeMachine, StreamAccumulator, REQUIRED_LAYERS},
    cancel::CancelToken,
    engine::EngineHandle,
    error::TravError,
    grid_map::GridMap,
    params::TravExecParams,
    provider::{MapProvider, ProviderError},
    tf::TransformSource,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Orchestrator {
    /// Frame the submap centre is expressed in
    robot_frame_id: String,

    /// Centre of the requested submap in the robot frame
    map_centre: Vector2<f64>,

    /// Length of the requested submap
    map_length: Vector2<f64>,

    provider_timeout: Duration,

    provider: Mutex<Box<dyn MapProvider>>,

    state: Mutex<OrchestratorState>,

    engine: Arc<EngineHandle>,

    tf: Arc<dyn TransformSource>,

    cancel: CancelToken,
}

struct OrchestratorState {
    mode: ModeMachine,

    /// The elevation map last given to the engine
    last_elevation: Option<Arc<GridMap>>,

    stream: StreamAccumulator,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Orchestrator {
    pub fn new(
        params: &TravExecParams,
        provider: Box<dyn MapProvider>,
        engine: Arc<EngineHandle>,
        tf: Arc<dyn TransformSource>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            robot_frame_id: params.robot_frame_id.clone(),
            map_centre: params.map_centre_m,
            map_length: params.map_length_m,
            provider_timeout: util::time::secs_to_duration(params.provider_timeout_s),
            provider: Mutex::new(provider),
            state: Mutex::new(OrchestratorState {
                mode: ModeMachine::new(),
                last_elevation: None,
                stream: StreamAccumulator::new(params.stream.clone()),
            }),
            engine,
            tf,
            cancel,
        }
    }

    pub fn mode(&self) -> Result<AcqMode, TravError> {
        Ok(self.state.lock()?.mode.mode())
    }

    /// The elevation map last given to the engine.
    pub fn last_elevation(&self) -> Result<Option<Arc<GridMap>>, TravError> {
        Ok(self.state.lock()?.last_elevation.clone())
    }

    /// Run one update cycle.
    ///
    /// In pull mode a new elevation map is requested from the provider first. The traversability
    /// map is then computed, and the update only succeeds if that computation does.
    pub fn trigger_update(&self) -> Result<(), TravError> {
        if self.mode()? == AcqMode::Push {
            debug!("Push acquisition, recomputing from the last streamed map");
            return self.engine.compute();
        }

        let map = Arc::new(self.pull()?);

        let state = self.state.lock()?;
        if state.mode.mode() == AcqMode::Push {
            info!("Switched to push acquisition during the request, discarding the pulled map");
            drop(state);
            return self.engine.compute();
        }

        self.hand_to_engine(state, map)
    }

    /// Merge a streamed elevation frame and compute from the result.
    ///
    /// The first frame switches the node to push acquisition.
    pub fn on_stream_frame(&self, image: &ElevationImage) -> Result<(), TravError> {
        let mut state = self.state.lock()?;

        state.mode.on_stream_frame();

        let map = state
            .stream
            .merge(image)
            .map_err(|e| TravError::InvalidInput(e.to_string()))?;

        self.hand_to_engine(state, map)
    }

    /// Replace the elevation map with one from outside the acquisition pipeline and compute.
    pub fn load_elevation(&self, map: GridMap) -> Result<(), TravError> {
        let state = self.state.lock()?;

        self.hand_to_engine(state, Arc::new(map))
    }

    fn hand_to_engine(
        &self,
        mut state: std::sync::MutexGuard<OrchestratorState>,
        map: Arc<GridMap>,
    ) -> Result<(), TravError> {
        state.last_elevation = Some(map.clone());

        self.engine.set_input_and_compute(map)
    }

    /// Request a new elevation map from the provider.
    fn pull(&self) -> Result<GridMap, TravError> {
        let mut provider = self.provider.lock()?;

        provider
            .wait_for_existence(self.provider_timeout, &self.cancel)
            .map_err(|e| match e {
                ProviderError::Cancelled => TravError::Cancelled,
                e => TravError::ProviderUnavailable(e.to_string()),
            })?;

        let request = self.submap_request()?;

        let map = provider
            .get_submap(&request)
            .map_err(TravError::AcquisitionFailed)?;

        for layer in REQUIRED_LAYERS.iter() {
            if !map.exists(layer) {
                warn!("Provided map has layers {:?}", map.layers());
                return Err(TravError::AcquisitionFailed(ProviderError::MissingLayer(
                    layer.to_string(),
                )));
            }
        }

        Ok(map)
    }

    /// Build the request for the submap around the robot, in the engine's frame.
    pub fn submap_request(&self) -> Result<SubmapRequest, TravError> {
        let frame = self.engine.reference_frame()?;

        let tf = self
            .tf
            .lookup(&frame, &self.robot_frame_id)
            .map_err(TravError::TransformUnavailable)?;
        let centre = tf * Point3::new(self.map_centre.x, self.map_centre.y, 0.0);

        Ok(SubmapRequest {
            position: (centre.x, centre.y),
            length: (self.map_length.x, self.map_length.y),
            layers: REQUIRED_LAYERS.iter().map(|l| l.to_string()).collect(),
        })
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
