//! # Acquisition
//!
//! Elevation data is either pulled from a remote provider each update, or pushed by a sensor stream.
//! The node starts in pull mode and switches to push mode for good as soon as the first streamed
//! frame arrives.
//!
//! Streamed frames are accumulated into a single elevation map whose geometry is fixed by the first
//! frame. Later frames only replace the elevation layer.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::sync::Arc;

use comms_if::eqpt::elevation::ElevationImage;
use log::info;
use nalgebra::Vector2;
use ndarray::Array2;

use crate::{
    grid_map::{GridMap, GridMapError},
    params::StreamParams,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const ELEVATION_LAYER: &str = "elevation";
pub const UPPER_BOUND_LAYER: &str = "upper_bound";
pub const LOWER_BOUND_LAYER: &str = "lower_bound";
pub const UNCERTAINTY_RANGE_LAYER: &str = "uncertainty_range";

/// Layers every elevation map must provide.
pub const REQUIRED_LAYERS: [&str; 3] = [ELEVATION_LAYER, UPPER_BOUND_LAYER, LOWER_BOUND_LAYER];

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Where elevation maps come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcqMode {
    /// Requested from the map provider on each update
    Pull,

    /// Accumulated from the sensor stream
    Push,
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error(
        "Frame is {got:?} pixels but the stream map was initialised from a {expected:?} frame"
    )]
    WrongSize {
        expected: (usize, usize),
        got: (usize, usize),
    },

    #[error("Couldn't initialise the stream map: {0}")]
    GridMapError(GridMapError),
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Acquisition mode, which can only go from [`AcqMode::Pull`] to [`AcqMode::Push`].
#[derive(Debug)]
pub struct ModeMachine {
    mode: AcqMode,
}

/// Accumulates streamed elevation images into an elevation map.
#[derive(Debug)]
pub struct StreamAccumulator {
    params: StreamParams,

    map: Option<GridMap>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ModeMachine {
    pub fn new() -> Self {
        Self {
            mode: AcqMode::Pull,
        }
    }

    pub fn mode(&self) -> AcqMode {
        self.mode
    }

    /// Signal that a streamed frame arrived.
    ///
    /// Returns `true` if this call switched the mode to push.
    pub fn on_stream_frame(&mut self) -> bool {
        match self.mode {
            AcqMode::Pull => {
                self.mode = AcqMode::Push;
                info!("First elevation frame recieved, switching to push acquisition");
                true
            }
            AcqMode::Push => false,
        }
    }
}

impl Default for ModeMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamAccumulator {
    pub fn new(params: StreamParams) -> Self {
        Self { params, map: None }
    }

    /// Merge a frame into the accumulated map, returning a snapshot of the result.
    ///
    /// The first frame fixes the geometry, a frame of any other size is rejected and leaves the
    /// map untouched.
    pub fn merge(&mut self, image: &ElevationImage) -> Result<Arc<GridMap>, StreamError> {
        let size = (image.image.height() as usize, image.image.width() as usize);

        let mut map = match self.map.take() {
            Some(m) => m,
            None => self.init_map(size)?,
        };

        if map.num_cells() != size {
            let expected = map.num_cells();
            self.map = Some(map);
            return Err(StreamError::WrongSize {
                expected,
                got: size,
            });
        }

        let (min, max) = (self.params.min_height_m, self.params.max_height_m);
        let elevation = Array2::from_shape_fn(size, |(row, col)| {
            let px = image.image.get_pixel(col as u32, row as u32).0[0];
            min + (max - min) * px as f64 / u16::MAX as f64
        });

        // Shapes match, checked above
        map.add_layer_data(ELEVATION_LAYER, elevation)
            .map_err(StreamError::GridMapError)?;
        map.set_timestamp(image.timestamp);

        let snapshot = Arc::new(map.clone());
        self.map = Some(map);

        Ok(snapshot)
    }

    fn init_map(&self, size: (usize, usize)) -> Result<GridMap, StreamError> {
        let res = self.params.resolution_m;

        let mut map = GridMap::new(
            &self.params.frame_id,
            res,
            Vector2::new(size.0 as f64 * res, size.1 as f64 * res),
            self.params.position_m,
        )
        .map_err(StreamError::GridMapError)?;

        map.add_layer(UPPER_BOUND_LAYER, 0.0);
        map.add_layer(LOWER_BOUND_LAYER, 0.0);
        let range = &map.get_layer(UPPER_BOUND_LAYER).map_err(StreamError::GridMapError)?
            - &map.get_layer(LOWER_BOUND_LAYER).map_err(StreamError::GridMapError)?;
        map.add_layer_data(UNCERTAINTY_RANGE_LAYER, range)
            .map_err(StreamError::GridMapError)?;

        info!(
            "Initialised stream map with size {} x {} m ({} x {} cells)",
            map.length().x,
            map.length().y,
            size.0,
            size.1
        );

        Ok(map)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
