//! Parameters for the traversability filters and the robot footprint

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use std::sync::{Arc, RwLock};

use serde::Deserialize;

// -----------------------------------------------------------------------------------------------
// TYPES
// -----------------------------------------------------------------------------------------------

/// Engine parameters shared between the engine and the configuration service which reloads them.
pub type SharedEngineParams = Arc<RwLock<EngineParams>>;

// -----------------------------------------------------------------------------------------------
// STRUCTS
// -----------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct EngineParams {
    pub filters: FilterParams,

    pub footprint: FootprintParams,
}

/// Filter parameters, loaded from `trav_filters.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterParams {
    pub slope: SlopeParams,

    pub step: StepParams,

    pub roughness: RoughnessParams,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SlopeParams {
    /// Slope at and above which a cell is untraversable
    pub critical_slope_rad: f64,

    /// Weight of the slope score in the total traversability
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StepParams {
    /// Height difference within the window at and above which a cell is untraversable
    pub critical_step_m: f64,

    /// Radius of the window around each cell
    pub window_radius_m: f64,

    /// Weight of the step score in the total traversability
    pub weight: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoughnessParams {
    /// Standard deviation of height within the window at and above which a cell is
    /// untraversable
    pub critical_roughness_m: f64,

    /// Radius of the window around each cell
    pub window_radius_m: f64,

    /// Weight of the roughness score in the total traversability
    pub weight: f64,
}

/// Footprint parameters, loaded from `trav_footprint.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct FootprintParams {
    /// Polygonal footprint of the robot in its own frame. If empty the circular footprint is used.
    #[serde(default)]
    pub polygon_m: Vec<[f64; 2]>,

    /// Radius of the circular footprint of the robot
    pub radius_m: f64,

    /// Traversability assumed for unknown cells when checking non-conservative paths
    pub traversability_default: f64,
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl FilterParams {
    /// Number of cells either side of the centre cell covered by a window of the given radius.
    pub fn window_cells(radius_m: f64, resolution: f64) -> usize {
        if radius_m > 0.0 {
            (radius_m / resolution).round() as usize
        } else {
            0
        }
    }
}

impl EngineParams {
    /// Load the filter and footprint parameter files, which are relative to the params directory.
    pub fn load(filters_file: &str, footprint_file: &str) -> Result<Self, util::params::LoadError> {
        Ok(Self {
            filters: util::params::load(filters_file)?,
            footprint: util::params::load(footprint_file)?,
        })
    }

    pub fn into_shared(self) -> SharedEngineParams {
        Arc::new(RwLock::new(self))
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
