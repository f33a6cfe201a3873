//! # Grid Map Communications Module
//!
//! Serialisable grid maps, and the request/reply protocol spoken with a remote submap provider.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use chrono::{serde::ts_milliseconds, DateTime, Utc};
use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A serialisable multi-layer grid map.
///
/// Each entry of `data` is one layer (in the same order as `layers`), flattened row-major over
/// `(x cell, y cell)`. Unknown cells are `None`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GridMapMsg {
    /// Reference frame the map is expressed in
    pub frame_id: String,

    /// UTC timestamp of the map
    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Size of each (square) cell in meters
    pub resolution: f64,

    /// Position of the centre of the map in `frame_id`
    pub position: (f64, f64),

    /// Length of the map along each axis in meters
    pub length: (f64, f64),

    /// Number of cells along each axis
    pub num_cells: (usize, usize),

    /// Names of the layers
    pub layers: Vec<String>,

    /// Layer data
    pub data: Vec<Vec<Option<f64>>>,
}

/// Geometry and metadata of a grid map, without any layer data.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GridMapInfo {
    pub frame_id: String,

    #[serde(with = "ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    pub resolution: f64,

    pub length_x: f64,

    pub length_y: f64,

    /// Position of the centre of the map
    pub position: (f64, f64, f64),

    /// Orientation of the map as a quaternion `(x, y, z, w)`. Maps are always axis aligned with
    /// their frame so this is the identity.
    pub orientation: (f64, f64, f64, f64),
}

/// Request for a rectangular region of a map.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SubmapRequest {
    /// Centre of the requested region
    pub position: (f64, f64),

    /// Length of the requested region along each axis
    pub length: (f64, f64),

    /// Layers to return, all layers are returned if this is empty
    pub layers: Vec<String>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Commands that can be sent to a submap provider
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum GridMapCmd {
    GetSubmap(SubmapRequest),
}

/// Replies that can be sent by a submap provider
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum GridMapRep {
    /// The requested submap
    Submap(GridMapMsg),

    /// The provider couldn't produce the submap
    Error(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GridMapMsg {
    /// Number of cells expected in each layer's data
    pub fn cells_per_layer(&self) -> usize {
        self.num_cells.0 * self.num_cells.1
    }
}
