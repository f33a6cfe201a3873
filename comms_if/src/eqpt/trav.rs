//! # Traversability Server Communications Module
//!
//! Requests accepted by the traversability executable's request server, and the replies it sends.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::grid_map::{GridMapInfo, GridMapMsg, SubmapRequest};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A single pose along a footprint path, in the traversability map's frame.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct PathPose {
    pub x: f64,
    pub y: f64,

    /// Heading about the frame's z axis in radians
    pub yaw: f64,
}

/// A candidate robot trajectory to check for traversability.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FootprintPath {
    /// Ordered poses of the robot along the path
    pub poses: Vec<PathPose>,

    /// Radius of the robot, used when `footprint` is empty
    pub radius: f64,

    /// Polygonal footprint of the robot in its own frame, rotated by each pose's yaw.
    #[serde(default)]
    pub footprint: Vec<(f64, f64)>,

    /// If set, unknown cells under the footprint make the path unsafe.
    #[serde(default = "default_conservative")]
    pub conservative: bool,
}

/// The verdict on a single [`FootprintPath`].
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct TravResult {
    /// True if every pose of the path is traversable
    pub is_safe: bool,

    /// Mean traversability over all cells under the footprint along the path, in [0, 1]
    pub traversability: f64,

    /// Total area covered by the footprint along the path in square meters
    pub area: f64,
}

/// Error information sent back to a caller.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct TravServerError {
    pub kind: TravErrorKind,
    pub message: String,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Commands that can be sent to the traversability server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum TravCmd {
    /// Load the stored elevation map and compute traversability from it
    LoadElevationMap,

    /// Run one update cycle now and report the resulting map geometry
    UpdateTraversability,

    /// Get the geometry of the current traversability map
    GetMapInfo,

    /// Get a region of the current traversability map
    GetTraversability(SubmapRequest),

    /// Check a batch of footprint paths
    CheckFootprintPath(Vec<FootprintPath>),

    /// Score the robot footprint at the configured orientation
    TraversabilityFootprint,

    /// Reload the traversability filter configuration
    UpdateParameters,

    /// Save the current traversability map to storage
    SaveToStorage,
}

/// Replies that can be sent by the traversability server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum TravRep {
    Ok,

    MapInfo(GridMapInfo),

    Map(GridMapMsg),

    PathResults(Vec<TravResult>),

    Error(TravServerError),
}

/// Category of a failed request
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum TravErrorKind {
    ProviderUnavailable,
    TransformUnavailable,
    AcquisitionFailed,
    ComputationFailed,
    QueryOutOfBounds,
    InvalidInput,
    StorageFailed,
    NotReady,
    Cancelled,
    ReloadFailed,
    Internal,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_conservative() -> bool {
    true
}
