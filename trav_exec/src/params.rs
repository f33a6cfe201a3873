//! # Traversability Executable Parameters
//!
//! This module provides the parameters for the traversability executable, loaded from
//! `trav_exec.toml`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::Vector2;
use serde::Deserialize;

use crate::tf::StaticTransformParams;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct TravExecParams {
    /// Rate at which the traversability map is updated. If zero periodic updates are disabled and
    /// map info requests trigger an update themselves.
    pub min_update_rate_hz: f64,

    /// Frame in which `map_centre_m` is expressed
    pub robot_frame_id: String,

    /// Frame of the traversability map before any elevation has been recieved
    #[serde(default = "default_map_frame_id")]
    pub map_frame_id: String,

    /// Centre of the requested elevation submap in the robot frame
    pub map_centre_m: Vector2<f64>,

    /// Length of the requested elevation submap
    pub map_length_m: Vector2<f64>,

    /// Orientation at which the footprint traversability is computed
    pub footprint_yaw_rad: f64,

    /// Maximum time to wait for the submap provider to become reachable
    #[serde(default = "default_provider_timeout_s")]
    pub provider_timeout_s: f64,

    /// Maximum time a map info request waits for the engine to become ready
    #[serde(default = "default_ready_timeout_s")]
    pub ready_timeout_s: f64,

    /// Maximum age of a stamped transform before it's considered stale
    #[serde(default = "default_transform_max_age_s")]
    pub transform_max_age_s: f64,

    /// Parameter file for the traversability filters, relative to the params directory
    pub filters_file: String,

    /// Parameter file for the robot footprint, relative to the params directory
    pub footprint_file: String,

    /// Geometry of streamed elevation images
    pub stream: StreamParams,

    /// Elevation map load and traversability map save locations
    pub storage: StorageParams,

    /// Fixed transforms between frames
    #[serde(default)]
    pub static_transforms: Vec<StaticTransformParams>,
}

/// Parameters describing how streamed elevation images map onto a grid.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamParams {
    /// Size of one image pixel in meters
    pub resolution_m: f64,

    /// Height of a zero intensity pixel
    pub min_height_m: f64,

    /// Height of a full scale pixel
    pub max_height_m: f64,

    /// Position of the centre of the image
    pub position_m: Vector2<f64>,

    /// Frame the image is expressed in
    pub frame_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageParams {
    /// Archive file the elevation map is loaded from
    pub load_path: String,

    /// Archive file the traversability map is saved to
    pub save_path: String,

    /// Name of the map within the archive files
    pub topic: String,
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn default_map_frame_id() -> String {
    String::from("map")
}

fn default_provider_timeout_s() -> f64 {
    2.0
}

fn default_ready_timeout_s() -> f64 {
    2.0
}

fn default_transform_max_age_s() -> f64 {
    1.0
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Parameters used by the tests of the other modules.
    pub(crate) const TEST_PARAMS: &str = r#"
        min_update_rate_hz = 0.0
        robot_frame_id = "base_link"
        map_centre_m = [0.0, 0.0]
        map_length_m = [5.0, 5.0]
        footprint_yaw_rad = 1.5707963267948966
        provider_timeout_s = 0.2
        ready_timeout_s = 0.2
        filters_file = "trav_filters.toml"
        footprint_file = "trav_footprint.toml"

        [stream]
        resolution_m = 0.05
        min_height_m = 0.0
        max_height_m = 1.0
        position_m = [0.0, 0.0]
        frame_id = "map"

        [storage]
        load_path = "elevation_map.json"
        save_path = "traversability_map.json"
        topic = "grid_map"

        [[static_transforms]]
        parent = "map"
        child = "base_link"
        translation_m = [0.0, 0.0, 0.0]
    "#;

    pub(crate) fn test_params() -> TravExecParams {
        util::params::from_str(TEST_PARAMS).unwrap()
    }

    #[test]
    fn test_load_params() {
        let params = test_params();

        assert_eq!(params.min_update_rate_hz, 0.0);
        assert_eq!(params.map_length_m, Vector2::new(5.0, 5.0));
        assert_eq!(params.transform_max_age_s, 1.0);
        assert_eq!(params.map_frame_id, "map");
        assert_eq!(params.static_transforms.len(), 1);
        assert_eq!(params.stream.frame_id, "map");
    }
}
