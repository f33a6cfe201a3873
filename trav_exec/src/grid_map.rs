//! # Grid Map
//!
//! [`GridMap`] is inspired by
//! [grid_map](https://github.com/ANYbotics/grid_map) by ANYbotics. The
//! [paper](https://www.researchgate.net/publication/284415855_A_Universal_Grid_Map_Library_Implementation_and_Use_Case_for_Rough_Terrain_Navigation)
//! gives a good intro the concepts behind `grid_map`.
//!
//! Cell `(0, 0)` is the corner of the map at `position + length / 2`, cell indices increase
//! towards negative x and y. All layers share the same geometry.

// ------------------------------------------------------------------------------------------------
// INCLUDES
// ------------------------------------------------------------------------------------------------

use std::{collections::HashMap, convert::TryFrom};

use chrono::{DateTime, Utc};
use comms_if::eqpt::grid_map::{GridMapInfo, GridMapMsg};
use nalgebra::Vector2;
use ndarray::{concatenate, s, Array2, Array3, ArrayView2, ArrayViewMut2, Axis};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Tolerance, in cells, used when converting between positions and cell indices.
const CELL_EPSILON: f64 = 1e-6;

/// Largest number of cells allowed in a single layer of a map.
pub const MAX_CELLS: usize = 1 << 26;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A grid-based map containing many named layers of `f64` data.
///
/// Unknown cells hold `NaN`.
#[derive(Clone, Debug, PartialEq)]
pub struct GridMap {
    /// Reference frame the map is expressed in
    frame_id: String,

    /// Time at which the map data was acquired
    timestamp: DateTime<Utc>,

    /// The size of each grid cell in meters
    resolution: f64,

    /// Position of the centre of the map
    position: Vector2<f64>,

    /// The length of each axis of the map in meters
    length: Vector2<f64>,

    /// The number of cells in each axis of the map
    num_cells: (usize, usize),

    /// Layer names in storage order
    layers: Vec<String>,

    /// A map between layer name and index into the map data array
    layer_map: HashMap<String, usize>,

    /// Raw map data, a 3D array with dimension order layer, x cell, y cell
    data: Array3<f64>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum GridMapError {
    #[error("Requested position or cell outside map bounds")]
    OutsideMap,

    #[error("Attempted to access unknown layer \"{0}\"")]
    UnknownLayer(String),

    #[error("Provided array shape doesn't match the expected shape")]
    IncompatibleShape,

    #[error("Invalid map geometry: {0}")]
    InvalidGeometry(String),

    #[error("The requested submap doesn't cover at least one cell of the map")]
    SubmapOutOfBounds,

    #[error("Malformed grid map message: {0}")]
    MalformedMessage(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GridMap {
    /// Create a new grid map with no layers.
    ///
    /// The number of cells is `length / resolution` rounded to the nearest integer, and the
    /// length of the map is then adjusted to be an exact number of cells.
    pub fn new(
        frame_id: &str,
        resolution: f64,
        length: Vector2<f64>,
        position: Vector2<f64>,
    ) -> Result<Self, GridMapError> {
        if !(resolution > 0.0 && resolution.is_finite()) {
            return Err(GridMapError::InvalidGeometry(format!(
                "resolution must be positive, got {}",
                resolution
            )));
        }

        if !(length.iter().all(|v| v.is_finite()) && position.iter().all(|v| v.is_finite())) {
            return Err(GridMapError::InvalidGeometry(format!(
                "length {:?} and position {:?} must be finite",
                (length.x, length.y),
                (position.x, position.y)
            )));
        }

        let num_cells = (
            (length.x / resolution).round(),
            (length.y / resolution).round(),
        );
        if !(num_cells.0 >= 1.0 && num_cells.1 >= 1.0) {
            return Err(GridMapError::InvalidGeometry(format!(
                "length {:?} is smaller than one cell of {} m",
                (length.x, length.y),
                resolution
            )));
        }

        // Checked in floating point so huge lengths can't saturate the cast below
        if num_cells.0 * num_cells.1 > MAX_CELLS as f64 {
            return Err(GridMapError::InvalidGeometry(format!(
                "length {:?} at {} m gives more than {} cells",
                (length.x, length.y),
                resolution,
                MAX_CELLS
            )));
        }
        let num_cells = (num_cells.0 as usize, num_cells.1 as usize);

        Ok(Self {
            frame_id: frame_id.to_string(),
            timestamp: Utc::now(),
            resolution,
            position,
            length: Vector2::new(
                num_cells.0 as f64 * resolution,
                num_cells.1 as f64 * resolution,
            ),
            num_cells,
            layers: Vec::new(),
            layer_map: HashMap::new(),
            data: Array3::zeros((0, num_cells.0, num_cells.1)),
        })
    }

    // ---- GEOMETRY ----

    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn set_frame_id(&mut self, frame_id: &str) {
        self.frame_id = frame_id.to_string();
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn set_timestamp(&mut self, timestamp: DateTime<Utc>) {
        self.timestamp = timestamp;
    }

    pub fn resolution(&self) -> f64 {
        self.resolution
    }

    pub fn position(&self) -> Vector2<f64> {
        self.position
    }

    pub fn length(&self) -> Vector2<f64> {
        self.length
    }

    pub fn num_cells(&self) -> (usize, usize) {
        self.num_cells
    }

    /// Geometry and metadata of the map.
    pub fn info(&self) -> GridMapInfo {
        GridMapInfo {
            frame_id: self.frame_id.clone(),
            timestamp: self.timestamp,
            resolution: self.resolution,
            length_x: self.length.x,
            length_y: self.length.y,
            position: (self.position.x, self.position.y, 0.0),
            orientation: (0.0, 0.0, 0.0, 1.0),
        }
    }

    /// Position of the corner of cell (0, 0), the maximum x and y of the map.
    fn upper_left(&self) -> Vector2<f64> {
        self.position + self.length * 0.5
    }

    /// Position of the opposite corner to cell (0, 0), the minimum x and y of the map.
    fn lower_right(&self) -> Vector2<f64> {
        self.position - self.length * 0.5
    }

    pub fn position_in_map(&self, position: &Vector2<f64>) -> bool {
        let ul = self.upper_left();
        let lr = self.lower_right();

        position.x <= ul.x && position.x >= lr.x && position.y <= ul.y && position.y >= lr.y
    }

    pub fn cell_in_map(&self, cell: (usize, usize)) -> bool {
        cell.0 < self.num_cells.0 && cell.1 < self.num_cells.1
    }

    /// Position of the centre of the given cell.
    pub fn cell_position(&self, cell: (usize, usize)) -> Result<Vector2<f64>, GridMapError> {
        if !self.cell_in_map(cell) {
            return Err(GridMapError::OutsideMap);
        }

        Ok(self.upper_left()
            - Vector2::new(cell.0 as f64 + 0.5, cell.1 as f64 + 0.5) * self.resolution)
    }

    /// The cell containing the given position.
    pub fn position_to_cell(&self, position: &Vector2<f64>) -> Result<(usize, usize), GridMapError> {
        if !self.position_in_map(position) {
            return Err(GridMapError::OutsideMap);
        }

        let idx = (self.upper_left() - position) / self.resolution;

        // Positions on the lower boundary belong to the last cell
        Ok((
            (idx.x.floor() as usize).min(self.num_cells.0 - 1),
            (idx.y.floor() as usize).min(self.num_cells.1 - 1),
        ))
    }

    // ---- LAYERS ----

    pub fn layers(&self) -> &[String] {
        &self.layers
    }

    pub fn exists(&self, layer: &str) -> bool {
        self.layer_map.contains_key(layer)
    }

    fn layer_index(&self, layer: &str) -> Result<usize, GridMapError> {
        match self.layer_map.get(layer) {
            Some(l) => Ok(*l),
            None => Err(GridMapError::UnknownLayer(layer.to_string())),
        }
    }

    /// Add a layer filled with `value`, or refill it if it already exists.
    pub fn add_layer(&mut self, layer: &str, value: f64) {
        let data = Array2::from_elem(self.num_cells, value);

        // Shape always matches since we built it from num_cells
        self.add_layer_data(layer, data).ok();
    }

    /// Add a layer with the given data, replacing any existing layer of the same name.
    pub fn add_layer_data(&mut self, layer: &str, data: Array2<f64>) -> Result<(), GridMapError> {
        if data.dim() != self.num_cells {
            return Err(GridMapError::IncompatibleShape);
        }

        if let Ok(idx) = self.layer_index(layer) {
            self.data.slice_mut(s![idx, .., ..]).assign(&data);
            return Ok(());
        }

        self.data = concatenate(Axis(0), &[self.data.view(), data.insert_axis(Axis(0)).view()])
            .map_err(|_| GridMapError::IncompatibleShape)?;
        self.layer_map.insert(layer.to_string(), self.layers.len());
        self.layers.push(layer.to_string());

        Ok(())
    }

    pub fn get_layer(&self, layer: &str) -> Result<ArrayView2<f64>, GridMapError> {
        let idx = self.layer_index(layer)?;

        Ok(self.data.slice(s![idx, .., ..]))
    }

    pub fn get_layer_mut(&mut self, layer: &str) -> Result<ArrayViewMut2<f64>, GridMapError> {
        let idx = self.layer_index(layer)?;

        Ok(self.data.slice_mut(s![idx, .., ..]))
    }

    pub fn get(&self, layer: &str, cell: (usize, usize)) -> Result<f64, GridMapError> {
        let idx = self.layer_index(layer)?;

        if !self.cell_in_map(cell) {
            return Err(GridMapError::OutsideMap);
        }

        Ok(self.data[[idx, cell.0, cell.1]])
    }

    pub fn get_position(&self, layer: &str, position: &Vector2<f64>) -> Result<f64, GridMapError> {
        let cell = self.position_to_cell(position)?;

        self.get(layer, cell)
    }

    /// Return a copy of this map containing only the given layers, in the given order.
    pub fn with_layers(&self, layers: &[String]) -> Result<Self, GridMapError> {
        let indices = layers
            .iter()
            .map(|l| self.layer_index(l))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            data: self.data.select(Axis(0), &indices),
            layers: layers.to_vec(),
            layer_map: layers
                .iter()
                .enumerate()
                .map(|(i, l)| (l.clone(), i))
                .collect(),
            ..self.clone_geometry()
        })
    }

    /// Extract the region of the map centred on `position` with the given `length`.
    ///
    /// The requested rectangle is clipped to the bounds of the map. If what remains doesn't
    /// cover at least one full cell along each axis [`GridMapError::SubmapOutOfBounds`] is
    /// returned.
    pub fn submap(&self, position: &Vector2<f64>, length: &Vector2<f64>) -> Result<Self, GridMapError> {
        if !(length.x > 0.0 && length.y > 0.0) {
            return Err(GridMapError::InvalidGeometry(format!(
                "submap length must be positive, got {:?}",
                (length.x, length.y)
            )));
        }

        let ul = self.upper_left();
        let lr = self.lower_right();

        // Intersection of the request with the map
        let top = (position + length * 0.5).zip_map(&ul, f64::min);
        let bottom = (position - length * 0.5).zip_map(&lr, f64::max);
        let extent = top - bottom;
        if extent.x < self.resolution * (1.0 - CELL_EPSILON)
            || extent.y < self.resolution * (1.0 - CELL_EPSILON)
        {
            return Err(GridMapError::SubmapOutOfBounds);
        }

        let start = (ul - top) / self.resolution;
        let end = (ul - bottom) / self.resolution;
        let start = (
            (start.x + CELL_EPSILON).floor() as usize,
            (start.y + CELL_EPSILON).floor() as usize,
        );
        let end = (
            ((end.x - CELL_EPSILON).ceil() as usize).min(self.num_cells.0),
            ((end.y - CELL_EPSILON).ceil() as usize).min(self.num_cells.1),
        );
        if end.0 <= start.0 || end.1 <= start.1 {
            return Err(GridMapError::SubmapOutOfBounds);
        }

        let num_cells = (end.0 - start.0, end.1 - start.1);
        let sub_position = ul
            - Vector2::new(
                (start.0 + end.0) as f64 * 0.5,
                (start.1 + end.1) as f64 * 0.5,
            ) * self.resolution;

        Ok(Self {
            position: sub_position,
            length: Vector2::new(num_cells.0 as f64, num_cells.1 as f64) * self.resolution,
            num_cells,
            data: self
                .data
                .slice(s![.., start.0..end.0, start.1..end.1])
                .to_owned(),
            ..self.clone_geometry()
        })
    }

    /// Clone everything but the layer data, which is left empty.
    fn clone_geometry(&self) -> Self {
        Self {
            frame_id: self.frame_id.clone(),
            timestamp: self.timestamp,
            resolution: self.resolution,
            position: self.position,
            length: self.length,
            num_cells: self.num_cells,
            layers: self.layers.clone(),
            layer_map: self.layer_map.clone(),
            data: Array3::zeros((0, 0, 0)),
        }
    }
}

impl From<&GridMap> for GridMapMsg {
    fn from(map: &GridMap) -> Self {
        let data = map
            .layers
            .iter()
            .enumerate()
            .map(|(i, _)| {
                map.data
                    .index_axis(Axis(0), i)
                    .iter()
                    .map(|&v| if v.is_nan() { None } else { Some(v) })
                    .collect()
            })
            .collect();

        Self {
            frame_id: map.frame_id.clone(),
            timestamp: map.timestamp,
            resolution: map.resolution,
            position: (map.position.x, map.position.y),
            length: (map.length.x, map.length.y),
            num_cells: map.num_cells,
            layers: map.layers.clone(),
            data,
        }
    }
}

impl TryFrom<GridMapMsg> for GridMap {
    type Error = GridMapError;

    fn try_from(msg: GridMapMsg) -> Result<Self, Self::Error> {
        let mut map = GridMap::new(
            &msg.frame_id,
            msg.resolution,
            Vector2::new(msg.length.0, msg.length.1),
            Vector2::new(msg.position.0, msg.position.1),
        )?;
        map.set_timestamp(msg.timestamp);

        if map.num_cells != msg.num_cells {
            return Err(GridMapError::MalformedMessage(format!(
                "length {:?} at resolution {} gives {:?} cells but the message has {:?}",
                msg.length, msg.resolution, map.num_cells, msg.num_cells
            )));
        }

        if msg.layers.len() != msg.data.len() {
            return Err(GridMapError::MalformedMessage(format!(
                "{} layer names but {} layers of data",
                msg.layers.len(),
                msg.data.len()
            )));
        }

        for (layer, values) in msg.layers.iter().zip(msg.data.into_iter()) {
            if values.len() != map.num_cells.0 * map.num_cells.1 {
                return Err(GridMapError::MalformedMessage(format!(
                    "layer \"{}\" has {} values, expected {}",
                    layer,
                    values.len(),
                    map.num_cells.0 * map.num_cells.1
                )));
            }

            let values = values
                .into_iter()
                .map(|v| v.unwrap_or(f64::NAN))
                .collect::<Vec<_>>();
            let data = Array2::from_shape_vec(map.num_cells, values)
                .map_err(|_| GridMapError::IncompatibleShape)?;
            map.add_layer_data(layer, data)?;
        }

        Ok(map)
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    /// 2 x 3 m map at 1 m centred on (10, 15), with a layer whose value encodes the cell index.
    fn indexed_map() -> GridMap {
        let mut map = GridMap::new(
            "map",
            1.0,
            Vector2::new(20.0, 30.0),
            Vector2::new(10.0, 15.0),
        )
        .unwrap();
        let data = Array2::from_shape_fn((20, 30), |(x, y)| (x * 100 + y) as f64);
        map.add_layer_data("index", data).unwrap();
        map.add_layer("zero", 0.0);
        map
    }

    #[test]
    fn test_grid_map() -> Result<(), GridMapError> {
        let map = indexed_map();

        assert_eq!(map.num_cells(), (20, 30));

        // Test out of bounds detection
        assert!(map.position_in_map(&Vector2::new(10.0, 15.0)));
        assert!(map.position_in_map(&Vector2::new(0.0, 0.0)));
        assert!(map.position_in_map(&Vector2::new(20.0, 30.0)));
        assert_eq!(map.position_in_map(&Vector2::new(-20.0, 30.0)), false);
        assert_eq!(map.position_in_map(&Vector2::new(20.1, 30.0)), false);

        // Test position->cell
        assert_eq!(map.position_to_cell(&Vector2::new(20.0, 30.0))?, (0, 0));
        assert_eq!(map.position_to_cell(&Vector2::new(10.0, 10.0))?, (10, 20));
        assert_eq!(map.position_to_cell(&Vector2::new(5.9, 12.5))?, (14, 17));
        assert_eq!(map.position_to_cell(&Vector2::new(0.0, 0.0))?, (19, 29));

        // Test cell->position
        assert_eq!(map.cell_position((0, 0))?, Vector2::new(19.5, 29.5));
        assert_eq!(map.cell_position((10, 20))?, Vector2::new(9.5, 9.5));
        assert_eq!(map.cell_position((14, 17))?, Vector2::new(5.5, 12.5));
        assert_eq!(map.cell_position((20, 0)), Err(GridMapError::OutsideMap));

        assert_eq!(map.get_position("index", &Vector2::new(5.9, 12.5))?, 1417.0);
        assert_eq!(
            map.get("missing", (0, 0)),
            Err(GridMapError::UnknownLayer("missing".into()))
        );

        Ok(())
    }

    #[test]
    fn test_length_snaps_to_cells() {
        let map = GridMap::new("map", 0.1, Vector2::new(5.0, 5.0), Vector2::zeros()).unwrap();
        assert_eq!(map.num_cells(), (50, 50));
        assert!((map.length().x - 5.0).abs() < 1e-9);

        assert!(matches!(
            GridMap::new("map", 0.0, Vector2::new(5.0, 5.0), Vector2::zeros()),
            Err(GridMapError::InvalidGeometry(_))
        ));
        assert!(matches!(
            GridMap::new("map", 1.0, Vector2::new(0.2, 5.0), Vector2::zeros()),
            Err(GridMapError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_huge_or_non_finite_geometry() {
        for length in &[
            Vector2::new(1e300, 1e300),
            Vector2::new(1e5, 1e5),
            Vector2::new(f64::NAN, 5.0),
            Vector2::new(f64::INFINITY, 5.0),
        ] {
            assert!(matches!(
                GridMap::new("map", 0.1, *length, Vector2::zeros()),
                Err(GridMapError::InvalidGeometry(_))
            ));
        }

        assert!(matches!(
            GridMap::new("map", 0.1, Vector2::new(5.0, 5.0), Vector2::new(f64::NAN, 0.0)),
            Err(GridMapError::InvalidGeometry(_))
        ));
        assert!(matches!(
            GridMap::new("map", f64::INFINITY, Vector2::new(5.0, 5.0), Vector2::zeros()),
            Err(GridMapError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_add_layer_replaces() {
        let mut map = indexed_map();
        map.add_layer("zero", 3.0);

        assert_eq!(map.layers(), &["index".to_string(), "zero".to_string()]);
        assert_eq!(map.get("zero", (4, 4)).unwrap(), 3.0);
        assert_eq!(
            map.add_layer_data("bad", Array2::zeros((2, 2))),
            Err(GridMapError::IncompatibleShape)
        );
    }

    #[test]
    fn test_submap_matches_parent() {
        let map = indexed_map();

        let sub = map
            .submap(&Vector2::new(10.0, 15.0), &Vector2::new(4.0, 6.0))
            .unwrap();

        assert_eq!(sub.num_cells(), (4, 6));
        assert_eq!(sub.position(), Vector2::new(10.0, 15.0));
        assert_eq!(sub.layers(), map.layers());

        // Every cell of the submap has the same value as the parent cell at the same position
        for x in 0..4 {
            for y in 0..6 {
                let pos = sub.cell_position((x, y)).unwrap();
                assert_eq!(
                    sub.get("index", (x, y)).unwrap(),
                    map.get_position("index", &pos).unwrap()
                );
            }
        }
    }

    #[test]
    fn test_submap_clipped_to_bounds() {
        let map = indexed_map();

        // Half of this request hangs off the upper corner of the map
        let sub = map
            .submap(&Vector2::new(20.0, 30.0), &Vector2::new(4.0, 4.0))
            .unwrap();

        assert_eq!(sub.num_cells(), (2, 2));
        assert_eq!(sub.position(), Vector2::new(19.0, 29.0));
        assert_eq!(sub.get("index", (0, 0)).unwrap(), 0.0);
        assert_eq!(sub.get("index", (1, 1)).unwrap(), 101.0);
    }

    #[test]
    fn test_submap_out_of_bounds() {
        let map = indexed_map();

        assert_eq!(
            map.submap(&Vector2::new(100.0, 100.0), &Vector2::new(2.0, 2.0)),
            Err(GridMapError::SubmapOutOfBounds)
        );

        // Overlaps the map by less than one cell
        assert_eq!(
            map.submap(&Vector2::new(21.0, 15.0), &Vector2::new(2.5, 2.0)),
            Err(GridMapError::SubmapOutOfBounds)
        );

        assert!(matches!(
            map.submap(&Vector2::new(10.0, 15.0), &Vector2::new(0.0, 2.0)),
            Err(GridMapError::InvalidGeometry(_))
        ));
    }

    #[test]
    fn test_with_layers() {
        let map = indexed_map();

        let only_zero = map.with_layers(&["zero".to_string()]).unwrap();
        assert_eq!(only_zero.layers(), &["zero".to_string()]);
        assert_eq!(only_zero.get("zero", (3, 3)).unwrap(), 0.0);
        assert!(!only_zero.exists("index"));

        assert_eq!(
            map.with_layers(&["zero".to_string(), "slope".to_string()]),
            Err(GridMapError::UnknownLayer("slope".into()))
        );
    }

    #[test]
    fn test_msg_conversion_keeps_unknown_cells() {
        let mut map = indexed_map();
        map.get_layer_mut("zero").unwrap()[[2, 3]] = f64::NAN;

        let msg = GridMapMsg::from(&map);
        assert_eq!(msg.data[1][2 * 30 + 3], None);
        assert_eq!(msg.data[0][2 * 30 + 3], Some(203.0));

        let back = GridMap::try_from(msg).unwrap();
        assert!(back.get("zero", (2, 3)).unwrap().is_nan());
        assert_eq!(back.get("index", (19, 29)).unwrap(), 1929.0);
        assert_eq!(back.info(), map.info());
    }

    #[test]
    fn test_malformed_msg() {
        let mut msg = GridMapMsg::from(&indexed_map());
        msg.data[0].pop();

        assert!(matches!(
            GridMap::try_from(msg),
            Err(GridMapError::MalformedMessage(_))
        ));

        // A reply claiming an enormous map is rejected before anything is allocated
        let mut msg = GridMapMsg::from(&indexed_map());
        msg.length = (1e300, 1e300);
        msg.num_cells = (usize::MAX, usize::MAX);
        assert!(matches!(
            GridMap::try_from(msg),
            Err(GridMapError::InvalidGeometry(_))
        ));
    }
}
