//! # Filter Engine
//!
//! Reference [`TravEngine`] which scores each cell of the elevation map with three filters:
//!
//! - slope: the gradient of the elevation, from neighbouring cells
//! - step: the largest height difference within a window around the cell
//! - roughness: the standard deviation of the elevation within a window around the cell
//!
//! Each filter produces a score in `[0, 1]`, where 1 is flat ground and 0 is untraversable (the
//! filter's critical value was reached). The traversability of a cell is the weighted mean of the
//! three scores, or 0 if any of them is 0. Cells whose elevation is unknown have unknown scores.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{collections::HashSet, f64::consts::PI, sync::Arc};

use comms_if::eqpt::trav::{FootprintPath, PathPose, TravResult};
use log::{debug, info, trace};
use nalgebra::Vector2;
use ndarray::{Array2, ArrayView2};

use super::{
    footprint::Footprint,
    params::{EngineParams, FilterParams, FootprintParams, SharedEngineParams},
    EngineError, TravEngine,
};
use crate::grid_map::{GridMap, GridMapError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

pub const ELEVATION_LAYER: &str = "elevation";
pub const SLOPE_LAYER: &str = "slope";
pub const STEP_LAYER: &str = "step";
pub const ROUGHNESS_LAYER: &str = "roughness";
pub const TRAVERSABILITY_LAYER: &str = "traversability";
pub const FOOTPRINT_LAYER: &str = "traversability_footprint";

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct FilterEngine {
    /// Parameter store, read again when the filters are reloaded
    shared_params: SharedEngineParams,

    /// Parameters currently in use
    filters: FilterParams,
    footprint: FootprintParams,

    /// Frame used before any input has been set
    default_frame: String,

    input: Option<Arc<GridMap>>,

    output: Option<Arc<GridMap>>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl FilterEngine {
    pub fn new(shared_params: SharedEngineParams, default_frame: &str) -> Result<Self, EngineError> {
        let params = shared_params.read()?.clone();
        validate(&params)?;

        Ok(Self {
            shared_params,
            filters: params.filters,
            footprint: params.footprint,
            default_frame: default_frame.to_string(),
            input: None,
            output: None,
        })
    }

    /// Score every cell of the elevation map.
    fn filter(&self, input: &GridMap) -> Result<GridMap, EngineError> {
        let elevation = input
            .get_layer(ELEVATION_LAYER)
            .map_err(|_| EngineError::MissingLayer(ELEVATION_LAYER.into()))?;

        if elevation.iter().all(|h| h.is_nan()) {
            return Err(EngineError::NoValidElevation);
        }

        let res = input.resolution();
        let slope = slope_scores(&elevation, res, &self.filters);

        let step_params = &self.filters.step;
        let step = window_scores(
            &elevation,
            FilterParams::window_cells(step_params.window_radius_m, res),
            |heights| {
                let max = heights.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let min = heights.iter().cloned().fold(f64::INFINITY, f64::min);
                score(max - min, step_params.critical_step_m)
            },
        );

        let rough_params = &self.filters.roughness;
        let roughness = window_scores(
            &elevation,
            FilterParams::window_cells(rough_params.window_radius_m, res),
            |heights| {
                let n = heights.len() as f64;
                let mean = heights.iter().sum::<f64>() / n;
                let var = heights.iter().map(|h| (h - mean).powi(2)).sum::<f64>() / n;
                score(var.sqrt(), rough_params.critical_roughness_m)
            },
        );

        let weights = [
            self.filters.slope.weight,
            self.filters.step.weight,
            rough_params.weight,
        ];
        let total_weight: f64 = weights.iter().sum();
        let traversability = Array2::from_shape_fn(input.num_cells(), |idx| {
            let scores = [slope[idx], step[idx], roughness[idx]];

            if scores.iter().any(|s| s.is_nan()) {
                f64::NAN
            } else if scores.iter().any(|&s| s <= 0.0) {
                0.0
            } else {
                scores
                    .iter()
                    .zip(weights.iter())
                    .map(|(s, w)| s * w)
                    .sum::<f64>()
                    / total_weight
            }
        });

        let mut output = input.clone();
        output.add_layer_data(SLOPE_LAYER, slope)?;
        output.add_layer_data(STEP_LAYER, step)?;
        output.add_layer_data(ROUGHNESS_LAYER, roughness)?;
        output.add_layer_data(TRAVERSABILITY_LAYER, traversability)?;

        Ok(output)
    }
}

impl TravEngine for FilterEngine {
    fn set_elevation_input(&mut self, map: Arc<GridMap>) -> Result<(), EngineError> {
        debug!(
            "New elevation input: {} x {} m ({} x {} cells) at {} m in \"{}\", layers {:?}",
            map.length().x,
            map.length().y,
            map.num_cells().0,
            map.num_cells().1,
            map.resolution(),
            map.frame_id(),
            map.layers()
        );

        self.input = Some(map);

        Ok(())
    }

    fn compute(&mut self) -> Result<(), EngineError> {
        let input = self.input.clone().ok_or(EngineError::NoInput)?;

        let output = self.filter(&input)?;
        trace!("Traversability layers: {:?}", output.layers());

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
        let map = self.output.as_ref().ok_or(EngineError::NotReady)?;

        if path.poses.is_empty() {
            return Err(EngineError::InvalidPath("the path has no poses".into()));
        }
        if let Some(p) = path
            .poses
            .iter()
            .find(|p| !(p.x.is_finite() && p.y.is_finite() && p.yaw.is_finite()))
        {
            return Err(EngineError::InvalidPath(format!(
                "pose ({}, {}, {}) is not finite",
                p.x, p.y, p.yaw
            )));
        }

        let footprint = Footprint::from_path(path)?;
        let extent = map.length().x.max(map.length().y);
        if footprint.bounding_radius() > extent {
            return Err(EngineError::InvalidPath(format!(
                "footprint reaches {} m from the pose, larger than the {} m map",
                footprint.bounding_radius(),
                extent
            )));
        }
        let trav = map.get_layer(TRAVERSABILITY_LAYER)?;

        let half_length = map.length() / 2.0;
        let bounds = (map.position() - half_length, map.position() + half_length);

        let mut is_safe = true;
        let mut cells = HashSet::new();
        for pose in interpolate_poses(&path.poses, bounds, map.resolution()) {
            match footprint.cells(map, &pose) {
                Ok(c) => cells.extend(c),
                Err(GridMapError::OutsideMap) => {
                    debug!("Pose ({:.3}, {:.3}) is outside the map", pose.x, pose.y);
                    is_safe = false;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut sum = 0.0;
        let mut num_known = 0;
        for &cell in cells.iter() {
            let value = match trav[cell] {
                v if v.is_nan() && path.conservative => {
                    is_safe = false;
                    continue;
                }
                v if v.is_nan() => self.footprint.traversability_default,
                v => v,
            };

            if value <= 0.0 {
                is_safe = false;
            }
            sum += value;
            num_known += 1;
        }

        Ok(TravResult {
            is_safe,
            traversability: if is_safe && num_known > 0 {
                sum / num_known as f64
            } else {
                0.0
            },
            area: cells.len() as f64 * map.resolution().powi(2),
        })
    }

    fn score_footprint(&mut self, yaw: f64) -> Result<(), EngineError> {
        let map = self.output.as_ref().ok_or(EngineError::NotReady)?;
        let footprint = Footprint::from_params(&self.footprint)
            .map_err(|e| EngineError::InvalidParams(e.to_string()))?;
        let trav = map.get_layer(TRAVERSABILITY_LAYER)?;

        let mut scores = Array2::from_elem(map.num_cells(), f64::NAN);
        for ((i, j), s) in scores.indexed_iter_mut() {
            let pos = map.cell_position((i, j))?;
            let cells = footprint.cells(map, &PathPose { x: pos.x, y: pos.y, yaw })?;

            let values: Vec<f64> = cells.iter().map(|&c| trav[c]).collect();
            *s = if values.iter().any(|v| v.is_nan()) {
                f64::NAN
            } else if values.iter().any(|&v| v <= 0.0) {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            };
        }

        let mut output = (**map).clone();
        output.add_layer_data(FOOTPRINT_LAYER, scores)?;
        self.output = Some(Arc::new(output));

        info!("Footprint traversability computed at {:.3} rad", yaw);

        Ok(())
    }

    fn reload_filters(&mut self) -> Result<(), EngineError> {
        let params = self.shared_params.read()?.clone();
        validate(&params)?;

        self.filters = params.filters;
        self.footprint = params.footprint;

        info!("Traversability filters reloaded");
        debug!("Filter parameters: {:#?}", self.filters);

        Ok(())
    }

    fn reference_frame(&self) -> String {
        match self.input {
            Some(ref m) => m.frame_id().to_string(),
            None => self.default_frame.clone(),
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn validate(params: &EngineParams) -> Result<(), EngineError> {
    let f = &params.filters;

    let criticals = [
        ("slope.critical_slope_rad", f.slope.critical_slope_rad),
        ("step.critical_step_m", f.step.critical_step_m),
        ("roughness.critical_roughness_m", f.roughness.critical_roughness_m),
    ];
    for (name, value) in criticals.iter() {
        if !(*value > 0.0) {
            return Err(EngineError::InvalidParams(format!(
                "{} must be positive, got {}",
                name, value
            )));
        }
    }

    let weights = [f.slope.weight, f.step.weight, f.roughness.weight];
    if weights.iter().any(|&w| w < 0.0) || !(weights.iter().sum::<f64>() > 0.0) {
        return Err(EngineError::InvalidParams(format!(
            "filter weights must be non-negative with a positive sum, got {:?}",
            weights
        )));
    }

    Ok(())
}

/// Score of a filter value, 1 at zero falling linearly to 0 at the critical value.
fn score(value: f64, critical: f64) -> f64 {
    (1.0 - value / critical).max(0.0)
}

/// Score the slope of every cell using central differences, or one sided differences at edges and
/// next to unknown cells.
fn slope_scores(elevation: &ArrayView2<f64>, res: f64, params: &FilterParams) -> Array2<f64> {
    let (nx, ny) = elevation.dim();

    let get = |i: Option<usize>, j: Option<usize>| -> Option<f64> {
        match (i, j) {
            (Some(i), Some(j)) if i < nx && j < ny && !elevation[[i, j]].is_nan() => {
                Some(elevation[[i, j]])
            }
            _ => None,
        }
    };

    let derivative = |prev: Option<f64>, centre: f64, next: Option<f64>| match (prev, next) {
        (Some(a), Some(b)) => Some((b - a) / (2.0 * res)),
        (Some(a), None) => Some((centre - a) / res),
        (None, Some(b)) => Some((b - centre) / res),
        (None, None) => None,
    };

    Array2::from_shape_fn((nx, ny), |(i, j)| {
        let centre = elevation[[i, j]];
        if centre.is_nan() {
            return f64::NAN;
        }

        let dh_dx = derivative(
            get(i.checked_sub(1), Some(j)),
            centre,
            get(Some(i + 1), Some(j)),
        );
        let dh_dy = derivative(
            get(Some(i), j.checked_sub(1)),
            centre,
            get(Some(i), Some(j + 1)),
        );

        let gradient = match (dh_dx, dh_dy) {
            (Some(x), Some(y)) => (x * x + y * y).sqrt(),
            (Some(x), None) => x.abs(),
            (None, Some(y)) => y.abs(),
            (None, None) => return f64::NAN,
        };

        score(gradient.atan(), params.slope.critical_slope_rad)
    })
}

/// Score every cell from the known elevations in the square window of `half_width` cells around
/// it.
fn window_scores<F>(elevation: &ArrayView2<f64>, half_width: usize, scorer: F) -> Array2<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let (nx, ny) = elevation.dim();
    let mut heights = Vec::with_capacity((2 * half_width + 1).pow(2));

    let mut scores = Array2::from_elem((nx, ny), f64::NAN);
    for ((i, j), s) in scores.indexed_iter_mut() {
        if elevation[[i, j]].is_nan() {
            continue;
        }

        heights.clear();
        for wi in i.saturating_sub(half_width)..(i + half_width + 1).min(nx) {
            for wj in j.saturating_sub(half_width)..(j + half_width + 1).min(ny) {
                let h = elevation[[wi, wj]];
                if !h.is_nan() {
                    heights.push(h);
                }
            }
        }

        *s = scorer(&heights);
    }

    scores
}

/// Poses along the path spaced at most `spacing` apart, including the original poses.
///
/// Only the parts of each segment inside `bounds` (the min and max corners of the map) are
/// interpolated, the rest of the segment is represented by its end poses.
fn interpolate_poses(
    poses: &[PathPose],
    bounds: (Vector2<f64>, Vector2<f64>),
    spacing: f64,
) -> Vec<PathPose> {
    let mut out = Vec::with_capacity(poses.len());

    for pair in poses.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        out.push(a);

        let (t0, t1) = match clip_segment(&a, &b, bounds) {
            Some(t) => t,
            None => continue,
        };

        let dist = ((t1 - t0) * (b.x - a.x)).hypot((t1 - t0) * (b.y - a.y));
        let steps = (dist / spacing).ceil().max(1.0) as usize;
        let dyaw = (b.yaw - a.yaw + PI).rem_euclid(2.0 * PI) - PI;

        for k in 0..=steps {
            let t = t0 + (t1 - t0) * k as f64 / steps as f64;
            if t > 0.0 && t < 1.0 {
                out.push(PathPose {
                    x: a.x + t * (b.x - a.x),
                    y: a.y + t * (b.y - a.y),
                    yaw: a.yaw + t * dyaw,
                });
            }
        }
    }

    if let Some(last) = poses.last() {
        out.push(*last);
    }

    out
}

/// Range of the segment parameter `t` in `[0, 1]` for which `a + t * (b - a)` is inside the
/// bounds, or `None` if the segment misses them.
fn clip_segment(
    a: &PathPose,
    b: &PathPose,
    (min, max): (Vector2<f64>, Vector2<f64>),
) -> Option<(f64, f64)> {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    if !(dx.is_finite() && dy.is_finite()) {
        return None;
    }

    let mut t0 = 0f64;
    let mut t1 = 1f64;
    for &(p, q) in &[
        (-dx, a.x - min.x),
        (dx, max.x - a.x),
        (-dy, a.y - min.y),
        (dy, max.y - a.y),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else if p < 0.0 {
            t0 = t0.max(q / p);
        } else {
            t1 = t1.min(q / p);
        }
    }

    if t0 <= t1 {
        Some((t0, t1))
    } else {
        None
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
